//! sockpool - Named WebSocket connection pool.
//!
//! This library maintains a dynamic, addressable set of client
//! WebSocket connections identified by logical names rather than by
//! connection handles. Callers create, close, and send through
//! connections by name; the pool owns reconnection after unexpected
//! disconnects (exponential backoff with jitter) and periodic liveness
//! probing (heartbeat) per connection.
//!
//! # Architecture
//!
//! - Each named entry is a dedicated, independent connection driven by
//!   its own supervisor task
//! - A shared [`EventSink`] receives every emitted event (open,
//!   message, close, error, command acks)
//! - Transport opening is an injected [`Dialer`] capability, keeping
//!   TLS and proxy construction outside the supervised core
//! - Delivery is best-effort: messages sent while disconnected are
//!   dropped with an error signal, never queued
//!
//! # Quick Start
//!
//! ```no_run
//! use sockpool::{ChannelSink, EndpointConfig, Payload, Pool, PoolOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (sink, mut events) = ChannelSink::new();
//!     let pool = Pool::new(PoolOptions::new(), sink);
//!
//!     // Open a named connection; the pool keeps it alive from here on.
//!     pool.create("feed", EndpointConfig::new("wss://feed.example.com/ws")).await?;
//!
//!     pool.send("feed", Payload::from("subscribe"))?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {}", event.name, event.kind.topic());
//!     }
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backoff`] | Reconnect delay policy |
//! | [`command`] | Control commands and the command router |
//! | [`config`] | Endpoint and pool configuration |
//! | [`decode`] | Pluggable text frame decoding |
//! | [`dialer`] | Transport opening seam and default dialer |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`event`] | Pool events and the event sink seam |
//! | [`registry`] | The named connection pool |

// ============================================================================
// Modules
// ============================================================================

/// Reconnect delay policy.
///
/// Exponential growth with a cap and uniform jitter.
pub mod backoff;

/// Control commands and the command router.
///
/// The destination-tagged dispatch surface, including the reserved
/// [`CONTROL_CHANNEL`].
pub mod command;

/// Endpoint and pool configuration.
///
/// [`EndpointConfig`] deserializes directly from control-channel
/// `create` command objects.
pub mod config;

/// Pluggable text frame decoding.
///
/// Default policy: opportunistic JSON for bracketed text.
pub mod decode;

/// Transport opening.
///
/// The [`Dialer`] seam and the default tungstenite implementation.
pub mod dialer;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Pool events and the event sink seam.
pub mod event;

/// The named connection pool.
pub mod registry;

/// Per-connection lifecycle supervision.
///
/// Internal module driving each entry's dial/reconnect/heartbeat cycle.
mod supervisor;

// ============================================================================
// Re-exports
// ============================================================================

// Pool types
pub use registry::{Pool, PoolBuilder};

// Command types
pub use command::{CONTROL_CHANNEL, Command, CommandRouter};

// Configuration types
pub use config::{EndpointConfig, PoolOptions, TlsConfig};

// Policy types
pub use backoff::BackoffPolicy;
pub use decode::{DecodePolicy, opportunistic_json, passthrough};

// Dialer types
pub use dialer::{Dialer, TungsteniteDialer, WsStream};

// Event types
pub use event::{
    ChannelSink, ConnState, EntrySnapshot, EventKind, EventSink, Payload, PoolEvent, PoolSnapshot,
};

// Error types
pub use error::{Error, Result};
