//! Pool events and the event sink seam.
//!
//! Every supervisor emits [`PoolEvent`]s to a shared [`EventSink`]: the
//! abstract consumer implemented by the host adapter. Events are tagged
//! with the originating connection name and a topic; control-channel
//! acknowledgements use the reserved control name.
//!
//! Per entry, events are emitted in the order `open → message* → close`,
//! possibly repeated across reconnect cycles. There is no ordering
//! guarantee across different entries.
//!
//! # Example
//!
//! ```ignore
//! let (sink, mut events) = ChannelSink::new();
//! let pool = Pool::builder(options).sink(sink).build()?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}: {}", event.name, event.kind.topic());
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;

// ============================================================================
// ConnState
// ============================================================================

/// Readiness state of a named connection.
///
/// Mirrors the underlying transport's readiness; `Closed → Connecting`
/// is the reconnect transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    /// Dial in progress; transport not yet open.
    Connecting,
    /// Transport open; sends are forwarded.
    Open,
    /// Caller-initiated closure in progress.
    Closing,
    /// Transport closed.
    Closed,
}

impl ConnState {
    /// Returns the lowercase string representation.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// An outbound or inbound message payload.
///
/// Structured values are serialized to compact JSON text frames before
/// transmission; raw byte payloads travel as binary frames unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Raw binary frame.
    Binary(Vec<u8>),
    /// Structured value, encoded as compact JSON text on the wire.
    Json(Value),
}

impl Payload {
    /// Converts the payload to a WebSocket message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if a structured value
    /// fails to serialize.
    pub(crate) fn to_message(&self) -> Result<Message> {
        match self {
            Self::Text(text) => Ok(Message::Text(text.clone().into())),
            Self::Binary(bytes) => Ok(Message::Binary(bytes.clone().into())),
            Self::Json(value) => Ok(Message::Text(serde_json::to_string(value)?.into())),
        }
    }

    /// Builds a payload from a dispatch value.
    ///
    /// Plain strings become text frames; everything else is sent as its
    /// compact JSON encoding.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    /// Endpoint address.
    pub url: String,
    /// Connection state at snapshot time.
    pub state: ConnState,
    /// Reconnect attempts since the last successful open.
    #[serde(rename = "reconnectAttempts")]
    pub reconnect_attempts: u32,
    /// Heartbeat interval in milliseconds; 0 means disabled.
    #[serde(rename = "pingInterval")]
    pub heartbeat_interval_ms: u64,
}

/// Snapshot of the whole registry, keyed by connection name.
pub type PoolSnapshot = FxHashMap<String, EntrySnapshot>;

// ============================================================================
// PoolEvent
// ============================================================================

/// An event emitted by the pool, tagged with the originating name.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    /// Originating connection name, or the control channel for acks.
    pub name: String,
    /// What happened.
    pub kind: EventKind,
}

/// Event body variants.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Transport opened.
    Open {
        /// Endpoint address.
        url: String,
    },

    /// Inbound frame, decoded per the pool's decode policy.
    Message {
        /// Decoded payload.
        payload: Payload,
    },

    /// Transport closed.
    Closed {
        /// Close code (1005 when the peer sent no status).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
        /// Endpoint address.
        url: String,
    },

    /// Transport or handshake error. Normally followed by a close.
    Error {
        /// Human-readable error message.
        message: String,
        /// HTTP status for handshake rejections.
        status: Option<u16>,
        /// Response headers for handshake rejections.
        headers: Option<Vec<(String, String)>>,
        /// Truncated response body for handshake rejections.
        body: Option<String>,
    },

    /// Control-command acknowledgement.
    Ack {
        /// Echoed command action.
        action: String,
        /// Echoed target name, when the command had one.
        id: Option<String>,
    },

    /// Registry snapshot, in response to a list command.
    List {
        /// Per-name entry snapshots.
        snapshot: PoolSnapshot,
    },
}

impl PoolEvent {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl EventKind {
    /// Returns the event's topic tag.
    #[inline]
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Message { .. } => "message",
            Self::Closed { .. } => "close",
            Self::Error { .. } => "error",
            Self::Ack { .. } => "ack",
            Self::List { .. } => "list",
        }
    }

    /// Creates an error event body from a plain message.
    #[inline]
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            status: None,
            headers: None,
            body: None,
        }
    }
}

// ============================================================================
// EventSink
// ============================================================================

/// Abstract consumer of pool events.
///
/// Implemented by the host adapter; shared by every supervisor. The
/// implementation must not block the emitting task for long, since
/// event emission sits on each connection's read path.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Consumes one event.
    async fn emit(&self, event: PoolEvent);
}

// ============================================================================
// ChannelSink
// ============================================================================

/// An [`EventSink`] backed by an unbounded channel.
///
/// Useful for hosts that want events as a stream, and for tests.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PoolEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiving half.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: PoolEvent) {
        // Receiver dropped means the host stopped listening; drop the event.
        let _ = self.tx.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
