//! Error types for the connection pool.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use sockpool::{Result, Error};
//!
//! async fn example(pool: &Pool) -> Result<()> {
//!     pool.create("feed", EndpointConfig::new("wss://example.com/ws")).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Validation | [`Error::InvalidArgument`] |
//! | Addressing | [`Error::NotFound`], [`Error::NotConnected`] |
//! | Dialing | [`Error::Dial`], [`Error::DialTimeout`], [`Error::Rejected`] |
//! | Runtime | [`Error::ConnectionClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Command-level validation errors are returned synchronously to the
/// caller; transport-level failures are reported asynchronously as pool
/// events and drive the reconnect state machine instead of propagating.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// Invalid argument in a command or configuration.
    ///
    /// Returned before any registry state is mutated.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Addressing Errors
    // ========================================================================
    /// No connection entry registered under the given name.
    #[error("Connection not found: {name}")]
    NotFound {
        /// The unknown connection name.
        name: String,
    },

    /// Send attempted while the named connection is not open.
    ///
    /// The frame is dropped; the caller is not blocked or retried.
    #[error("Connection not open: {name}")]
    NotConnected {
        /// The connection name that was not open.
        name: String,
    },

    // ========================================================================
    // Dial Errors
    // ========================================================================
    /// Transport could not be established.
    ///
    /// Drives reconnect scheduling; a persistently unreachable endpoint
    /// keeps retrying rather than wedging the entry.
    #[error("Dial failed: {message}")]
    Dial {
        /// Description of the dial failure.
        message: String,
    },

    /// Handshake did not complete within the configured timeout.
    #[error("Dial timeout after {timeout_ms}ms")]
    DialTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Handshake rejected by the peer with a non-101 HTTP response.
    ///
    /// Carries the full diagnostic; the response body is truncated to a
    /// fixed cap to bound memory.
    #[error("Handshake rejected with HTTP {status}")]
    Rejected {
        /// HTTP status code of the rejection.
        status: u16,
        /// Response headers as name/value pairs.
        headers: Vec<(String, String)>,
        /// Response body, truncated.
        body: String,
    },

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// The connection's supervisor task has already terminated.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[inline]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(name: impl Into<String>) -> Self {
        Self::NotConnected { name: name.into() }
    }

    /// Creates a dial failure error.
    #[inline]
    pub fn dial(message: impl Into<String>) -> Self {
        Self::Dial {
            message: message.into(),
        }
    }

    /// Creates a dial timeout error.
    #[inline]
    pub fn dial_timeout(timeout_ms: u64) -> Self {
        Self::DialTimeout { timeout_ms }
    }

    /// Creates a handshake rejection error.
    #[inline]
    pub fn rejected(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            headers,
            body: body.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a validation error.
    ///
    /// Validation errors are returned synchronously and never drive the
    /// reconnect state machine.
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Returns `true` if this is a dial-phase error.
    #[inline]
    #[must_use]
    pub fn is_dial_error(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. } | Self::DialTimeout { .. } | Self::Rejected { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors schedule a reconnect attempt; the pool's core
    /// purpose is surviving transient disconnects.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::DialTimeout { .. }
                | Self::Rejected { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
