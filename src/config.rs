//! Endpoint and pool configuration.
//!
//! [`EndpointConfig`] describes one named connection's dial target: the
//! address plus everything the transport opener needs (subprotocols,
//! headers, credentials, TLS options, proxy, timeouts). The core
//! validates presence of the address and otherwise treats the blob as
//! opaque configuration for the [`Dialer`](crate::dialer::Dialer).
//!
//! [`PoolOptions`] holds pool-wide settings: the reconnect delay window
//! and the optional declarative startup map of connections to open as if
//! a create command had been received for each.
//!
//! Both deserialize from the camelCase JSON shape used on the control
//! channel, so a `create` command object parses directly into an
//! [`EndpointConfig`]. All durations are given in milliseconds.
//!
//! # Example
//!
//! ```
//! use sockpool::EndpointConfig;
//!
//! let endpoint = EndpointConfig::new("wss://feed.example.com/ws")
//!     .with_protocol("v2")
//!     .with_header("X-Client", "sockpool")
//!     .with_basic_auth("user", "secret")
//!     .with_ping_interval_ms(30_000);
//!
//! assert!(endpoint.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default handshake timeout when none is configured.
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default reconnect delay floor.
const DEFAULT_RECONNECT_MIN_MS: u64 = 500;

/// Default reconnect delay cap.
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

// ============================================================================
// TlsConfig
// ============================================================================

/// TLS material and overrides, passed through to the dialer.
///
/// The default dialer honors the verification flag on
/// [`EndpointConfig`]; certificate material and SNI override are carried
/// for custom [`Dialer`](crate::dialer::Dialer) implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    /// CA bundle path.
    pub ca: Option<String>,
    /// Client certificate path.
    pub cert: Option<String>,
    /// Client key path.
    pub key: Option<String>,
    /// Client key passphrase.
    pub passphrase: Option<String>,
    /// SNI hostname override.
    pub servername: Option<String>,
}

impl TlsConfig {
    /// Returns `true` if no field is set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ca.is_none()
            && self.cert.is_none()
            && self.key.is_none()
            && self.passphrase.is_none()
            && self.servername.is_none()
    }
}

// ============================================================================
// EndpointConfig
// ============================================================================

/// Dial configuration for one named connection.
///
/// Deserializes directly from a control-channel `create` command object;
/// unknown fields (such as `action` and `id`) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    /// Target address (`ws://` or `wss://`).
    pub url: String,

    /// Subprotocols offered during the handshake.
    pub protocols: Vec<String>,

    /// Custom handshake headers.
    pub headers: FxHashMap<String, String>,

    /// Basic-auth username.
    pub username: Option<String>,

    /// Basic-auth password.
    pub password: Option<String>,

    /// Bearer token; basic credentials take precedence when both are set.
    pub bearer: Option<String>,

    /// Origin header override.
    pub origin: Option<String>,

    /// User-Agent header override.
    pub user_agent: Option<String>,

    /// Verify the peer's TLS certificate. Defaults to `true`.
    pub reject_unauthorized: bool,

    /// TLS material and overrides.
    pub tls: TlsConfig,

    /// HTTP proxy URL for tunneled connections.
    pub proxy: Option<String>,

    /// Handshake timeout in milliseconds.
    pub handshake_timeout: u64,

    /// Negotiate permessage-deflate compression.
    pub permessage_deflate: bool,

    /// Heartbeat ping interval in milliseconds; 0 disables heartbeat.
    #[serde(rename = "pingInterval")]
    pub ping_interval_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocols: Vec::new(),
            headers: FxHashMap::default(),
            username: None,
            password: None,
            bearer: None,
            origin: None,
            user_agent: None,
            reject_unauthorized: true,
            tls: TlsConfig::default(),
            proxy: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            permessage_deflate: false,
            ping_interval_ms: 0,
        }
    }
}

// ============================================================================
// EndpointConfig - Constructors
// ============================================================================

impl EndpointConfig {
    /// Creates a configuration for the given address.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// EndpointConfig - Builder Methods
// ============================================================================

impl EndpointConfig {
    /// Offers a subprotocol during the handshake.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Adds a custom handshake header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets basic-auth credentials.
    #[inline]
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets a bearer token.
    #[inline]
    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Sets the Origin header override.
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the User-Agent header override.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Disables TLS certificate verification.
    #[inline]
    #[must_use]
    pub fn with_insecure_tls(mut self) -> Self {
        self.reject_unauthorized = false;
        self
    }

    /// Sets the handshake timeout in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.handshake_timeout = timeout_ms;
        self
    }

    /// Sets the heartbeat ping interval in milliseconds; 0 disables.
    #[inline]
    #[must_use]
    pub fn with_ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }
}

// ============================================================================
// EndpointConfig - Accessors
// ============================================================================

impl EndpointConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the address is empty, not a
    /// valid URL, or not a `ws`/`wss` URL.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::invalid_argument("endpoint url is empty"));
        }

        let parsed = Url::parse(&self.url)
            .map_err(|e| Error::invalid_argument(format!("invalid url {:?}: {e}", self.url)))?;

        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(Error::invalid_argument(format!(
                "unsupported scheme {other:?}, expected ws or wss"
            ))),
        }
    }

    /// Returns the Authorization header value, if credentials are set.
    ///
    /// Basic credentials take precedence over a bearer token.
    #[must_use]
    pub fn authorization(&self) -> Option<String> {
        if let Some(username) = &self.username {
            let password = self.password.as_deref().unwrap_or_default();
            let encoded = BASE64.encode(format!("{username}:{password}"));
            return Some(format!("Basic {encoded}"));
        }

        self.bearer.as_ref().map(|token| format!("Bearer {token}"))
    }

    /// Returns the heartbeat interval, or `None` when disabled.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    /// Returns the handshake timeout as a duration.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout)
    }

    /// Returns `true` if the address uses TLS.
    #[inline]
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("wss://")
    }
}

// ============================================================================
// PoolOptions
// ============================================================================

/// Pool-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolOptions {
    /// Reconnect delay floor in milliseconds.
    pub reconnect_min: u64,

    /// Reconnect delay cap in milliseconds. Clamped to at least the
    /// floor when building the backoff policy.
    pub reconnect_max: u64,

    /// Declarative startup connections, opened exactly as if a create
    /// command had been received for each.
    pub connections: FxHashMap<String, EndpointConfig>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            reconnect_min: DEFAULT_RECONNECT_MIN_MS,
            reconnect_max: DEFAULT_RECONNECT_MAX_MS,
            connections: FxHashMap::default(),
        }
    }
}

impl PoolOptions {
    /// Creates options with defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconnect delay window in milliseconds.
    #[inline]
    #[must_use]
    pub fn with_reconnect_window_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.reconnect_min = min_ms;
        self.reconnect_max = max_ms;
        self
    }

    /// Adds a declarative startup connection.
    #[inline]
    #[must_use]
    pub fn with_connection(mut self, name: impl Into<String>, endpoint: EndpointConfig) -> Self {
        self.connections.insert(name.into(), endpoint);
        self
    }

    /// Builds the backoff policy from the reconnect window.
    ///
    /// The window is clamped, not rejected: a cap below the floor is
    /// raised to the floor.
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.reconnect_min),
            Duration::from_millis(self.reconnect_max),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_defaults() {
        let endpoint = EndpointConfig::default();
        assert!(endpoint.reject_unauthorized);
        assert_eq!(endpoint.handshake_timeout, 10_000);
        assert_eq!(endpoint.ping_interval_ms, 0);
        assert!(endpoint.heartbeat_interval().is_none());
    }

    #[test]
    fn test_parse_create_command_shape() {
        let value = json!({
            "action": "create",
            "id": "feed",
            "url": "wss://feed.example.com/ws",
            "protocols": ["v2"],
            "headers": {"X-Client": "sockpool"},
            "username": "user",
            "password": "secret",
            "rejectUnauthorized": false,
            "pingInterval": 30000
        });

        let endpoint: EndpointConfig = serde_json::from_value(value).expect("parse");
        assert_eq!(endpoint.url, "wss://feed.example.com/ws");
        assert_eq!(endpoint.protocols, vec!["v2".to_string()]);
        assert_eq!(endpoint.headers.get("X-Client").map(String::as_str), Some("sockpool"));
        assert!(!endpoint.reject_unauthorized);
        assert_eq!(endpoint.ping_interval_ms, 30_000);
        assert_eq!(
            endpoint.heartbeat_interval(),
            Some(Duration::from_millis(30_000))
        );
    }

    #[test]
    fn test_validate_empty_url() {
        let endpoint = EndpointConfig::default();
        assert!(endpoint.validate().is_err());
    }

    #[test]
    fn test_validate_bad_scheme() {
        let endpoint = EndpointConfig::new("http://example.com");
        assert!(endpoint.validate().is_err());
    }

    #[test]
    fn test_validate_ok() {
        assert!(EndpointConfig::new("ws://localhost:9001").validate().is_ok());
        assert!(EndpointConfig::new("wss://example.com/ws").validate().is_ok());
    }

    #[test]
    fn test_authorization_none() {
        assert!(EndpointConfig::new("ws://x").authorization().is_none());
    }

    #[test]
    fn test_authorization_basic() {
        let endpoint = EndpointConfig::new("ws://x").with_basic_auth("user", "pass");
        // base64("user:pass")
        assert_eq!(
            endpoint.authorization().as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
    }

    #[test]
    fn test_authorization_bearer() {
        let endpoint = EndpointConfig::new("ws://x").with_bearer("tok-123");
        assert_eq!(endpoint.authorization().as_deref(), Some("Bearer tok-123"));
    }

    #[test]
    fn test_authorization_basic_precedence() {
        let endpoint = EndpointConfig::new("ws://x")
            .with_bearer("tok-123")
            .with_basic_auth("user", "pass");
        assert_eq!(
            endpoint.authorization().as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
    }

    #[test]
    fn test_builder_chain() {
        let endpoint = EndpointConfig::new("wss://example.com/ws")
            .with_protocol("a")
            .with_protocol("b")
            .with_origin("https://example.com")
            .with_user_agent("sockpool/0.1")
            .with_insecure_tls()
            .with_handshake_timeout_ms(2_500);

        assert_eq!(endpoint.protocols.len(), 2);
        assert_eq!(endpoint.origin.as_deref(), Some("https://example.com"));
        assert_eq!(endpoint.user_agent.as_deref(), Some("sockpool/0.1"));
        assert!(!endpoint.reject_unauthorized);
        assert_eq!(endpoint.handshake_timeout(), Duration::from_millis(2_500));
        assert!(endpoint.is_tls());
    }

    #[test]
    fn test_tls_config_is_empty() {
        assert!(TlsConfig::default().is_empty());
        let tls = TlsConfig {
            servername: Some("internal.example.com".into()),
            ..Default::default()
        };
        assert!(!tls.is_empty());
    }

    #[test]
    fn test_pool_options_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.reconnect_min, 500);
        assert_eq!(options.reconnect_max, 30_000);
        assert!(options.connections.is_empty());
    }

    #[test]
    fn test_pool_options_backoff_clamps() {
        let options = PoolOptions::new().with_reconnect_window_ms(5_000, 1_000);
        let backoff = options.backoff();
        assert_eq!(backoff.base(), Duration::from_secs(5));
        assert_eq!(backoff.max(), Duration::from_secs(5));
    }

    #[test]
    fn test_pool_options_declarative_parse() {
        let value = json!({
            "reconnectMin": 250,
            "reconnectMax": 10000,
            "connections": {
                "feed": {"url": "ws://localhost:9001", "pingInterval": 5000}
            }
        });

        let options: PoolOptions = serde_json::from_value(value).expect("parse");
        assert_eq!(options.reconnect_min, 250);
        let feed = options.connections.get("feed").expect("feed entry");
        assert_eq!(feed.url, "ws://localhost:9001");
        assert_eq!(feed.ping_interval_ms, 5_000);
    }
}
