//! Transport dialing.
//!
//! The pool never opens sockets itself; it hands an [`EndpointConfig`]
//! to an injected [`Dialer`]. This keeps TLS material loading and proxy
//! tunneling outside the supervised core and makes dial failures easy to
//! simulate in tests.
//!
//! [`TungsteniteDialer`] is the default implementation. It builds the
//! handshake request (subprotocols, custom headers, Authorization,
//! Origin, User-Agent), applies the configured handshake timeout, and
//! honors the certificate verification flag for `wss://` targets.
//! Client-certificate material, SNI override, and proxy tunneling are
//! carried in the configuration for custom dialers and logged as
//! unsupported here.
//!
//! # Handshake Rejection
//!
//! A non-101 HTTP response surfaces as [`Error::Rejected`] carrying the
//! status code, response headers, and the response body truncated to
//! [`REJECTION_BODY_CAP`] bytes to bound memory.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::{
    AUTHORIZATION, ORIGIN, SEC_WEBSOCKET_PROTOCOL, USER_AGENT,
};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of rejection response body bytes captured.
pub const REJECTION_BODY_CAP: usize = 2048;

// ============================================================================
// Types
// ============================================================================

/// The transport stream produced by a dial.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Dialer
// ============================================================================

/// Capability that opens a transport for an endpoint.
///
/// Injected into the pool; implement this to add proxy tunneling or
/// client-certificate TLS without touching the supervised core.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Opens a WebSocket connection to the endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the configuration is malformed
    /// - [`Error::Rejected`] if the peer rejected the handshake
    /// - [`Error::DialTimeout`] if the handshake timed out
    /// - [`Error::Dial`] for any other connection failure
    async fn dial(&self, endpoint: &EndpointConfig) -> Result<WsStream>;
}

// ============================================================================
// TungsteniteDialer
// ============================================================================

/// Default dialer built on `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteDialer;

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, endpoint: &EndpointConfig) -> Result<WsStream> {
        endpoint.validate()?;

        if endpoint.proxy.is_some() {
            debug!(url = %endpoint.url, "proxy configured but not supported by the default dialer");
        }
        if endpoint.permessage_deflate {
            debug!(url = %endpoint.url, "permessage-deflate not supported by the default dialer");
        }

        let request = build_request(endpoint)?;
        let connector = build_connector(endpoint)?;
        let timeout_ms = endpoint.handshake_timeout;

        let connect = connect_async_tls_with_config(request, None, false, connector);

        match timeout(endpoint.handshake_timeout(), connect).await {
            Ok(Ok((stream, response))) => {
                debug!(url = %endpoint.url, status = %response.status(), "handshake completed");
                Ok(stream)
            }
            Ok(Err(WsError::Http(response))) => Err(rejection(*response)),
            Ok(Err(e)) => Err(Error::dial(e.to_string())),
            Err(_) => Err(Error::dial_timeout(timeout_ms)),
        }
    }
}

// ============================================================================
// Request Construction
// ============================================================================

/// Builds the handshake request from the endpoint configuration.
fn build_request(endpoint: &EndpointConfig) -> Result<Request> {
    let mut request = endpoint
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::invalid_argument(format!("invalid url {:?}: {e}", endpoint.url)))?;

    let headers = request.headers_mut();

    if !endpoint.protocols.is_empty() {
        let joined = endpoint.protocols.join(", ");
        headers.insert(SEC_WEBSOCKET_PROTOCOL, header_value(&joined)?);
    }

    for (name, value) in &endpoint.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::invalid_argument(format!("invalid header name {name:?}: {e}")))?;
        headers.insert(name, header_value(value)?);
    }

    // Authorization after custom headers so credentials always win.
    if let Some(auth) = endpoint.authorization() {
        headers.insert(AUTHORIZATION, header_value(&auth)?);
    }

    if let Some(origin) = &endpoint.origin {
        headers.insert(ORIGIN, header_value(origin)?);
    }

    if let Some(user_agent) = &endpoint.user_agent {
        headers.insert(USER_AGENT, header_value(user_agent)?);
    }

    Ok(request)
}

/// Parses a header value, mapping failures to `InvalidArgument`.
fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::invalid_argument(format!("invalid header value {value:?}: {e}")))
}

/// Builds the TLS connector for `wss://` targets.
///
/// Returns `None` for plain targets and for the default verified path,
/// letting tungstenite use its own connector.
fn build_connector(endpoint: &EndpointConfig) -> Result<Option<Connector>> {
    if !endpoint.is_tls() || endpoint.reject_unauthorized {
        if !endpoint.tls.is_empty() {
            debug!(url = %endpoint.url, "tls material carried for a custom dialer; ignored here");
        }
        return Ok(None);
    }

    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| Error::dial(format!("tls connector: {e}")))?;

    Ok(Some(Connector::NativeTls(connector)))
}

// ============================================================================
// Rejection Capture
// ============================================================================

/// Converts a non-101 handshake response into a rejection error.
fn rejection(response: Response) -> Error {
    let status = response.status().as_u16();

    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let body = response
        .into_body()
        .map(|bytes| {
            let end = bytes.len().min(REJECTION_BODY_CAP);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        })
        .unwrap_or_default();

    Error::rejected(status, headers, body)
}

// ============================================================================
// Tests
// ============================================================================
