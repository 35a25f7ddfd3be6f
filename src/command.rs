//! Control commands and the command router.
//!
//! Callers reach the pool through a single dispatch entry point tagged
//! with a destination name. The reserved name [`CONTROL_CHANNEL`]
//! carries JSON command objects; any other non-empty destination is a
//! targeted send. An empty destination is a usage error, reported but
//! never fatal.
//!
//! # Command Shape
//!
//! ```json
//! { "action": "create", "id": "feed", "url": "wss://feed.example.com/ws" }
//! { "action": "close", "id": "feed" }
//! { "action": "delete", "id": "feed" }
//! { "action": "closeAll" }
//! { "action": "list" }
//! ```
//!
//! An unrecognized or missing action falls back to `list`. Required
//! fields are validated before the registry is touched; every
//! successful command except the implicit teardown inside `create`
//! emits an acknowledgement event on the control channel.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSink, Payload, PoolEvent};
use crate::registry::Pool;

// ============================================================================
// Constants
// ============================================================================

/// Reserved destination name for management commands.
pub const CONTROL_CHANNEL: &str = "control";

// ============================================================================
// Command
// ============================================================================

/// A parsed control command.
#[derive(Debug, Clone)]
pub enum Command {
    /// Create (or replace) a named connection.
    Create {
        /// Connection name.
        id: String,
        /// Dial configuration, parsed from the command object.
        endpoint: EndpointConfig,
    },

    /// Close a named connection, keeping it addressable.
    Close {
        /// Connection name.
        id: String,
    },

    /// Close a named connection and remove it from the registry.
    Delete {
        /// Connection name.
        id: String,
    },

    /// Close every connection.
    CloseAll,

    /// Emit a registry snapshot.
    List,
}

impl Command {
    /// Parses a command object.
    ///
    /// Unrecognized and missing actions fall back to [`Command::List`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when a required field is
    /// missing or empty. No registry state is touched on failure.
    pub fn parse(value: &Value) -> Result<Self> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("list");

        match action {
            "create" => {
                let id = required_str(value, "id")?;
                required_str(value, "url")?;

                let endpoint: EndpointConfig = serde_json::from_value(value.clone())
                    .map_err(|e| Error::invalid_argument(format!("malformed create command: {e}")))?;

                Ok(Self::Create { id, endpoint })
            }

            "close" => Ok(Self::Close {
                id: required_str(value, "id")?,
            }),

            "delete" => Ok(Self::Delete {
                id: required_str(value, "id")?,
            }),

            "closeAll" => Ok(Self::CloseAll),

            other => {
                if other != "list" {
                    debug!(action = other, "unrecognized action, listing instead");
                }
                Ok(Self::List)
            }
        }
    }

    /// Returns the command's action name.
    #[inline]
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Close { .. } => "close",
            Self::Delete { .. } => "delete",
            Self::CloseAll => "closeAll",
            Self::List => "list",
        }
    }
}

/// Extracts a required non-empty string field.
fn required_str(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_argument(format!("missing required field {key:?}")))
}

// ============================================================================
// CommandRouter
// ============================================================================

/// Interprets control commands against the registry and produces
/// acknowledgement events.
pub struct CommandRouter {
    pool: Pool,
    sink: Arc<dyn EventSink>,
}

impl CommandRouter {
    /// Creates a router over the pool, sharing its event sink.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        let sink = pool.sink();
        Self { pool, sink }
    }

    /// Routes one destination-tagged input.
    ///
    /// The control channel takes command objects; every other non-empty
    /// destination is a targeted send (plain strings travel as text,
    /// other values as compact JSON).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty destination or a
    ///   malformed command
    /// - [`Error::NotFound`] / [`Error::NotConnected`] for failed sends
    pub async fn dispatch(&self, destination: &str, payload: Value) -> Result<()> {
        if destination.trim().is_empty() {
            return Err(Error::invalid_argument("message destination is empty"));
        }

        if destination == CONTROL_CHANNEL {
            return self.handle(payload).await;
        }

        self.pool.send(destination, Payload::from_value(payload))
    }

    /// Executes one control command.
    ///
    /// # Errors
    ///
    /// Returns the command's validation or execution error; transport
    /// failures never surface here, they are reported as events.
    pub async fn handle(&self, command: Value) -> Result<()> {
        match Command::parse(&command)? {
            Command::Create { id, endpoint } => {
                self.pool.create(&id, endpoint).await?;
                self.ack("create", Some(id)).await;
            }

            Command::Close { id } => {
                self.pool.close(&id)?;
                self.ack("close", Some(id)).await;
            }

            Command::Delete { id } => {
                self.pool.delete(&id)?;
                self.ack("delete", Some(id)).await;
            }

            Command::CloseAll => {
                self.pool.close_all();
                self.ack("closeAll", None).await;
            }

            Command::List => {
                let snapshot = self.pool.snapshot();
                self.sink
                    .emit(PoolEvent::new(CONTROL_CHANNEL, EventKind::List { snapshot }))
                    .await;
            }
        }

        Ok(())
    }

    /// Emits a command acknowledgement on the control channel.
    async fn ack(&self, action: &str, id: Option<String>) {
        self.sink
            .emit(PoolEvent::new(
                CONTROL_CHANNEL,
                EventKind::Ack {
                    action: action.to_string(),
                    id,
                },
            ))
            .await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    use crate::config::PoolOptions;
    use crate::event::{ChannelSink, ConnState};

    async fn spawn_echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = ws.next().await {
                        match message {
                            Message::Text(_) | Message::Binary(_) => {
                                if ws.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        port
    }

    fn test_router() -> (CommandRouter, Pool, UnboundedReceiver<PoolEvent>) {
        let (sink, events) = ChannelSink::new();
        let pool = Pool::new(PoolOptions::new(), sink);
        (CommandRouter::new(pool.clone()), pool, events)
    }

    async fn next_event(events: &mut UnboundedReceiver<PoolEvent>) -> PoolEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    #[test]
    fn test_parse_create() {
        let command = Command::parse(&json!({
            "action": "create",
            "id": "feed",
            "url": "ws://localhost:9001",
            "protocols": ["v2"],
            "pingInterval": 5000
        }))
        .expect("parse");

        match command {
            Command::Create { id, endpoint } => {
                assert_eq!(id, "feed");
                assert_eq!(endpoint.url, "ws://localhost:9001");
                assert_eq!(endpoint.protocols, vec!["v2".to_string()]);
                assert_eq!(endpoint.ping_interval_ms, 5000);
            }
            other => panic!("expected create, got {}", other.action()),
        }
    }

    #[test]
    fn test_parse_create_missing_id() {
        let err = Command::parse(&json!({"action": "create", "url": "ws://x"})).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_parse_create_missing_url() {
        let err = Command::parse(&json!({"action": "create", "id": "feed"})).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_parse_close_and_delete_require_id() {
        assert!(Command::parse(&json!({"action": "close"})).is_err());
        assert!(Command::parse(&json!({"action": "delete", "id": ""})).is_err());

        let command = Command::parse(&json!({"action": "close", "id": "feed"})).expect("parse");
        assert_eq!(command.action(), "close");
    }

    #[test]
    fn test_parse_close_all_and_list() {
        assert_eq!(
            Command::parse(&json!({"action": "closeAll"})).unwrap().action(),
            "closeAll"
        );
        assert_eq!(
            Command::parse(&json!({"action": "list"})).unwrap().action(),
            "list"
        );
    }

    #[test]
    fn test_parse_unknown_action_lists() {
        assert_eq!(
            Command::parse(&json!({"action": "reboot"})).unwrap().action(),
            "list"
        );
        assert_eq!(Command::parse(&json!({})).unwrap().action(), "list");
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_emits_snapshot() {
        let (router, _pool, mut events) = test_router();

        router.handle(json!({"action": "list"})).await.expect("list");

        let event = next_event(&mut events).await;
        assert_eq!(event.name, CONTROL_CHANNEL);
        match event.kind {
            EventKind::List { snapshot } => assert!(snapshot.is_empty()),
            other => panic!("expected list, got {}", other.topic()),
        }
    }

    #[tokio::test]
    async fn test_create_acks_and_opens() {
        let port = spawn_echo_server().await;
        let (router, pool, mut events) = test_router();

        router
            .handle(json!({
                "action": "create",
                "id": "feed",
                "url": format!("ws://127.0.0.1:{port}")
            }))
            .await
            .expect("create");

        let ack = next_event(&mut events).await;
        assert_eq!(ack.name, CONTROL_CHANNEL);
        match ack.kind {
            EventKind::Ack { action, id } => {
                assert_eq!(action, "create");
                assert_eq!(id.as_deref(), Some("feed"));
            }
            other => panic!("expected ack, got {}", other.topic()),
        }

        // The connection itself opens after the ack.
        let open = next_event(&mut events).await;
        assert_eq!(open.name, "feed");
        assert_eq!(open.kind.topic(), "open");

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_create_emits_no_ack() {
        let (router, _pool, mut events) = test_router();

        let err = router
            .handle(json!({"action": "create", "id": "feed"}))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_unknown_still_acks() {
        // The registry treats close/delete on unknown names leniently;
        // the ack mirrors that.
        let (router, _pool, mut events) = test_router();

        router
            .handle(json!({"action": "close", "id": "ghost"}))
            .await
            .expect("close");

        let ack = next_event(&mut events).await;
        match ack.kind {
            EventKind::Ack { action, id } => {
                assert_eq!(action, "close");
                assert_eq!(id.as_deref(), Some("ghost"));
            }
            other => panic!("expected ack, got {}", other.topic()),
        }
    }

    #[tokio::test]
    async fn test_dispatch_empty_destination() {
        let (router, _pool, _events) = test_router();
        let err = router.dispatch("", json!("hello")).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_data_destination() {
        let (router, _pool, _events) = test_router();
        let err = router.dispatch("ghost", json!("hello")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_data_roundtrip() {
        let port = spawn_echo_server().await;
        let (router, pool, mut events) = test_router();

        router
            .dispatch(
                CONTROL_CHANNEL,
                json!({
                    "action": "create",
                    "id": "feed",
                    "url": format!("ws://127.0.0.1:{port}")
                }),
            )
            .await
            .expect("create");

        // Skip the ack, wait for the open.
        loop {
            let event = next_event(&mut events).await;
            if event.name == "feed" && event.kind.topic() == "open" {
                break;
            }
        }
        assert_eq!(pool.state("feed"), Some(ConnState::Open));

        // A plain string travels as a text frame and echoes back.
        router
            .dispatch("feed", json!("hello"))
            .await
            .expect("send");

        loop {
            let event = next_event(&mut events).await;
            if event.name == "feed" && event.kind.topic() == "message" {
                match event.kind {
                    EventKind::Message {
                        payload: Payload::Text(text),
                    } => assert_eq!(text, "hello"),
                    other => panic!("expected text message, got {other:?}"),
                }
                break;
            }
        }

        pool.shutdown().await;
    }
}
