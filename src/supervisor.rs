//! Per-connection lifecycle supervision.
//!
//! Each registry entry is driven by one [`ConnectionSupervisor`] task
//! that owns the transport for its name: it dials, pumps frames, sends
//! heartbeat pings, and decides whether to reconnect after a closure.
//!
//! # State Machine
//!
//! ```text
//! Connecting ──open──► Open ──close──► Closed
//!     ▲                 │                │
//!     │              (Closing)           │ manual_close == false
//!     └────────── backoff delay ◄────────┘
//! ```
//!
//! A caller-initiated close sets `manual_close` and permanently stops
//! the cycle; only a fresh `create` (which replaces the entry and its
//! supervisor) can revive the name.
//!
//! # Cancellation
//!
//! The reconnect delay and the heartbeat interval are both owned by the
//! supervisor's select loops, so a close command interrupts them
//! immediately: no ping fires and no reconnect revives the entry after
//! a manual close.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, interval_at, sleep_until};
use tokio_tungstenite::tungstenite::Bytes;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::config::EndpointConfig;
use crate::decode::DecodePolicy;
use crate::dialer::{Dialer, WsStream};
use crate::error::{Error, Result};
use crate::event::{ConnState, EntrySnapshot, EventKind, EventSink, Payload, PoolEvent};

// ============================================================================
// Constants
// ============================================================================

/// How long a teardown waits for the supervisor task before aborting it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code reported when the transport dropped without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when the peer sent a close frame with no status.
const NO_STATUS_RECEIVED: u16 = 1005;

// ============================================================================
// EntryShared
// ============================================================================

/// State shared between a supervisor task and its registry handle.
pub(crate) struct EntryShared {
    /// Entry name, immutable for the entry's lifetime.
    pub(crate) name: String,
    /// Dial configuration, immutable for the entry's lifetime.
    pub(crate) config: EndpointConfig,
    /// Current transport readiness.
    state: Mutex<ConnState>,
    /// Reconnect attempts since the last successful open.
    reconnect_attempts: AtomicU32,
    /// Caller requested closure; suppresses reconnection.
    manual_close: AtomicBool,
    /// Suppress event emission (create-replace and pool shutdown).
    silent: AtomicBool,
}

impl EntryShared {
    fn new(name: String, config: EndpointConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(ConnState::Connecting),
            reconnect_attempts: AtomicU32::new(0),
            manual_close: AtomicBool::new(false),
            silent: AtomicBool::new(false),
        }
    }

    /// Returns the current connection state.
    #[inline]
    pub(crate) fn state(&self) -> ConnState {
        *self.state.lock()
    }

    #[inline]
    fn set_state(&self, state: ConnState) {
        *self.state.lock() = state;
    }

    /// Returns the reconnect attempt counter.
    #[inline]
    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    #[inline]
    fn manual_close(&self) -> bool {
        self.manual_close.load(Ordering::SeqCst)
    }

    #[inline]
    fn request_manual_close(&self) {
        self.manual_close.store(true, Ordering::SeqCst);
    }

    #[inline]
    fn is_silent(&self) -> bool {
        self.silent.load(Ordering::SeqCst)
    }

    #[inline]
    fn silence(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// EntryCommand
// ============================================================================

/// Commands delivered to a supervisor task.
enum EntryCommand {
    /// Transmit a payload over the open transport.
    Send(Payload),
    /// Close the transport and stop reconnecting.
    Close,
}

// ============================================================================
// EntryHandle
// ============================================================================

/// Registry-side handle to one supervisor.
///
/// Owned exclusively by the registry map; dropping the handle closes the
/// command channel, which terminates the supervisor task.
pub(crate) struct EntryHandle {
    shared: Arc<EntryShared>,
    command_tx: mpsc::UnboundedSender<EntryCommand>,
    task: JoinHandle<()>,
}

impl EntryHandle {
    /// Returns the current connection state.
    #[inline]
    pub(crate) fn state(&self) -> ConnState {
        self.shared.state()
    }

    /// Forwards a payload to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] while the transport is not open;
    /// the frame is dropped, never queued.
    pub(crate) fn send(&self, payload: Payload) -> Result<()> {
        if self.shared.state() != ConnState::Open {
            return Err(Error::not_connected(self.shared.name.clone()));
        }

        self.command_tx
            .send(EntryCommand::Send(payload))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Requests a manual close. Idempotent.
    ///
    /// The entry stays addressable; only a fresh create resumes dialing.
    pub(crate) fn request_close(&self) {
        self.shared.request_manual_close();
        let _ = self.command_tx.send(EntryCommand::Close);
    }

    /// Closes and waits for the supervisor task to finish.
    ///
    /// With `silent` set, the supervisor emits no further events; used
    /// for create-replace and pool shutdown where the implicit close
    /// must not surface.
    pub(crate) async fn teardown(self, silent: bool) {
        if silent {
            self.shared.silence();
        }
        self.shared.request_manual_close();
        let _ = self.command_tx.send(EntryCommand::Close);

        let abort = self.task.abort_handle();
        if tokio::time::timeout(TEARDOWN_TIMEOUT, self.task)
            .await
            .is_err()
        {
            abort.abort();
            warn!(name = %self.shared.name, "supervisor did not stop in time, aborted");
        }
    }

    /// Returns a point-in-time view of the entry.
    pub(crate) fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            url: self.shared.config.url.clone(),
            state: self.shared.state(),
            reconnect_attempts: self.shared.reconnect_attempts(),
            heartbeat_interval_ms: self.shared.config.ping_interval_ms,
        }
    }
}

// ============================================================================
// CloseInfo
// ============================================================================

/// Why the open transport ended.
struct CloseInfo {
    code: u16,
    reason: String,
}

impl CloseInfo {
    fn abnormal() -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        }
    }

    fn from_frame(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self {
                code: u16::from(frame.code),
                reason: frame.reason.to_string(),
            },
            None => Self {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
            },
        }
    }
}

// ============================================================================
// ConnectionSupervisor
// ============================================================================

/// Drives one named connection's dial/reconnect/heartbeat lifecycle.
pub(crate) struct ConnectionSupervisor {
    shared: Arc<EntryShared>,
    dialer: Arc<dyn Dialer>,
    sink: Arc<dyn EventSink>,
    backoff: BackoffPolicy,
    decode: DecodePolicy,
    command_rx: mpsc::UnboundedReceiver<EntryCommand>,
}

impl ConnectionSupervisor {
    /// Spawns a supervisor task for the entry and returns its handle.
    pub(crate) fn spawn(
        name: impl Into<String>,
        config: EndpointConfig,
        dialer: Arc<dyn Dialer>,
        sink: Arc<dyn EventSink>,
        backoff: BackoffPolicy,
        decode: DecodePolicy,
    ) -> EntryHandle {
        let shared = Arc::new(EntryShared::new(name.into(), config));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            shared: Arc::clone(&shared),
            dialer,
            sink,
            backoff,
            decode,
            command_rx,
        };

        let task = tokio::spawn(supervisor.run());

        EntryHandle {
            shared,
            command_tx,
            task,
        }
    }

    /// Main lifecycle loop: dial, drive, reconnect until manually closed.
    async fn run(mut self) {
        loop {
            if self.shared.manual_close() {
                break;
            }

            self.shared.set_state(ConnState::Connecting);
            debug!(name = %self.shared.name, url = %self.shared.config.url, "dialing");

            match self.dialer.dial(&self.shared.config).await {
                Ok(stream) => {
                    // A close issued while the dial was in flight wins:
                    // discard the fresh transport without an open event.
                    if self.shared.manual_close() {
                        drop(stream);
                        self.shared.set_state(ConnState::Closed);
                        break;
                    }

                    self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    self.shared.set_state(ConnState::Open);
                    self.emit(EventKind::Open {
                        url: self.shared.config.url.clone(),
                    })
                    .await;

                    let close = self.drive(stream).await;

                    self.shared.set_state(ConnState::Closed);
                    self.emit(EventKind::Closed {
                        code: close.code,
                        reason: close.reason,
                        url: self.shared.config.url.clone(),
                    })
                    .await;
                }
                Err(e) => {
                    // A dial failure follows the same error-then-close path
                    // as a dropped connection, so unreachable endpoints keep
                    // retrying instead of wedging the entry.
                    self.shared.set_state(ConnState::Closed);
                    self.emit(dial_error_event(&e)).await;
                    self.emit(EventKind::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                        url: self.shared.config.url.clone(),
                    })
                    .await;
                }
            }

            if self.shared.manual_close() {
                break;
            }

            if !self.wait_reconnect().await {
                break;
            }
        }

        self.shared.set_state(ConnState::Closed);
        debug!(name = %self.shared.name, "supervisor terminated");
    }

    /// Pumps the open transport until it closes.
    ///
    /// Heartbeat pings are an arm of this loop, so leaving it cancels
    /// them structurally.
    async fn drive(&mut self, stream: WsStream) -> CloseInfo {
        let (mut ws_write, mut ws_read) = stream.split();

        let mut heartbeat: Option<Interval> = self
            .shared
            .config
            .heartbeat_interval()
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                message = ws_read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let payload = match (self.decode)(text.as_str()) {
                            Some(value) => Payload::Json(value),
                            None => Payload::Text(text.as_str().to_string()),
                        };
                        self.emit(EventKind::Message { payload }).await;
                    }

                    Some(Ok(Message::Binary(bytes))) => {
                        self.emit(EventKind::Message {
                            payload: Payload::Binary(bytes.to_vec()),
                        })
                        .await;
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!(name = %self.shared.name, "close frame received");
                        return CloseInfo::from_frame(frame);
                    }

                    // Ping/Pong are handled by the protocol layer.
                    Some(Ok(_)) => {}

                    Some(Err(e)) => {
                        // The error is reported here; the caller emits the
                        // close that follows it.
                        self.emit(EventKind::error(format!("transport error: {e}"))).await;
                        return CloseInfo::abnormal();
                    }

                    None => return CloseInfo::abnormal(),
                },

                command = self.command_rx.recv() => match command {
                    Some(EntryCommand::Send(payload)) => {
                        match payload.to_message() {
                            Ok(message) => {
                                if let Err(e) = ws_write.send(message).await {
                                    self.emit(EventKind::error(format!("send failed: {e}"))).await;
                                }
                            }
                            Err(e) => {
                                warn!(name = %self.shared.name, error = %e, "unserializable payload dropped");
                            }
                        }
                    }

                    Some(EntryCommand::Close) | None => {
                        self.shared.set_state(ConnState::Closing);
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        let _ = ws_write.flush().await;
                        return CloseInfo {
                            code: 1000,
                            reason: String::from("closed by caller"),
                        };
                    }
                },

                _ = tick(&mut heartbeat), if heartbeat.is_some() => {
                    // Liveness detection is the transport's job; a failed
                    // ping is logged and swallowed.
                    if let Err(e) = ws_write.send(Message::Ping(Bytes::new())).await {
                        warn!(name = %self.shared.name, error = %e, "heartbeat ping failed");
                    }
                }
            }
        }
    }

    /// Sleeps out the backoff delay before the next dial.
    ///
    /// Returns `false` when a close interrupted the wait and the loop
    /// must stop. The attempt counter is read before incrementing, so
    /// the first failure schedules with attempt 0.
    async fn wait_reconnect(&mut self) -> bool {
        let attempt = self.shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.backoff.next_delay(attempt);
        debug!(
            name = %self.shared.name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,

                command = self.command_rx.recv() => match command {
                    Some(EntryCommand::Close) | None => return false,
                    Some(EntryCommand::Send(_)) => {
                        // The registry rejects sends while not open; a late
                        // racer is dropped here.
                        warn!(name = %self.shared.name, "dropping send while disconnected");
                    }
                },
            }
        }
    }

    /// Emits an event unless the entry has been silenced.
    async fn emit(&self, kind: EventKind) {
        if self.shared.is_silent() {
            return;
        }
        self.sink
            .emit(PoolEvent::new(self.shared.name.clone(), kind))
            .await;
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Awaits the next heartbeat tick; pending forever when disabled.
async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Builds the error event for a failed dial, carrying the full
/// rejection diagnostic when the handshake was refused.
fn dial_error_event(error: &Error) -> EventKind {
    match error {
        Error::Rejected {
            status,
            headers,
            body,
        } => EventKind::Error {
            message: error.to_string(),
            status: Some(*status),
            headers: Some(headers.clone()),
            body: Some(body.clone()),
        },
        other => EventKind::error(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    use crate::decode::opportunistic_json;
    use crate::event::ChannelSink;

    /// Dialer that always fails with a plain dial error.
    struct FailDialer;

    #[async_trait]
    impl Dialer for FailDialer {
        async fn dial(&self, _endpoint: &EndpointConfig) -> Result<WsStream> {
            Err(Error::dial("connection refused"))
        }
    }

    /// Dialer that always fails with an HTTP 403 rejection.
    struct RejectDialer;

    #[async_trait]
    impl Dialer for RejectDialer {
        async fn dial(&self, _endpoint: &EndpointConfig) -> Result<WsStream> {
            Err(Error::rejected(
                403,
                vec![("www-authenticate".into(), "Basic".into())],
                "forbidden",
            ))
        }
    }

    fn spawn_with(
        dialer: Arc<dyn Dialer>,
        backoff: BackoffPolicy,
    ) -> (EntryHandle, UnboundedReceiver<PoolEvent>) {
        let (sink, events) = ChannelSink::new();
        let handle = ConnectionSupervisor::spawn(
            "test",
            EndpointConfig::new("ws://127.0.0.1:1"),
            dialer,
            Arc::new(sink),
            backoff,
            opportunistic_json(),
        );
        (handle, events)
    }

    async fn next_event(events: &mut UnboundedReceiver<PoolEvent>) -> PoolEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }

    #[test]
    fn test_close_info_from_frame() {
        let info = CloseInfo::from_frame(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }));
        assert_eq!(info.code, 1000);
        assert_eq!(info.reason, "bye");
    }

    #[test]
    fn test_close_info_no_status() {
        let info = CloseInfo::from_frame(None);
        assert_eq!(info.code, NO_STATUS_RECEIVED);
        assert!(info.reason.is_empty());
    }

    #[test]
    fn test_close_info_abnormal() {
        assert_eq!(CloseInfo::abnormal().code, ABNORMAL_CLOSURE);
    }

    #[tokio::test]
    async fn test_dial_failure_emits_error_then_close_then_retries() {
        let backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(20));
        let (handle, mut events) = spawn_with(Arc::new(FailDialer), backoff);

        // First cycle.
        assert_eq!(next_event(&mut events).await.kind.topic(), "error");
        assert_eq!(next_event(&mut events).await.kind.topic(), "close");

        // Second cycle proves a reconnect was scheduled.
        assert_eq!(next_event(&mut events).await.kind.topic(), "error");
        assert_eq!(next_event(&mut events).await.kind.topic(), "close");

        assert!(handle.shared.reconnect_attempts() >= 1);
        handle.teardown(true).await;
    }

    #[tokio::test]
    async fn test_rejection_diagnostics_in_error_event() {
        let backoff = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(60));
        let (handle, mut events) = spawn_with(Arc::new(RejectDialer), backoff);

        let event = next_event(&mut events).await;
        match event.kind {
            EventKind::Error {
                status,
                headers,
                body,
                ..
            } => {
                assert_eq!(status, Some(403));
                assert_eq!(
                    headers.as_deref(),
                    Some(&[("www-authenticate".to_string(), "Basic".to_string())][..])
                );
                assert_eq!(body.as_deref(), Some("forbidden"));
            }
            other => panic!("expected error event, got {}", other.topic()),
        }

        assert_eq!(next_event(&mut events).await.kind.topic(), "close");
        handle.teardown(true).await;
    }

    #[tokio::test]
    async fn test_manual_close_interrupts_backoff() {
        // A long backoff: without cancellation the teardown would hang.
        let backoff = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(60));
        let (handle, mut events) = spawn_with(Arc::new(FailDialer), backoff);

        assert_eq!(next_event(&mut events).await.kind.topic(), "error");
        assert_eq!(next_event(&mut events).await.kind.topic(), "close");

        // Must return well before the 60s backoff elapses.
        timeout(Duration::from_secs(5), handle.teardown(false))
            .await
            .expect("teardown should interrupt the backoff sleep");

        // No reconnect cycle after the manual close.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_silent_teardown_emits_nothing() {
        let backoff = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(60));
        let (handle, mut events) = spawn_with(Arc::new(FailDialer), backoff);

        assert_eq!(next_event(&mut events).await.kind.topic(), "error");
        assert_eq!(next_event(&mut events).await.kind.topic(), "close");

        handle.teardown(true).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_while_not_open_fails() {
        let backoff = BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(60));
        let (handle, mut events) = spawn_with(Arc::new(FailDialer), backoff);

        assert_eq!(next_event(&mut events).await.kind.topic(), "error");

        let err = handle.send(Payload::Text("dropped".into())).unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));

        handle.teardown(true).await;
    }
}
