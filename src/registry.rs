//! The connection registry.
//!
//! [`Pool`] owns the addressable map of named supervisors and is the
//! only way to reach them: create, close, delete, send, broadcast, and
//! snapshot all funnel through it. The map is the single shared mutable
//! structure in the crate; each entry's transport is owned by exactly
//! one supervisor task at a time, enforced by create-replaces-never-
//! merges semantics.
//!
//! # Example
//!
//! ```ignore
//! use sockpool::{ChannelSink, EndpointConfig, Payload, Pool, PoolOptions};
//!
//! let (sink, mut events) = ChannelSink::new();
//! let pool = Pool::builder(PoolOptions::new()).sink(sink).build()?;
//!
//! pool.create("feed", EndpointConfig::new("wss://feed.example.com/ws")).await?;
//! pool.send("feed", Payload::from("ping"))?;
//! pool.shutdown().await;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::{EndpointConfig, PoolOptions};
use crate::decode::{DecodePolicy, opportunistic_json};
use crate::dialer::{Dialer, TungsteniteDialer};
use crate::error::{Error, Result};
use crate::event::{ConnState, EventSink, Payload, PoolSnapshot};
use crate::supervisor::{ConnectionSupervisor, EntryHandle};

// ============================================================================
// Pool
// ============================================================================

/// The named connection pool.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

struct PoolInner {
    /// The registry map. The only shared mutable structure.
    entries: RwLock<FxHashMap<String, EntryHandle>>,
    /// Transport opener shared by all supervisors.
    dialer: Arc<dyn Dialer>,
    /// Event consumer shared by all supervisors.
    sink: Arc<dyn EventSink>,
    /// Reconnect delay policy shared by all supervisors.
    backoff: BackoffPolicy,
    /// Text frame decode policy shared by all supervisors.
    decode: DecodePolicy,
    /// Declarative startup connections, drained by `start`.
    startup: Mutex<FxHashMap<String, EndpointConfig>>,
}

// ============================================================================
// Pool - Construction
// ============================================================================

impl Pool {
    /// Creates a pool with the default dialer and decode policy.
    #[must_use]
    pub fn new(options: PoolOptions, sink: impl EventSink + 'static) -> Self {
        Self::from_parts(
            options,
            Arc::new(sink),
            Arc::new(TungsteniteDialer),
            opportunistic_json(),
        )
    }

    /// Returns a builder for customizing the dialer or decode policy.
    #[must_use]
    pub fn builder(options: PoolOptions) -> PoolBuilder {
        PoolBuilder {
            options,
            sink: None,
            dialer: Arc::new(TungsteniteDialer),
            decode: opportunistic_json(),
        }
    }

    fn from_parts(
        options: PoolOptions,
        sink: Arc<dyn EventSink>,
        dialer: Arc<dyn Dialer>,
        decode: DecodePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: RwLock::new(FxHashMap::default()),
                dialer,
                sink,
                backoff: options.backoff(),
                decode,
                startup: Mutex::new(options.connections),
            }),
        }
    }

    /// Opens every declarative startup connection.
    ///
    /// Each entry is opened exactly as if a create command had been
    /// received for it; malformed entries are logged and skipped.
    pub async fn start(&self) {
        let startup = mem::take(&mut *self.inner.startup.lock());

        for (name, endpoint) in startup {
            if let Err(e) = self.create(name.clone(), endpoint).await {
                warn!(name = %name, error = %e, "skipping malformed startup connection");
            }
        }
    }
}

// ============================================================================
// Pool - Registry Operations
// ============================================================================

impl Pool {
    /// Creates (or replaces) the named connection and starts dialing.
    ///
    /// An existing entry under the same name is torn down first
    /// (transport closed, pending reconnect and heartbeat dead) before
    /// the new entry is installed, so no two live transports ever share
    /// a name. The implicit close emits no events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is empty or the
    /// endpoint fails validation.
    pub async fn create(&self, name: impl Into<String>, endpoint: EndpointConfig) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_argument("connection name is empty"));
        }
        endpoint.validate()?;

        let old = self.inner.entries.write().remove(&name);
        if let Some(handle) = old {
            debug!(name = %name, "replacing existing entry");
            handle.teardown(true).await;
        }

        let handle = ConnectionSupervisor::spawn(
            name.clone(),
            endpoint,
            Arc::clone(&self.inner.dialer),
            Arc::clone(&self.inner.sink),
            self.inner.backoff,
            Arc::clone(&self.inner.decode),
        );

        // A concurrent create for the same name may have won the race;
        // last writer wins and the loser is torn down quietly.
        let displaced = self.inner.entries.write().insert(name, handle);
        if let Some(displaced) = displaced {
            displaced.teardown(true).await;
        }

        Ok(())
    }

    /// Closes the named connection without removing it.
    ///
    /// Marks the entry manually closed (no further reconnects), cancels
    /// pending work, and requests a normal transport closure. The entry
    /// stays addressable for a later explicit [`create`](Self::create).
    ///
    /// An unknown name is a no-op.
    pub fn close(&self, name: &str) -> Result<()> {
        match self.inner.entries.read().get(name) {
            Some(handle) => {
                handle.request_close();
                Ok(())
            }
            None => {
                debug!(name, "close for unknown connection ignored");
                Ok(())
            }
        }
    }

    /// Closes the named connection and removes it from the registry.
    ///
    /// An unknown name is a no-op.
    pub fn delete(&self, name: &str) -> Result<()> {
        let removed = self.inner.entries.write().remove(name);
        match removed {
            Some(handle) => {
                handle.request_close();
                // Dropping the handle detaches the task; it finishes the
                // close on its own and emits the close event.
                Ok(())
            }
            None => {
                debug!(name, "delete for unknown connection ignored");
                Ok(())
            }
        }
    }

    /// Closes every connection. Removes none.
    pub fn close_all(&self) {
        let entries = self.inner.entries.read();
        for handle in entries.values() {
            handle.request_close();
        }
    }

    /// Sends a payload through the named connection.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the name is unknown
    /// - [`Error::NotConnected`] if the connection is not open; the
    ///   frame is dropped, the caller is not blocked or retried
    pub fn send(&self, name: &str, payload: impl Into<Payload>) -> Result<()> {
        let entries = self.inner.entries.read();
        let handle = entries.get(name).ok_or_else(|| Error::not_found(name))?;

        handle.send(payload.into()).inspect_err(|e| {
            warn!(name, error = %e, "dropping payload");
        })
    }

    /// Sends a payload to every open connection, best-effort.
    ///
    /// Returns the number of connections the payload was forwarded to;
    /// per-entry failures do not abort the rest.
    pub fn broadcast(&self, payload: impl Into<Payload>) -> usize {
        let payload = payload.into();
        let entries = self.inner.entries.read();

        let mut delivered = 0;
        for handle in entries.values() {
            if handle.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }

        delivered
    }

    /// Returns a point-in-time snapshot of the registry.
    ///
    /// The snapshot is taken under the registry lock, so a concurrent
    /// create or delete is either fully visible or not at all.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.snapshot()))
            .collect()
    }
}

// ============================================================================
// Pool - Introspection
// ============================================================================

impl Pool {
    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Returns `true` if the name is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.entries.read().contains_key(name)
    }

    /// Returns the named connection's state, if registered.
    #[inline]
    #[must_use]
    pub fn state(&self, name: &str) -> Option<ConnState> {
        self.inner.entries.read().get(name).map(EntryHandle::state)
    }

    /// Returns the pool's event sink.
    pub(crate) fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.inner.sink)
    }
}

// ============================================================================
// Pool - Lifecycle
// ============================================================================

impl Pool {
    /// Tears down every supervisor and empties the registry.
    ///
    /// Quiet: shutdown emits no close events. Intended for host exit;
    /// no connection state survives it.
    pub async fn shutdown(&self) {
        info!("pool shutting down");

        let entries: Vec<_> = {
            let mut map = self.inner.entries.write();
            map.drain().collect()
        };

        for (name, handle) in entries {
            debug!(name = %name, "closing connection during shutdown");
            handle.teardown(true).await;
        }

        info!("pool shutdown complete");
    }
}

// ============================================================================
// PoolBuilder
// ============================================================================

/// Builder for [`Pool`].
pub struct PoolBuilder {
    options: PoolOptions,
    sink: Option<Arc<dyn EventSink>>,
    dialer: Arc<dyn Dialer>,
    decode: DecodePolicy,
}

impl PoolBuilder {
    /// Sets the event sink. Required.
    #[must_use]
    pub fn sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Replaces the transport opener.
    #[must_use]
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    /// Replaces the text frame decode policy.
    #[must_use]
    pub fn decode(mut self, decode: DecodePolicy) -> Self {
        self.decode = decode;
        self
    }

    /// Builds the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no sink was provided.
    pub fn build(self) -> Result<Pool> {
        let sink = self
            .sink
            .ok_or_else(|| Error::invalid_argument("pool requires an event sink"))?;

        Ok(Pool::from_parts(self.options, sink, self.dialer, self.decode))
    }
}

// ============================================================================
// Tests
// ============================================================================
