//! Coordination-service [`Backing`] with watch re-arm and reconnect.
//!
//! [`CoordBacking`] owns exactly one live [`Connection`] at a time and a
//! registry of key → callbacks. A background drain task consumes the
//! connection's [`EventStream`] for the lifetime of the backing:
//!
//! - a node event re-arms the one-shot remote watch for that key, reads the
//!   current value, and hands it to every callback of the key;
//! - a lost session (expired / disconnected / stream ended), or a transport
//!   error seen by any caller, makes the task reconnect through the
//!   [`Connector`] with exponential backoff, re-arm every registered key, and
//!   re-deliver current values before publishing [`ConnState::Connected`].
//!
//! The registry and the current connection share one lock. Only the drain
//! task replaces the connection; callers clone a snapshot under the lock and
//! issue remote calls without holding it.
//!
//! Writes and deliveries of one key are serialised by a per-key async lock,
//! so a value read before a write is never handed out after that write
//! returned. Every remote call made by the drain task is bounded by
//! `block_timeout`; a call that overruns counts as a lost connection.

pub mod conn;
pub mod memory;
pub mod settings;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{Backing, BackingCallback, Dynamic};
use crate::error::{DistconfError, Result};
use crate::logger::{default_logger, keys, Logger};
pub use conn::{ConnEvent, Connection, Connector, ConnectorFn, EventStream, NodeEventKind, SessionState};
pub use settings::{CoordSettings, DisconnectPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

struct Shared {
    conn: Arc<dyn Connection>,
    generation: u64,
    callbacks: HashMap<String, Vec<(u64, BackingCallback)>>,
    next_callback_id: u64,
}

struct Inner {
    connector: Box<dyn Connector>,
    settings: CoordSettings,
    logger: Arc<dyn Logger>,
    shared: Mutex<Shared>,
    state: watch::Sender<ConnState>,
    // Carries the generation of the connection that failed; stale nudges are ignored.
    nudge: mpsc::UnboundedSender<u64>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct CoordBacking {
    inner: Arc<Inner>,
    quit: Mutex<Option<watch::Sender<bool>>>,
    drain: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CoordBacking {
    /// Connects once; a failing connector is returned as
    /// [`DistconfError::Construction`] and no task is started.
    pub async fn new(connector: impl Connector + 'static, settings: CoordSettings) -> Result<Self> {
        Self::new_with_logger(connector, settings, default_logger()).await
    }

    pub async fn new_with_logger(
        connector: impl Connector + 'static,
        settings: CoordSettings,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let (conn, events) = connector
            .connect()
            .await
            .map_err(|e| DistconfError::Construction {
                source: Box::new(e),
            })?;

        let (state, _) = watch::channel(ConnState::Connected);
        let (nudge, nudges) = mpsc::unbounded_channel();
        let (quit, quit_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            connector: Box::new(connector),
            settings,
            logger,
            shared: Mutex::new(Shared {
                conn: Arc::from(conn),
                generation: 0,
                callbacks: HashMap::new(),
                next_callback_id: 0,
            }),
            state,
            nudge,
            key_locks: Mutex::new(HashMap::new()),
        });

        let drain = tokio::spawn(drain_loop(inner.clone(), events, nudges, quit_rx));
        tracing::debug!("coordination backing connected");

        Ok(Self {
            inner,
            quit: Mutex::new(Some(quit)),
            drain: tokio::sync::Mutex::new(Some(drain)),
        })
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        *self.inner.state.borrow()
    }

    /// Number of keys with at least one registered callback.
    #[must_use]
    pub fn watched_keys(&self) -> usize {
        self.inner.shared.lock().callbacks.len()
    }
}

impl Inner {
    fn current(&self) -> (Arc<dyn Connection>, u64) {
        let shared = self.shared.lock();
        (shared.conn.clone(), shared.generation)
    }

    /// Snapshot of the live connection, honouring the disconnect policy.
    async fn connection(&self) -> Result<(Arc<dyn Connection>, u64)> {
        loop {
            let state = *self.state.borrow();
            match state {
                ConnState::Connected => return Ok(self.current()),
                ConnState::Closed => return Err(DistconfError::Closed),
                ConnState::Connecting | ConnState::Disconnected => {
                    match self.settings.on_disconnect {
                        DisconnectPolicy::FailFast => return Err(DistconfError::Disconnected),
                        DisconnectPolicy::Block => self.wait_connected().await?,
                    }
                }
            }
        }
    }

    async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let outcome = tokio::time::timeout(
            self.settings.block_timeout(),
            rx.wait_for(|s| matches!(s, ConnState::Connected | ConnState::Closed)),
        )
        .await
        .map(|r| r.map(|s| *s));

        match outcome {
            Ok(Ok(ConnState::Connected)) => Ok(()),
            Ok(_) => Err(DistconfError::Closed),
            Err(_) => Err(DistconfError::Timeout),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Remote call from the drain task, cut off after `block_timeout`.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.settings.block_timeout(), call)
            .await
            .unwrap_or_else(|_| Err(DistconfError::connection("coordination call timed out")))
    }

    fn observe(&self, generation: u64, err: &DistconfError) {
        if err.is_connection() {
            let _ = self.nudge.send(generation);
        }
    }

    fn callbacks_for(&self, key: &str) -> Vec<BackingCallback> {
        self.shared
            .lock()
            .callbacks
            .get(key)
            .map(|cbs| cbs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    fn dispatch(&self, key: &str, value: Option<&[u8]>) {
        for cb in self.callbacks_for(key) {
            cb(key, value);
        }
    }

    fn log_rearm_failure(&self, key: &str, err: DistconfError) {
        let err = DistconfError::WatchRegistration {
            key: key.to_string(),
            source: Box::new(err),
        };
        self.logger.log(&[
            (keys::MSG, &"unable to re-arm watch"),
            (keys::BACKING, &"coord"),
            (keys::KEY, &key),
            (keys::ERR, &err),
        ]);
    }

    /// Re-arm, read, deliver. Returns true when the connection looks dead.
    async fn rearm_and_deliver(&self, conn: &Arc<dyn Connection>, key: &str) -> bool {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        if let Err(e) = self.bounded(conn.watch(key)).await {
            let lost = e.is_connection();
            self.log_rearm_failure(key, e);
            return lost;
        }
        match self.bounded(conn.get(key)).await {
            Ok(value) => {
                self.dispatch(key, value.as_deref());
                false
            }
            Err(e) => {
                let lost = e.is_connection();
                self.logger.log(&[
                    (keys::MSG, &"unable to read watched key"),
                    (keys::BACKING, &"coord"),
                    (keys::KEY, &key),
                    (keys::ERR, &e),
                ]);
                lost
            }
        }
    }

    async fn on_node_event(&self, key: &str) -> bool {
        if self.callbacks_for(key).is_empty() {
            return false;
        }
        let (conn, _) = self.current();
        self.rearm_and_deliver(&conn, key).await
    }

    async fn rearm_all(&self, conn: &Arc<dyn Connection>) {
        let watched: Vec<String> = self.shared.lock().callbacks.keys().cloned().collect();
        for key in watched {
            self.rearm_and_deliver(conn, &key).await;
        }
    }

    /// Replaces the connection. Returns `None` if shutdown was requested first.
    async fn reconnect(&self, quit: &mut watch::Receiver<bool>) -> Option<EventStream> {
        self.state.send_replace(ConnState::Disconnected);
        let mut backoff = self.settings.initial_backoff();

        loop {
            self.state.send_replace(ConnState::Connecting);
            let attempt = tokio::select! {
                r = self.connector.connect() => r,
                _ = quit.changed() => return None,
            };

            match attempt {
                Ok((conn, events)) => {
                    let conn: Arc<dyn Connection> = Arc::from(conn);
                    let (old, generation) = {
                        let mut shared = self.shared.lock();
                        shared.generation += 1;
                        (std::mem::replace(&mut shared.conn, conn.clone()), shared.generation)
                    };
                    if let Err(e) = self.bounded(old.close()).await {
                        tracing::debug!(error = %e, "closing stale connection failed");
                    }
                    tokio::select! {
                        () = self.rearm_all(&conn) => {}
                        _ = quit.changed() => return None,
                    }
                    self.state.send_replace(ConnState::Connected);
                    tracing::info!(generation, "coordination backing reconnected");
                    return Some(events);
                }
                Err(e) => {
                    tracing::warn!(error = %e, ?backoff, "reconnect failed");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = quit.changed() => return None,
            }
            backoff = (backoff * 2).min(self.settings.max_backoff());
        }
    }
}

async fn drain_loop(
    inner: Arc<Inner>,
    mut events: EventStream,
    mut nudges: mpsc::UnboundedReceiver<u64>,
    mut quit: watch::Receiver<bool>,
) {
    loop {
        let lost = tokio::select! {
            _ = quit.changed() => break,
            Some(generation) = nudges.recv() => generation == inner.shared.lock().generation,
            event = events.recv() => match event {
                Some(ConnEvent::Node { key, .. }) => tokio::select! {
                    lost = inner.on_node_event(&key) => lost,
                    _ = quit.changed() => break,
                },
                Some(ConnEvent::Session(SessionState::Connected)) => false,
                Some(ConnEvent::Session(state)) => {
                    tracing::debug!(?state, "coordination session lost");
                    true
                }
                None => {
                    tracing::debug!("coordination event stream ended");
                    true
                }
            },
        };

        if lost {
            match inner.reconnect(&mut quit).await {
                Some(next) => events = next,
                None => break,
            }
        }
    }
    tracing::debug!("coordination drain loop exiting");
}

#[async_trait]
impl Backing for CoordBacking {
    fn name(&self) -> &'static str {
        "coord"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let (conn, generation) = self.inner.connection().await?;
        conn.get(key)
            .await
            .inspect_err(|e| self.inner.observe(generation, e))
    }

    async fn write(&self, key: &str, value: Option<&[u8]>) -> Result<()> {
        let (conn, generation) = self.inner.connection().await?;
        let lock = self.inner.key_lock(key);
        let _guard = lock.lock().await;
        conn.set(key, value)
            .await
            .inspect_err(|e| self.inner.observe(generation, e))
    }

    async fn close(&self) -> Result<()> {
        let quit = self.quit.lock().take();
        if let Some(quit) = quit {
            let _ = quit.send(true);
        }
        let drain = self.drain.lock().await.take();
        if let Some(mut handle) = drain {
            match tokio::time::timeout(self.inner.settings.block_timeout(), &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "coordination drain task failed"),
                Err(_) => {
                    tracing::warn!("coordination drain task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if self.inner.state.send_replace(ConnState::Closed) == ConnState::Closed {
            return Ok(());
        }
        let conn = {
            let mut shared = self.inner.shared.lock();
            shared.callbacks.clear();
            shared.conn.clone()
        };
        match tokio::time::timeout(self.inner.settings.block_timeout(), conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "closing connection failed"),
            Err(_) => tracing::warn!("closing connection timed out"),
        }
        tracing::debug!("coordination backing closed");
        Ok(())
    }

    fn as_dynamic(&self) -> Option<&dyn Dynamic> {
        Some(self)
    }
}

#[async_trait]
impl Dynamic for CoordBacking {
    async fn watch(&self, key: &str, callback: BackingCallback) -> Result<()> {
        let (conn, generation) = self.inner.connection().await?;
        let id = {
            let mut shared = self.inner.shared.lock();
            let id = shared.next_callback_id;
            shared.next_callback_id += 1;
            shared
                .callbacks
                .entry(key.to_string())
                .or_default()
                .push((id, callback));
            id
        };

        if let Err(e) = conn.watch(key).await {
            self.inner.observe(generation, &e);
            let mut shared = self.inner.shared.lock();
            if let Some(cbs) = shared.callbacks.get_mut(key) {
                cbs.retain(|(cb_id, _)| *cb_id != id);
                if cbs.is_empty() {
                    shared.callbacks.remove(key);
                }
            }
            return Err(DistconfError::WatchRegistration {
                key: key.to_string(),
                source: Box::new(e),
            });
        }
        Ok(())
    }
}
