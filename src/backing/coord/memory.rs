//! In-process coordination service for tests and local development.
//!
//! [`MemoryCoordinator`] behaves like a single-node ZooKeeper ensemble as
//! far as [`CoordBacking`](super::CoordBacking) can tell: every
//! [`connect`](Connector::connect) opens a session with its own event
//! stream, watches are one-shot per session, and sessions can be expired
//! or made to fail on demand.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::conn::{ConnEvent, Connection, Connector, EventStream, NodeEventKind, SessionState};
use crate::error::{DistconfError, Result};

/// Returns `Some(message)` to fail the operation on the given key.
pub type ForcedError = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

struct Session {
    events: mpsc::UnboundedSender<ConnEvent>,
    watches: HashSet<String>,
}

#[derive(Default)]
struct World {
    data: HashMap<String, Vec<u8>>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
    connects: usize,
    fail_connects: bool,
    forced_error: Option<ForcedError>,
}

impl World {
    fn apply(&mut self, key: &str, value: Option<&[u8]>) {
        let existed = self.data.contains_key(key);
        let kind = match value {
            Some(v) => {
                self.data.insert(key.to_string(), v.to_vec());
                if existed {
                    NodeEventKind::Changed
                } else {
                    NodeEventKind::Created
                }
            }
            None if existed => {
                self.data.remove(key);
                NodeEventKind::Deleted
            }
            None => return,
        };

        for session in self.sessions.values_mut() {
            if session.watches.remove(key) {
                let _ = session.events.send(ConnEvent::Node {
                    key: key.to_string(),
                    kind,
                });
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    world: Arc<Mutex<World>>,
}

impl MemoryCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes as an external client would, firing watches of every session.
    pub fn write(&self, key: &str, value: Option<&[u8]>) {
        self.world.lock().apply(key, value);
    }

    #[must_use]
    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.world.lock().data.get(key).cloned()
    }

    /// Ends every live session with [`SessionState::Expired`]. Watches are lost.
    pub fn expire_sessions(&self) {
        let sessions: Vec<Session> = self.world.lock().sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            let _ = session
                .events
                .send(ConnEvent::Session(SessionState::Expired));
        }
    }

    pub fn set_forced_error(&self, check: Option<ForcedError>) {
        self.world.lock().forced_error = check;
    }

    pub fn fail_connects(&self, fail: bool) {
        self.world.lock().fail_connects = fail;
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.world.lock().connects
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.world.lock().sessions.len()
    }

    /// Whether any live session currently holds an armed watch on `key`.
    #[must_use]
    pub fn is_watched(&self, key: &str) -> bool {
        self.world
            .lock()
            .sessions
            .values()
            .any(|s| s.watches.contains(key))
    }
}

#[async_trait]
impl Connector for MemoryCoordinator {
    async fn connect(&self) -> Result<(Box<dyn Connection>, EventStream)> {
        let mut world = self.world.lock();
        world.connects += 1;
        if world.fail_connects {
            return Err(DistconfError::connection("connection refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ConnEvent::Session(SessionState::Connected));
        let id = world.next_session;
        world.next_session += 1;
        world.sessions.insert(
            id,
            Session {
                events: tx,
                watches: HashSet::new(),
            },
        );

        let conn = MemoryConnection {
            world: self.world.clone(),
            session: id,
        };
        Ok((Box::new(conn), rx))
    }
}

struct MemoryConnection {
    world: Arc<Mutex<World>>,
    session: u64,
}

impl MemoryConnection {
    fn check(&self, world: &World, key: &str) -> Result<()> {
        if !world.sessions.contains_key(&self.session) {
            return Err(DistconfError::connection("session expired"));
        }
        if let Some(msg) = world.forced_error.as_ref().and_then(|f| f(key)) {
            return Err(DistconfError::connection(msg));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let world = self.world.lock();
        self.check(&world, key)?;
        Ok(world.data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<&[u8]>) -> Result<()> {
        let mut world = self.world.lock();
        self.check(&world, key)?;
        world.apply(key, value);
        Ok(())
    }

    async fn watch(&self, key: &str) -> Result<()> {
        let mut world = self.world.lock();
        self.check(&world, key)?;
        if let Some(session) = world.sessions.get_mut(&self.session) {
            session.watches.insert(key.to_string());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.world.lock().sessions.remove(&self.session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_is_one_shot() {
        let server = MemoryCoordinator::new();
        let (conn, mut events) = server.connect().await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ConnEvent::Session(SessionState::Connected))
        );

        conn.watch("k").await.unwrap();
        server.write("k", Some(b"a"));
        server.write("k", Some(b"b"));
        assert_eq!(
            events.recv().await,
            Some(ConnEvent::Node {
                key: "k".into(),
                kind: NodeEventKind::Created
            })
        );
        assert!(events.try_recv().is_err());
        assert!(!server.is_watched("k"));
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_silent() {
        let server = MemoryCoordinator::new();
        let (conn, mut events) = server.connect().await.unwrap();
        let _ = events.recv().await;

        conn.watch("k").await.unwrap();
        conn.set("k", None).await.unwrap();
        assert!(events.try_recv().is_err());
        assert!(server.is_watched("k"));
    }

    #[tokio::test]
    async fn expired_session_fails_operations_and_ends_stream() {
        let server = MemoryCoordinator::new();
        let (conn, mut events) = server.connect().await.unwrap();
        let _ = events.recv().await;

        server.expire_sessions();
        assert_eq!(
            events.recv().await,
            Some(ConnEvent::Session(SessionState::Expired))
        );
        assert_eq!(events.recv().await, None);
        assert!(conn.get("k").await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn refused_connect() {
        let server = MemoryCoordinator::new();
        server.fail_connects(true);
        assert!(server.connect().await.is_err());
        assert_eq!(server.connect_count(), 1);
        assert_eq!(server.session_count(), 0);
    }
}
