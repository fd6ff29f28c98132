//! In-process [`Backing`] with synchronous change notification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Backing, BackingCallback, Dynamic};
use crate::error::{DistconfError, Result};

#[derive(Default)]
struct State {
    values: HashMap<String, Vec<u8>>,
    watches: HashMap<String, Vec<BackingCallback>>,
}

/// Writable, watchable map. Callbacks fire on the writer's task, in
/// registration order, before `write` returns.
#[derive(Default)]
pub struct MemoryBacking {
    state: Mutex<State>,
    closed: AtomicBool,
}

impl MemoryBacking {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates values without firing watches.
    #[must_use]
    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let backing = Self::new();
        {
            let mut state = backing.state.lock();
            for (k, v) in values {
                state.values.insert(k.into(), v.into());
            }
        }
        backing
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DistconfError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Backing for MemoryBacking {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.state.lock().values.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Option<&[u8]>) -> Result<()> {
        self.check_open()?;
        let callbacks = {
            let mut state = self.state.lock();
            match value {
                Some(v) => {
                    state.values.insert(key.to_string(), v.to_vec());
                }
                None => {
                    state.values.remove(key);
                }
            }
            state.watches.get(key).cloned().unwrap_or_default()
        };
        for cb in callbacks {
            cb(key, value);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.state.lock().watches.clear();
        Ok(())
    }

    fn as_dynamic(&self) -> Option<&dyn Dynamic> {
        Some(self)
    }
}

#[async_trait]
impl Dynamic for MemoryBacking {
    async fn watch(&self, key: &str, callback: BackingCallback) -> Result<()> {
        self.check_open()?;
        self.state
            .lock()
            .watches
            .entry(key.to_string())
            .or_default()
            .push(callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_key_is_absent() {
        let m = MemoryBacking::new();
        assert_eq!(m.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_then_get_and_delete() {
        let m = MemoryBacking::new();
        m.write("k", Some(b"v")).await.unwrap();
        assert_eq!(m.get("k").await.unwrap(), Some(b"v".to_vec()));
        m.write("k", None).await.unwrap();
        assert_eq!(m.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn watch_fires_once_per_write() {
        let m = MemoryBacking::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        m.watch(
            "k",
            Arc::new(move |key: &str, v: Option<&[u8]>| {
                sink.lock().push((key.to_string(), v.map(<[u8]>::to_vec)));
            }),
        )
        .await
        .unwrap();

        m.write("k", Some(b"newval")).await.unwrap();
        m.write("other", Some(b"x")).await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("k".to_string(), Some(b"newval".to_vec()))]
        );
    }

    #[tokio::test]
    async fn closed_rejects_everything() {
        let m = MemoryBacking::with_values([("k", "v")]);
        m.close().await.unwrap();
        m.close().await.unwrap();
        assert!(matches!(m.get("k").await, Err(DistconfError::Closed)));
        assert!(matches!(
            m.watch("k", Arc::new(|_: &str, _: Option<&[u8]>| {})).await,
            Err(DistconfError::Closed)
        ));
    }
}
