//! Read-only file [`Backing`] with SHA256 change detection.
//!
//! [`FileBacking`] reads a YAML, JSON or TOML document (chosen by file
//! extension, each gated by its feature flag) and flattens nested tables
//! into dotted keys, so `sf: { metrics: { report_interval: 2s } }` serves
//! `sf.metrics.report_interval`. Scalars are stored as their text form;
//! nulls and lists are skipped.
//!
//! With a poll interval the backing spawns a refresh loop that hashes the
//! file, re-parses it on change, and fires watches for keys whose value
//! differs from the previous snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{Backing, BackingCallback, Dynamic};
use crate::error::{DistconfError, Result};
use crate::logger::{default_logger, keys, Logger};

type Values = HashMap<String, Vec<u8>>;

#[derive(Deserialize)]
#[serde(untagged)]
enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<Node>),
    Table(BTreeMap<String, Node>),
}

fn flatten(prefix: &str, table: BTreeMap<String, Node>, out: &mut Values) {
    for (k, node) in table {
        let key = if prefix.is_empty() {
            k
        } else {
            format!("{prefix}.{k}")
        };
        let text = match node {
            Node::Table(inner) => {
                flatten(&key, inner, out);
                continue;
            }
            // No scalar form; the key reads as unset.
            Node::Null | Node::Seq(_) => continue,
            Node::Bool(b) => b.to_string(),
            Node::Int(i) => i.to_string(),
            Node::Float(f) => f.to_string(),
            Node::Str(s) => s,
        };
        out.insert(key, text.into_bytes());
    }
}

/// Parse a flat or nested key document based on file extension.
pub fn parse_values_str(ext: &str, content: &str, path_display: &str) -> Result<Values> {
    let table: BTreeMap<String, Node> = match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| DistconfError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        })?,

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| DistconfError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        })?,

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| DistconfError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        })?,

        other => return Err(DistconfError::UnsupportedFormat(other.to_string())),
    };

    let mut values = Values::new();
    flatten("", table, &mut values);
    Ok(values)
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

struct Snapshot {
    values: Values,
    hash: String,
}

struct Shared {
    path: PathBuf,
    ext: String,
    snapshot: RwLock<Snapshot>,
    watches: Mutex<HashMap<String, Vec<BackingCallback>>>,
    logger: Arc<dyn Logger>,
}

impl Shared {
    async fn read_content(&self) -> Result<String> {
        read_content(&self.path).await
    }

    async fn reload_if_changed(&self) -> Result<bool> {
        let content = self.read_content().await?;
        let hash = sha256_hex(content.as_bytes());
        if self.snapshot.read().hash == hash {
            return Ok(false);
        }

        let values = parse_values_str(&self.ext, &content, &self.path.display().to_string())?;
        let changed: Vec<(String, Option<Vec<u8>>)> = {
            let mut snap = self.snapshot.write();
            let mut changed = Vec::new();
            for (k, v) in &values {
                if snap.values.get(k) != Some(v) {
                    changed.push((k.clone(), Some(v.clone())));
                }
            }
            for k in snap.values.keys() {
                if !values.contains_key(k) {
                    changed.push((k.clone(), None));
                }
            }
            snap.values = values;
            snap.hash = hash;
            changed
        };

        for (key, value) in changed {
            let callbacks = self.watches.lock().get(&key).cloned().unwrap_or_default();
            for cb in callbacks {
                cb(&key, value.as_deref());
            }
        }
        Ok(true)
    }
}

async fn read_content(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DistconfError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            DistconfError::Io(e)
        }
    })
}

pub struct FileBacking {
    shared: Arc<Shared>,
    shutdown: tokio::sync::watch::Sender<bool>,
    poller: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,
}

impl FileBacking {
    pub async fn open(path: impl Into<PathBuf>, poll_interval: Option<Duration>) -> Result<Self> {
        Self::open_with_logger(path, poll_interval, default_logger()).await
    }

    pub async fn open_with_logger(
        path: impl Into<PathBuf>,
        poll_interval: Option<Duration>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self> {
        let path = path.into();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let content = read_content(&path).await?;
        let values = parse_values_str(&ext, &content, &path.display().to_string())?;

        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Snapshot {
                values,
                hash: sha256_hex(content.as_bytes()),
            }),
            path,
            ext,
            watches: Mutex::new(HashMap::new()),
            logger,
        });

        let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
        let poller = poll_interval.map(|interval| {
            let shared = shared.clone();
            tokio::spawn(async move { refresh_loop(shared, interval, shutdown_rx).await })
        });

        tracing::debug!(path = %shared.path.display(), "file backing opened");
        Ok(Self {
            shared,
            shutdown,
            poller: tokio::sync::Mutex::new(poller),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Re-reads the file now instead of waiting for the next poll tick.
    pub async fn refresh(&self) -> Result<bool> {
        self.check_open()?;
        self.shared.reload_if_changed().await
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DistconfError::Closed);
        }
        Ok(())
    }
}

async fn refresh_loop(
    shared: Arc<Shared>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(interval);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!(path = %shared.path.display(), "file poll loop shutting down");
                return;
            }
        }

        match shared.reload_if_changed().await {
            Ok(true) => tracing::debug!(path = %shared.path.display(), "config file reloaded"),
            Ok(false) => {}
            Err(e) => shared.logger.log(&[
                (keys::MSG, &"config file reload failed, keeping current values"),
                (keys::BACKING, &"file"),
                (keys::ERR, &e),
            ]),
        }
    }
}

#[async_trait]
impl Backing for FileBacking {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.shared.snapshot.read().values.get(key).cloned())
    }

    async fn write(&self, _key: &str, _value: Option<&[u8]>) -> Result<()> {
        Err(DistconfError::ReadOnly { backing: "file" })
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.send_replace(true);
        self.shared.watches.lock().clear();
        if let Some(handle) = self.poller.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "file poll task failed");
            }
        }
        Ok(())
    }

    fn as_dynamic(&self) -> Option<&dyn Dynamic> {
        Some(self)
    }
}

#[async_trait]
impl Dynamic for FileBacking {
    async fn watch(&self, key: &str, callback: BackingCallback) -> Result<()> {
        self.check_open()?;
        self.shared
            .watches
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_nested_tables_flatten() {
        let values = parse_values_str(
            "yaml",
            "sf:\n  metrics:\n    report_interval: 2s\n    disableCompression: true\nport: 80\n",
            "test.yaml",
        )
        .unwrap();
        assert_eq!(
            values.get("sf.metrics.report_interval").unwrap(),
            &b"2s".to_vec()
        );
        assert_eq!(
            values.get("sf.metrics.disableCompression").unwrap(),
            &b"true".to_vec()
        );
        assert_eq!(values.get("port").unwrap(), &b"80".to_vec());
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_dotted_keys_pass_through() {
        let values =
            parse_values_str("json", r#"{"a.b": "x", "n": 1.5}"#, "test.json").unwrap();
        assert_eq!(values.get("a.b").unwrap(), &b"x".to_vec());
        assert_eq!(values.get("n").unwrap(), &b"1.5".to_vec());
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_nulls_and_lists_are_skipped() {
        let values = parse_values_str(
            "yaml",
            "a: ~\nb: [1, 2]\nc:\n  d: null\n  e: ok\n",
            "test.yaml",
        )
        .unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("c.e").unwrap(), &b"ok".to_vec());
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_null_does_not_fail_the_document() {
        let values = parse_values_str("json", r#"{"a": null, "b": "x", "c": [{"d": 1}]}"#, "t.json")
            .unwrap();
        assert_eq!(values.get("a"), None);
        assert_eq!(values.get("b").unwrap(), &b"x".to_vec());
    }

    #[test]
    fn unsupported_format_returns_error() {
        let result = parse_values_str("xml", "<a/>", "test.xml");
        assert!(matches!(result, Err(DistconfError::UnsupportedFormat(_))));
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }
}
