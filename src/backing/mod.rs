//! Pluggable raw key/value stores behind the typed registry.
//!
//! Defines the [`Backing`] trait (get / write / close of raw bytes) and the
//! optional [`Dynamic`] capability for backings that can push remote
//! changes. Concrete implementations:
//!
//! - [`memory`] -- writable, watchable in-process map.
//! - [`env`] -- read-only process environment overrides.
//! - [`file`] -- read-only flat key file, polled for changes.
//! - [`coord`] -- coordination-service client with reconnect and watch re-arm.

pub mod coord;
pub mod env;
pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Invoked with the key and its new raw value (`None` when deleted).
pub type BackingCallback = Arc<dyn Fn(&str, Option<&[u8]>) + Send + Sync>;

// async_trait is required here because backings are chained as Arc<dyn Backing>
// and native async fn in traits does not support dyn dispatch.
#[async_trait]
pub trait Backing: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `Ok(None)` for a key that does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writing `None` deletes the key.
    async fn write(&self, key: &str, value: Option<&[u8]>) -> Result<()>;

    /// Safe to call more than once.
    async fn close(&self) -> Result<()>;

    fn as_dynamic(&self) -> Option<&dyn Dynamic> {
        None
    }
}

#[async_trait]
pub trait Dynamic: Send + Sync {
    /// Registers `callback` for every future change of `key`. The key does
    /// not need to exist yet.
    async fn watch(&self, key: &str, callback: BackingCallback) -> Result<()>;
}
