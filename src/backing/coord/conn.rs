//! Collaborator interfaces for a coordination-service session.
//!
//! A [`Connector`] opens a [`Connection`] together with an [`EventStream`]
//! on which the service delivers watch fires and session state changes.
//! Real clients and the in-memory test double both plug in here.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// A one-shot watch on `key` fired. The watch is consumed.
    Node { key: String, kind: NodeEventKind },
    Session(SessionState),
}

pub type EventStream = mpsc::UnboundedReceiver<ConnEvent>;

#[async_trait]
pub trait Connection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `None` deletes the node.
    async fn set(&self, key: &str, value: Option<&[u8]>) -> Result<()>;

    /// Arms a one-shot watch. Valid for keys that do not exist yet; fires on
    /// create, change or delete.
    async fn watch(&self, key: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn Connection>, EventStream)>;
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<(Box<dyn Connection>, EventStream)>> + Send>>;

/// Adapts a closure returning a connect future into a [`Connector`].
pub struct ConnectorFn<F>(pub F);

#[async_trait]
impl<F> Connector for ConnectorFn<F>
where
    F: Fn() -> ConnectFuture + Send + Sync,
{
    async fn connect(&self) -> Result<(Box<dyn Connection>, EventStream)> {
        (self.0)().await
    }
}
