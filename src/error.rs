//! Unified error types for distconf.
//!
//! Defines [`DistconfError`], the single error enum shared by backings,
//! the coordination-service client, and the typed registry. Uses
//! `thiserror` for `Display` and `Error` derives. Transport failures
//! carry their underlying cause as a boxed source.

use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, DistconfError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DistconfError {
    #[error("Connection error: {source}")]
    Connection {
        #[source]
        source: BoxError,
    },

    #[error("Unable to establish initial connection: {source}")]
    Construction {
        #[source]
        source: BoxError,
    },

    #[error("Invalid {kind} value for key '{key}': {message}")]
    Parse {
        key: String,
        kind: &'static str,
        message: String,
    },

    #[error("Unable to register watch for key '{key}': {source}")]
    WatchRegistration {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Backing is reconnecting")]
    Disconnected,

    #[error("Timed out waiting for the backing to reconnect")]
    Timeout,

    #[error("Backing is closed")]
    Closed,

    #[error("Backing '{backing}' is read-only")]
    ReadOnly { backing: &'static str },

    #[error("Config file not found: {}", path.display())]
    ConfigFileNotFound { path: PathBuf },

    #[error("Config parse error in {path}:\n  {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    #[error("Unable to get hostname for default source: {source}")]
    Hostname {
        #[source]
        source: BoxError,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl DistconfError {
    pub fn connection(source: impl Into<BoxError>) -> Self {
        Self::Connection {
            source: source.into(),
        }
    }

    /// True when the failure came from the transport and a reconnect may fix it.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
