//! distconf provides typed, watchable configuration values.
//!
//! Values come from a chain of pluggable backings, searched in order, so
//! environment overrides can sit in front of file defaults and a
//! coordination service (a ZooKeeper-class store). Remote changes flow back
//! into cached typed handles and out to user callbacks, and the
//! coordination client survives lost sessions by reconnecting and
//! re-arming every watch.
//!
//! # Architecture
//!
//! - [`backing`] -- The [`Backing`](backing::Backing) and
//!   [`Dynamic`](backing::Dynamic) traits plus memory, env, file, and
//!   coordination-service implementations.
//! - [`registry`] -- [`Distconf`](registry::Distconf), the typed registry,
//!   and its [`Handle`](registry::Handle) values.
//! - [`clientcfg`] -- Metrics reporting client settings loaded from the
//!   registry and kept current through watches.
//! - [`logger`] -- Key/value logger collaborator with a hot-swappable
//!   process-wide default.
//! - [`error`] -- Unified error type using `thiserror`.
//! - [`cli`], [`cmd`], [`logging`] -- The `distconf` binary.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

#![allow(clippy::missing_errors_doc)]

pub mod backing;
pub mod cli;
pub mod clientcfg;
pub mod cmd;
pub mod error;
pub mod logger;
pub mod logging;
pub mod registry;

pub use error::{DistconfError, Result};
pub use registry::Distconf;
