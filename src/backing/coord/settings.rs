//! Tuning knobs for the coordination backing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const fn default_initial_backoff() -> u64 {
    100
}

const fn default_max_backoff() -> u64 {
    10_000
}

const fn default_block_timeout() -> u64 {
    5000
}

// Floor for both backoff bounds; a zero backoff would spin on the connector.
const MIN_BACKOFF_MS: u64 = 1;

const fn at_least_min_backoff(ms: u64) -> u64 {
    if ms < MIN_BACKOFF_MS {
        MIN_BACKOFF_MS
    } else {
        ms
    }
}

/// What `get` / `write` / `watch` do while the backing is reconnecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    #[default]
    FailFast,
    Block,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CoordSettings {
    #[serde(default = "default_initial_backoff")]
    pub reconnect_initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub reconnect_max_backoff_ms: u64,

    #[serde(default)]
    pub on_disconnect: DisconnectPolicy,

    #[serde(default = "default_block_timeout")]
    pub block_timeout_ms: u64,
}

impl Default for CoordSettings {
    fn default() -> Self {
        Self {
            reconnect_initial_backoff_ms: default_initial_backoff(),
            reconnect_max_backoff_ms: default_max_backoff(),
            on_disconnect: DisconnectPolicy::default(),
            block_timeout_ms: default_block_timeout(),
        }
    }
}

impl CoordSettings {
    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(at_least_min_backoff(self.reconnect_initial_backoff_ms))
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(at_least_min_backoff(self.reconnect_max_backoff_ms))
    }

    #[must_use]
    pub const fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}
