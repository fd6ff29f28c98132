//! Command-line interface definitions using clap derive macros.
//!
//! Contains the top-level [`Cli`] parser, the [`Commands`] enum for
//! subcommands (get, watch), and their associated argument structs.
//! Every source flag has an environment variable equivalent for
//! container deployments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "distconf",
    version,
    about = "Inspect typed configuration values from env and config files",
    propagate_version = true,
    after_help = "\x1b[1mQuick start:\x1b[0m\n  \
        distconf get sf.metrics.report_interval -k duration -c app.yaml\n  \
        distconf watch sf.metrics.auth_token -c app.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the current value of a key
    Get(KeyArgs),

    /// Print a key's value and every later change until interrupted
    Watch(KeyArgs),
}

#[derive(Args)]
pub struct KeyArgs {
    /// Configuration key, e.g. sf.metrics.report_interval
    pub key: String,

    /// How to decode the value
    #[arg(short, long, default_value = "str")]
    pub kind: ValueKind,

    /// Value used when no backing has the key
    #[arg(short, long)]
    pub default: Option<String>,

    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args)]
pub struct SourceArgs {
    /// Config file with default values (.yaml, .json, .toml)
    #[arg(short, long, env = "DISTCONF_FILE")]
    pub config: Option<PathBuf>,

    /// Prefix of environment variables that override file values
    #[arg(long, env = "DISTCONF_ENV_PREFIX", default_value = "DISTCONF_")]
    pub env_prefix: String,

    /// Config file poll interval in seconds
    #[arg(long, env = "DISTCONF_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval: u64,

    // -- Logging --
    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: LogLevel,

    /// Force pretty (human-readable) log output
    #[arg(long)]
    pub pretty: bool,

    /// Force JSON log output (overrides TTY detection)
    #[arg(long, conflicts_with = "pretty")]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ValueKind {
    Str,
    Bool,
    Int,
    Float,
    Duration,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}
