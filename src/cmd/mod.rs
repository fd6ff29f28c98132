//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`get`] or [`watch`]. Both build the same backing
//! chain (environment overrides before the optional config file) via
//! [`build_registry`].

pub mod get;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use crate::backing::env::EnvBacking;
use crate::backing::file::FileBacking;
use crate::backing::Backing;
use crate::cli::{Cli, Commands, SourceArgs};
use crate::error::{DistconfError, Result};
use crate::logging;
use crate::registry::value::ConfigValue;
use crate::registry::Distconf;

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Get(args)) => get::execute(args).await,
        Some(Commands::Watch(args)) => watch::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  distconf v{version} - typed configuration values\n\n  \
         No command provided. To get started:\n\n    \
         distconf get <key> -c app.yaml             Print a value\n    \
         distconf watch <key> -c app.yaml           Follow a value as it changes\n    \
         distconf --help                            See all commands and options\n"
    );
}

pub async fn build_registry(args: &SourceArgs) -> Result<Distconf> {
    logging::init(
        &args.log_level,
        logging::resolve_format(args.pretty, args.json),
    );

    let mut chain: Vec<Arc<dyn Backing>> = vec![Arc::new(EnvBacking::new(&args.env_prefix))];
    if let Some(ref path) = args.config {
        let poll = (args.poll_interval > 0).then(|| Duration::from_secs(args.poll_interval));
        let file = FileBacking::open(path.clone(), poll).await?;
        tracing::info!(path = %path.display(), "using config file");
        chain.push(Arc::new(file));
    }
    Ok(Distconf::new(chain))
}

/// Decodes the `--default` text, or uses `fallback` when none was given.
pub fn parse_default<T: ConfigValue>(key: &str, text: Option<&str>, fallback: T) -> Result<T> {
    match text {
        None => Ok(fallback),
        Some(t) => T::decode(t.as_bytes()).map_err(|message| DistconfError::Parse {
            key: key.to_string(),
            kind: T::KIND,
            message,
        }),
    }
}

#[must_use]
pub fn render<T: ConfigValue>(value: &T) -> String {
    String::from_utf8_lossy(&value.encode()).into_owned()
}
