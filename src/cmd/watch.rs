//! `distconf watch` follows one key until Ctrl+C / SIGTERM.

use std::time::Duration;

use super::{build_registry, parse_default, render};
use crate::cli::{KeyArgs, ValueKind};
use crate::error::Result;
use crate::registry::value::ConfigValue;
use crate::registry::{Distconf, Handle};

pub async fn execute(args: KeyArgs) -> Result<()> {
    let conf = build_registry(&args.source).await?;
    let key = args.key.as_str();
    let default = args.default.as_deref();

    match args.kind {
        ValueKind::Str => follow(&conf, key, parse_default(key, default, String::new())?).await,
        ValueKind::Bool => follow(&conf, key, parse_default(key, default, false)?).await,
        ValueKind::Int => follow(&conf, key, parse_default(key, default, 0_i64)?).await,
        ValueKind::Float => follow(&conf, key, parse_default(key, default, 0_f64)?).await,
        ValueKind::Duration => {
            follow(&conf, key, parse_default(key, default, Duration::ZERO)?).await;
        }
    }

    shutdown_signal().await;
    tracing::info!("distconf watch stopped");
    conf.close().await
}

async fn follow<T: ConfigValue>(conf: &Distconf, key: &str, default: T) {
    let handle = conf.handle(key, default).await;
    println!("{key} = {}", render(&handle.get()));
    handle.watch(|h: &Handle<T>, old: &T| {
        println!("{} = {} (was {})", h.key(), render(&h.get()), render(old));
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
