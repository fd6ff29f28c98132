//! `distconf get` prints the current value of one key.

use std::time::Duration;

use super::{build_registry, parse_default, render};
use crate::cli::{KeyArgs, ValueKind};
use crate::error::Result;
use crate::registry::value::ConfigValue;
use crate::registry::Distconf;

pub async fn execute(args: KeyArgs) -> Result<()> {
    let conf = build_registry(&args.source).await?;
    let key = args.key.as_str();
    let default = args.default.as_deref();

    let text = match args.kind {
        ValueKind::Str => current(&conf, key, parse_default(key, default, String::new())?).await,
        ValueKind::Bool => current(&conf, key, parse_default(key, default, false)?).await,
        ValueKind::Int => current(&conf, key, parse_default(key, default, 0_i64)?).await,
        ValueKind::Float => current(&conf, key, parse_default(key, default, 0_f64)?).await,
        ValueKind::Duration => {
            current(&conf, key, parse_default(key, default, Duration::ZERO)?).await
        }
    };
    println!("{text}");

    conf.close().await
}

async fn current<T: ConfigValue>(conf: &Distconf, key: &str, default: T) -> String {
    render(&conf.handle(key, default).await.get())
}
