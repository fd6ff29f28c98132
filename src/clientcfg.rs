//! Metrics reporting client settings sourced from the registry.
//!
//! [`ClientConfig::load`] pulls the reporting client's keys out of a
//! [`Distconf`]. [`WatchedSink`] keeps the sink-facing subset (auth token,
//! ingest endpoint, compression) current by watching those handles and
//! swapping its fields under its own lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use url::Url;

use crate::error::{DistconfError, Result};
use crate::logger::{keys, Logger};
use crate::registry::{BoolHandle, Distconf, DurationHandle, StrHandle};

pub const DEFAULT_DATAPOINT_ENDPOINT: &str = "https://ingest.signalfx.com/v2/datapoint";
const DATAPOINT_PATH: &str = "/v2/datapoint";

pub struct ClientConfig {
    pub source_name: StrHandle,
    pub auth_token: StrHandle,
    pub endpoint: StrHandle,
    pub reporting_interval: DurationHandle,
    pub reporting_timeout_interval: DurationHandle,
    pub disable_compression: BoolHandle,
    pub debug_collect_datapoints: BoolHandle,
    pub os_hostname: fn() -> std::io::Result<String>,
}

impl ClientConfig {
    pub async fn load(d: &Distconf) -> Self {
        Self {
            source_name: d.str("signalfuse.sourceName", "").await,
            auth_token: d.str("sf.metrics.auth_token", "").await,
            endpoint: d.str("sf.metrics.statsendpoint", "").await,
            reporting_interval: d
                .duration("sf.metrics.report_interval", Duration::from_secs(1))
                .await,
            reporting_timeout_interval: d
                .duration("sf.metrics.report_timeout_interval", Duration::from_secs(1))
                .await,
            disable_compression: d.bool("sf.metrics.disableCompression", false).await,
            debug_collect_datapoints: d.bool("sf.metrics.debug.collect.datapoints", false).await,
            os_hostname,
        }
    }
}

/// `HOSTNAME` from the environment, else `/etc/hostname`.
pub fn os_hostname() -> std::io::Result<String> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return Ok(name);
        }
    }
    Ok(std::fs::read_to_string("/etc/hostname")?.trim().to_string())
}

/// Dimensions identifying this host: the configured source name, or the hostname.
pub fn default_dimensions(conf: &ClientConfig) -> Result<HashMap<String, String>> {
    let source_name = conf.source_name.get();
    let source = if source_name.is_empty() {
        (conf.os_hostname)().map_err(|e| DistconfError::Hostname {
            source: Box::new(e),
        })?
    } else {
        source_name
    };
    Ok(HashMap::from([("sf_source".to_string(), source)]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub auth_token: String,
    pub datapoint_endpoint: String,
    pub disable_compression: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            datapoint_endpoint: DEFAULT_DATAPOINT_ENDPOINT.to_string(),
            disable_compression: false,
        }
    }
}

/// Normalises a configured endpoint. `Ok(None)` means "keep the current one".
pub fn resolve_endpoint(raw: &str) -> std::result::Result<Option<String>, url::ParseError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let with_scheme = if raw.starts_with("http") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let mut url = Url::parse(&with_scheme)?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DATAPOINT_PATH);
    }
    Ok(Some(url.to_string()))
}

pub struct WatchedSink {
    settings: Arc<RwLock<SinkSettings>>,
}

impl WatchedSink {
    /// Applies the current values, then follows every later change.
    #[must_use]
    pub fn new(conf: &ClientConfig, logger: Arc<dyn Logger>) -> Self {
        let settings = Arc::new(RwLock::new(SinkSettings::default()));

        apply_auth_token(&settings, &conf.auth_token.get());
        apply_endpoint(&settings, logger.as_ref(), &conf.endpoint.get());
        apply_disable_compression(&settings, conf.disable_compression.get());

        let s = settings.clone();
        conf.auth_token
            .watch(move |h: &StrHandle, _old: &String| apply_auth_token(&s, &h.get()));

        let s = settings.clone();
        let l = logger.clone();
        conf.endpoint
            .watch(move |h: &StrHandle, _old: &String| apply_endpoint(&s, l.as_ref(), &h.get()));

        let s = settings.clone();
        conf.disable_compression
            .watch(move |h: &BoolHandle, _old: &bool| apply_disable_compression(&s, h.get()));

        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> SinkSettings {
        self.settings.read().clone()
    }
}

fn apply_auth_token(settings: &RwLock<SinkSettings>, token: &str) {
    settings.write().auth_token = token.to_string();
}

fn apply_disable_compression(settings: &RwLock<SinkSettings>, disable: bool) {
    settings.write().disable_compression = disable;
}

fn apply_endpoint(settings: &RwLock<SinkSettings>, logger: &dyn Logger, raw: &str) {
    match resolve_endpoint(raw) {
        Ok(Some(endpoint)) => {
            tracing::info!(endpoint = %endpoint, "updating reporter endpoint");
            settings.write().datapoint_endpoint = endpoint;
        }
        Ok(None) => {}
        Err(e) => logger.log(&[
            (keys::MSG, &"unable to parse URL"),
            ("endpoint", &raw),
            (keys::ERR, &e),
        ]),
    }
}
