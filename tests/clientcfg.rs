//! Integration tests for the reporting client settings.

use std::sync::Arc;
use std::time::Duration;

use distconf::backing::memory::MemoryBacking;
use distconf::backing::Backing;
use distconf::clientcfg::{
    default_dimensions, ClientConfig, SinkSettings, WatchedSink, DEFAULT_DATAPOINT_ENDPOINT,
};
use distconf::logger::Discard;
use distconf::{Distconf, DistconfError};

#[tokio::test]
async fn load_uses_defaults_for_missing_keys() {
    let conf = Distconf::new(vec![Arc::new(MemoryBacking::new())]);
    let client = ClientConfig::load(&conf).await;

    assert_eq!(client.source_name.get(), "");
    assert_eq!(client.auth_token.get(), "");
    assert_eq!(client.endpoint.get(), "");
    assert_eq!(client.reporting_interval.get(), Duration::from_secs(1));
    assert_eq!(client.reporting_timeout_interval.get(), Duration::from_secs(1));
    assert!(!client.disable_compression.get());
    assert!(!client.debug_collect_datapoints.get());
}

#[tokio::test]
async fn load_reads_configured_keys() {
    let mem = MemoryBacking::with_values([
        ("signalfuse.sourceName", "web-1"),
        ("sf.metrics.report_interval", "10s"),
        ("sf.metrics.disableCompression", "true"),
    ]);
    let conf = Distconf::new(vec![Arc::new(mem)]);
    let client = ClientConfig::load(&conf).await;

    assert_eq!(client.source_name.get(), "web-1");
    assert_eq!(client.reporting_interval.get(), Duration::from_secs(10));
    assert!(client.disable_compression.get());
}

#[tokio::test]
async fn dimensions_prefer_source_name() {
    let mem = MemoryBacking::with_values([("signalfuse.sourceName", "web-1")]);
    let conf = Distconf::new(vec![Arc::new(mem)]);
    let mut client = ClientConfig::load(&conf).await;
    client.os_hostname = || Ok("unused".to_string());

    let dims = default_dimensions(&client).unwrap();
    assert_eq!(dims.get("sf_source").map(String::as_str), Some("web-1"));
    assert_eq!(dims.len(), 1);
}

#[tokio::test]
async fn dimensions_fall_back_to_hostname() {
    let conf = Distconf::new(vec![Arc::new(MemoryBacking::new())]);
    let mut client = ClientConfig::load(&conf).await;

    client.os_hostname = || Ok("box-7".to_string());
    let dims = default_dimensions(&client).unwrap();
    assert_eq!(dims.get("sf_source").map(String::as_str), Some("box-7"));

    client.os_hostname = || Err(std::io::Error::other("no hostname"));
    assert!(matches!(
        default_dimensions(&client),
        Err(DistconfError::Hostname { .. })
    ));
}

#[tokio::test]
async fn sink_follows_config_changes() {
    let mem = Arc::new(MemoryBacking::with_values([("sf.metrics.auth_token", "t0")]));
    let conf = Distconf::new(vec![mem.clone()]);
    let client = ClientConfig::load(&conf).await;
    let sink = WatchedSink::new(&client, Arc::new(Discard));

    assert_eq!(
        sink.settings(),
        SinkSettings {
            auth_token: "t0".to_string(),
            ..SinkSettings::default()
        }
    );

    mem.write("sf.metrics.auth_token", Some(b"t1")).await.unwrap();
    mem.write("sf.metrics.statsendpoint", Some(b"ingest.example.com"))
        .await
        .unwrap();
    mem.write("sf.metrics.disableCompression", Some(b"1"))
        .await
        .unwrap();

    let settings = sink.settings();
    assert_eq!(settings.auth_token, "t1");
    assert_eq!(
        settings.datapoint_endpoint,
        "http://ingest.example.com/v2/datapoint"
    );
    assert!(settings.disable_compression);
}

#[tokio::test]
async fn sink_keeps_endpoint_on_bad_url() {
    let mem = Arc::new(MemoryBacking::new());
    let conf = Distconf::new(vec![mem.clone()]);
    let client = ClientConfig::load(&conf).await;
    let sink = WatchedSink::new(&client, Arc::new(Discard));

    mem.write("sf.metrics.statsendpoint", Some(b"http://[broken"))
        .await
        .unwrap();
    assert_eq!(sink.settings().datapoint_endpoint, DEFAULT_DATAPOINT_ENDPOINT);

    // Clearing the key keeps the current endpoint too.
    mem.write("sf.metrics.statsendpoint", Some(b"https://a.example.com/x"))
        .await
        .unwrap();
    mem.write("sf.metrics.statsendpoint", None).await.unwrap();
    assert_eq!(sink.settings().datapoint_endpoint, "https://a.example.com/x");
}
