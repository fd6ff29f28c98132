//! Integration tests for the polled file backing.

#![cfg(feature = "yaml")]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use distconf::backing::file::FileBacking;
use distconf::backing::{Backing, Dynamic};
use distconf::registry::DurationHandle;
use distconf::{Distconf, DistconfError};

fn yaml_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn rewrite(file: &NamedTempFile, content: &str) {
    std::fs::write(file.path(), content).unwrap();
}

#[tokio::test]
async fn serves_flattened_keys() {
    let file = yaml_file("sf:\n  metrics:\n    report_interval: 2s\n    auth_token: abc\n");
    let backing = FileBacking::open(file.path(), None).await.unwrap();

    assert_eq!(
        backing.get("sf.metrics.report_interval").await.unwrap(),
        Some(b"2s".to_vec())
    );
    assert_eq!(
        backing.get("sf.metrics.auth_token").await.unwrap(),
        Some(b"abc".to_vec())
    );
    assert_eq!(backing.get("sf.metrics").await.unwrap(), None);
    assert_eq!(backing.path(), file.path());
}

#[tokio::test]
async fn is_read_only() {
    let file = yaml_file("a: 1\n");
    let backing = FileBacking::open(file.path(), None).await.unwrap();
    assert!(matches!(
        backing.write("a", Some(b"2")).await,
        Err(DistconfError::ReadOnly { backing: "file" })
    ));
}

#[tokio::test]
async fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let result = FileBacking::open(dir.path().join("absent.yaml"), None).await;
    assert!(matches!(
        result,
        Err(DistconfError::ConfigFileNotFound { .. })
    ));
}

#[tokio::test]
async fn refresh_fires_watches_for_changed_and_removed_keys() {
    let file = yaml_file("a: 1\nb: 2\nc: 3\n");
    let backing = FileBacking::open(file.path(), None).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for key in ["a", "b", "c"] {
        let sink = seen.clone();
        backing
            .watch(
                key,
                Arc::new(move |k: &str, v: Option<&[u8]>| {
                    sink.lock().push((k.to_string(), v.map(<[u8]>::to_vec)));
                }),
            )
            .await
            .unwrap();
    }

    assert!(!backing.refresh().await.unwrap());

    rewrite(&file, "a: 1\nb: 20\n");
    assert!(backing.refresh().await.unwrap());

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("b".to_string(), Some(b"20".to_vec())),
            ("c".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn broken_rewrite_keeps_previous_values() {
    let file = yaml_file("a: 1\n");
    let backing = FileBacking::open(file.path(), None).await.unwrap();

    rewrite(&file, "a: [unterminated\n");
    assert!(matches!(
        backing.refresh().await,
        Err(DistconfError::ConfigParse { .. })
    ));
    assert_eq!(backing.get("a").await.unwrap(), Some(b"1".to_vec()));
}

#[tokio::test]
async fn poll_loop_updates_registry_handles() {
    let file = yaml_file("sf:\n  metrics:\n    report_interval: 2s\n");
    let backing = FileBacking::open(file.path(), Some(Duration::from_millis(10)))
        .await
        .unwrap();
    let conf = Distconf::new(vec![Arc::new(backing)]);

    let interval = conf
        .duration("sf.metrics.report_interval", Duration::from_secs(1))
        .await;
    assert_eq!(interval.get(), Duration::from_secs(2));

    let olds = Arc::new(Mutex::new(Vec::new()));
    let sink = olds.clone();
    interval.watch(move |_: &DurationHandle, old: &Duration| sink.lock().push(*old));

    rewrite(&file, "sf:\n  metrics:\n    report_interval: 5s\n");
    tokio::time::timeout(Duration::from_secs(2), async {
        while interval.get() != Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poll loop never picked up the change");
    assert_eq!(*olds.lock(), vec![Duration::from_secs(2)]);

    conf.close().await.unwrap();
    conf.close().await.unwrap();
}

#[tokio::test]
async fn closed_backing_rejects_reads_and_watches() {
    let file = yaml_file("a: 1\n");
    let backing = FileBacking::open(file.path(), Some(Duration::from_millis(10)))
        .await
        .unwrap();
    backing.close().await.unwrap();

    let cb = Arc::new(|_: &str, _: Option<&[u8]>| {});
    assert!(matches!(
        backing.watch("a", cb).await,
        Err(DistconfError::Closed)
    ));
    assert!(matches!(backing.get("a").await, Err(DistconfError::Closed)));
    assert!(matches!(backing.refresh().await, Err(DistconfError::Closed)));
    backing.close().await.unwrap();
}
