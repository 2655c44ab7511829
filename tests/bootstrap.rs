use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use loadctl_lib::common::{is_context_canceled_error, FetchError, JsonFetcher};
use loadctl_lib::config::{Config, ConfigError};
use loadctl_lib::{resolve_config, BootstrapError, ControlPlane};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

struct StaticFetcher {
    body: Value,
    calls: AtomicUsize,
}

impl StaticFetcher {
    fn new(body: Value) -> Self {
        Self {
            body,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JsonFetcher for StaticFetcher {
    async fn get_json(&self, _url: &str) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

fn write_config(dir: &tempfile::TempDir, document: &str) -> std::path::PathBuf {
    let path = dir.path().join("tidb-lightning.toml");
    std::fs::write(&path, document).unwrap();
    path
}

#[tokio::test]
async fn test_resolve_complete_document_without_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [lightning]
        level = "debug"

        [tidb]
        host = "172.16.30.11"
        port = 4001
        user = "guest"
        password = "12345"
        pd-addr = "172.16.30.11:2379,172.16.30.12:2379"

        [post-restore]
        checksum = false
        "#,
    );

    let fetcher = StaticFetcher::new(Value::Null);
    let config = resolve_config(&path, &fetcher).await.unwrap();

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(config.app.level, "debug");
    assert_eq!(config.tidb.port, 4001);
    assert_eq!(config.tidb.pd_addr, "172.16.30.11:2379,172.16.30.12:2379");
    assert!(!config.post_restore.checksum);
    assert!(config.post_restore.analyze);
    assert_eq!(config.tidb.tls, "false");
    assert!(!config.to_string().contains("12345"));
}

#[tokio::test]
async fn test_resolve_fills_port_from_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[tidb]\nhost = \"10.0.0.1\"\n");

    let fetcher = StaticFetcher::new(json!({
        "port": 4000,
        "advertise-address": "",
        "path": "http://10.0.0.2:2379,10.0.0.3:2379",
    }));
    let config = resolve_config(&path, &fetcher).await.unwrap();

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(config.tidb.port, 4000);
    assert_eq!(config.tidb.pd_addr, "10.0.0.2:2379");
}

#[tokio::test]
async fn test_resolve_reports_invalid_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "[tidb]\nport = 4000\npd-addr = \"pd:2379\"\n[tikv-importer]\nbackend = \"no_such_backend\"\n",
    );

    let err = resolve_config(&path, &StaticFetcher::new(Value::Null))
        .await
        .unwrap_err();
    match err {
        BootstrapError::Config(ConfigError::Invalid { field, .. }) => {
            assert_eq!(field, "tikv-importer.backend")
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_resolve_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = resolve_config(dir.path().join("absent.toml"), &StaticFetcher::new(Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::Config(ConfigError::Io { .. })));
}

#[tokio::test]
async fn test_connect_observes_cancellation() {
    let mut config = Config::new();
    config.tidb.port = 4000;
    config.tidb.pd_addr = "pd:2379".into();

    let cancel = CancellationToken::new();
    cancel.cancel();

    match ControlPlane::connect(config, cancel).await {
        Err(BootstrapError::Cluster(err)) => assert!(is_context_canceled_error(&err)),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connected despite cancellation"),
    }
}
