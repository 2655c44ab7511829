//! Adjustment against a live HTTP status endpoint served in-process.

use loadctl_common::HttpJsonFetcher;
use loadctl_config::{Config, ConfigError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves `body` with `status` to every request until the test ends.
async fn start_status_server(status: u16, body: &'static str) -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr.ip().to_string(), addr.port())
}

fn fetcher() -> HttpJsonFetcher {
    HttpJsonFetcher::new().unwrap()
}

fn config_for(host: String, status_port: u16) -> Config {
    let mut cfg = Config::new();
    cfg.tidb.host = host;
    cfg.tidb.status_port = status_port;
    cfg
}

#[tokio::test]
async fn test_adjust_pd_addr_and_port() {
    let (host, port) = start_status_server(
        200,
        r#"{"port":4444,"advertise-address":"","path":"123.45.67.89:1234,56.78.90.12:3456"}"#,
    )
    .await;

    let mut cfg = config_for(host, port);
    cfg.adjust(&fetcher()).await.unwrap();
    assert_eq!(cfg.tidb.port, 4444);
    assert_eq!(cfg.tidb.pd_addr, "123.45.67.89:1234");
}

#[tokio::test]
async fn test_adjust_pd_addr_via_advertise_address() {
    let (host, port) = start_status_server(
        200,
        r#"{"port":"6666","advertise-address":"121.212.121.212:5555","path":"34.34.34.34:3434"}"#,
    )
    .await;

    let mut cfg = config_for(host, port);
    cfg.adjust(&fetcher()).await.unwrap();
    assert_eq!(cfg.tidb.port, 6666);
    assert_eq!(cfg.tidb.pd_addr, "121.212.121.212:5555");
}

#[tokio::test]
async fn test_adjust_page_not_found() {
    let (host, port) = start_status_server(404, "{}").await;

    let err = config_for(host, port)
        .adjust(&fetcher())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::FetchSettings { .. }), "{}", err);
    assert!(err.to_string().contains("404"), "{}", err);
}

#[tokio::test]
async fn test_adjust_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = config_for("127.0.0.1".into(), port)
        .adjust(&fetcher())
        .await
        .unwrap_err();
    assert!(
        err.to_string().starts_with("cannot fetch settings from cluster"),
        "{}",
        err
    );
}

#[tokio::test]
async fn test_adjust_invalid_json() {
    let (host, port) = start_status_server(200, "invalid-string").await;

    let err = config_for(host, port)
        .adjust(&fetcher())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::FetchSettings { .. }), "{}", err);
}

#[tokio::test]
async fn test_adjust_no_usable_pd_addr() {
    let (host, port) = start_status_server(200, r#"{"port": 1234, "path": ",,"}"#).await;

    let err = config_for(host, port)
        .adjust(&fetcher())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::FetchSettings { .. }), "{}", err);
    assert!(
        err.to_string()
            .ends_with("please manually fill in `tidb.port` and `tidb.pd-addr`"),
        "{}",
        err
    );
}

#[tokio::test]
async fn test_adjust_from_config_file() {
    let (host, port) = start_status_server(200, r#"{"port":4000,"path":"pd:2379"}"#).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loadctl.toml");
    std::fs::write(
        &path,
        format!(
            "[tidb]\nhost = \"{}\"\nstatus-port = {}\nuser = \"guest\"\n\n[tikv-importer]\nbackend = \"tidb\"\n",
            host, port
        ),
    )
    .unwrap();

    let mut cfg = Config::from_file(&path).unwrap();
    cfg.adjust(&fetcher()).await.unwrap();
    assert_eq!(cfg.tidb.port, 4000);
    assert_eq!(cfg.tidb.pd_addr, "pd:2379");
    assert_eq!(cfg.tidb.user, "guest");
    assert_eq!(cfg.app.index_concurrency, cfg.app.region_concurrency);
}
