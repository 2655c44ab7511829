// SPDX-License-Identifier: Apache-2.0

//! JSON-over-HTTP fetching for cluster status endpoints

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("get {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("get {url} http status code != 2xx ({status}), message {body}")]
    Status { url: String, status: u16, body: String },

    #[error("decode response of {url} failed: {message}")]
    Decode { url: String, message: String },

    #[error("cannot build http client: {message}")]
    Client { message: String },
}

/// Fetches a page and parses it as JSON.
///
/// Injected wherever live cluster information is needed so callers can be
/// tested without a network endpoint.
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

/// [`JsonFetcher`] backed by a reqwest client
pub struct HttpJsonFetcher {
    client: Client,
}

impl HttpJsonFetcher {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Client {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JsonFetcher for HttpJsonFetcher {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!(url, "fetching JSON");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/settings", listener.local_addr().unwrap());
        drop(listener);

        let fetcher = HttpJsonFetcher::new().unwrap();
        match fetcher.get_json(&url).await {
            Err(FetchError::Transport { url: failed, .. }) => assert_eq!(failed, url),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
