// SPDX-License-Identifier: Apache-2.0

//! Load, resolve and connect.

use std::path::Path;

use loadctl_common::{ClusterError, FetchError, HttpJsonFetcher, JsonFetcher, MySqlHandle, SqlWithRetry};
use loadctl_config::{Config, ConfigError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("cannot initialize logging: {0}")]
    Logging(String),
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Reads the document at `path` and resolves it, consulting the cluster
/// through `fetcher` when connection details are missing.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn resolve_config(
    path: impl AsRef<Path>,
    fetcher: &dyn JsonFetcher,
) -> BootstrapResult<Config> {
    let mut config = Config::from_file(path.as_ref())?;
    config.adjust(fetcher).await?;
    info!(config = %config, "config resolved");
    Ok(config)
}

/// A resolved configuration plus a retrying connection to the cluster.
pub struct ControlPlane {
    config: Config,
    db: SqlWithRetry<MySqlHandle>,
    cancel: CancellationToken,
}

impl ControlPlane {
    /// Resolves the document at `path` against the live cluster and connects.
    pub async fn open(path: impl AsRef<Path>, cancel: CancellationToken) -> BootstrapResult<Self> {
        let fetcher = HttpJsonFetcher::new()?;
        let config = resolve_config(path, &fetcher).await?;
        Self::connect(config, cancel).await
    }

    /// Connects using an already resolved configuration.
    #[instrument(skip_all, fields(host = %config.tidb.host, port = config.tidb.port))]
    pub async fn connect(config: Config, cancel: CancellationToken) -> BootstrapResult<Self> {
        let param = config.connect_param();
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClusterError::Canceled.into()),
            handle = param.connect() => handle?,
        };
        let db = SqlWithRetry::new(handle).with_cancellation(cancel.clone());
        Ok(Self { config, db, cancel })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &SqlWithRetry<MySqlHandle> {
        &self.db
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// `VERSION()` of the SQL node, retried like any other statement.
    pub async fn server_version(&self) -> BootstrapResult<String> {
        let (version,) = self
            .db
            .query_row::<(String,)>("fetch server version", "SELECT VERSION()")
            .await?;
        Ok(version)
    }
}
