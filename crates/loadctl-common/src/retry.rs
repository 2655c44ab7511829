// SPDX-License-Identifier: Apache-2.0

//! Retrying SQL execution
//!
//! [`SqlWithRetry`] wraps a [`SqlHandle`] so every statement tolerates the
//! transient failures of a multi-node cluster (leader transfer, lock
//! contention, PD timeouts) without retry logic at each call site.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, field, info_span, warn, Instrument};

use crate::error::{is_retryable_error, ClusterError, ClusterResult};
use crate::sql::{FromSqlRow, SqlHandle, SqlTxn, SqlValue};

pub const DEFAULT_MAX_RETRY: usize = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Runs statements against the cluster, retrying transient failures with a
/// fixed backoff.
///
/// Cheap to clone when the handle is; clones share the handle and the
/// cancellation token but nothing else.
#[derive(Clone)]
pub struct SqlWithRetry<H> {
    db: H,
    hide_query_log: bool,
    max_retry: usize,
    backoff: Duration,
    cancel: Option<CancellationToken>,
}

impl<H: SqlHandle> SqlWithRetry<H> {
    pub fn new(db: H) -> Self {
        Self {
            db,
            hide_query_log: false,
            max_retry: DEFAULT_MAX_RETRY,
            backoff: DEFAULT_RETRY_BACKOFF,
            cancel: None,
        }
    }

    /// Keeps statement text and bound arguments out of the logs.
    pub fn hide_query_log(mut self, hide: bool) -> Self {
        self.hide_query_log = hide;
        self
    }

    /// Total attempts, including the first one. Clamped to at least 1.
    pub fn with_max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn db(&self) -> &H {
        &self.db
    }

    async fn cancelled(&self) {
        match &self.cancel {
            Some(token) => token.cancelled().await,
            None => futures::future::pending().await,
        }
    }

    async fn perform<T, F, Fut>(&self, purpose: &str, mut action: F) -> ClusterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClusterResult<T>>,
    {
        let mut attempt = 0;
        let err = loop {
            if attempt > 0 {
                warn!(retry_cnt = attempt, "{} retry start", purpose);
                let interrupted = tokio::select! {
                    biased;
                    _ = self.cancelled() => true,
                    _ = tokio::time::sleep(self.backoff) => false,
                };
                if interrupted {
                    break ClusterError::Canceled;
                }
            }

            let result = tokio::select! {
                biased;
                _ = self.cancelled() => Err(ClusterError::Canceled),
                result = action() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if !is_retryable_error(&err) || attempt >= self.max_retry {
                        break err;
                    }
                    warn!(
                        retry_cnt = attempt - 1,
                        error = %err,
                        "{} failed but going to try again",
                        purpose
                    );
                }
            }
        };

        Err(err.annotate(format!("{} failed", purpose)))
    }

    fn span(&self, purpose: &str, query: Option<&str>, args: &[SqlValue]) -> tracing::Span {
        let span = info_span!(
            "sql_with_retry",
            purpose = %purpose,
            query = field::Empty,
            args = field::Empty
        );
        if self.hide_query_log {
            return span;
        }
        if let Some(query) = query {
            span.record("query", query);
        }
        if !args.is_empty() {
            span.record("args", field::debug(args));
        }
        span
    }

    /// Runs a single-row query and scans it into `T`.
    pub async fn query_row<T: FromSqlRow>(&self, purpose: &str, query: &str) -> ClusterResult<T> {
        let db = &self.db;
        self.perform(purpose, move || async move {
            let row = db.query_row(query).await?;
            T::from_sql_row(&row)
        })
        .instrument(self.span(purpose, Some(query), &[]))
        .await
    }

    /// Executes a single statement, discarding any result.
    pub async fn exec(&self, purpose: &str, query: &str, args: &[SqlValue]) -> ClusterResult<()> {
        let db = &self.db;
        self.perform(purpose, move || async move {
            db.exec(query, args).await.map(|_| ())
        })
        .instrument(self.span(purpose, Some(query), args))
        .await
    }

    /// Runs `action` inside a transaction, retrying the whole transaction
    /// when it fails with a retryable error.
    ///
    /// A failing action is rolled back and its own error is returned; a
    /// rollback failure is only logged.
    pub async fn transact<F>(&self, purpose: &str, action: F) -> ClusterResult<()>
    where
        F: for<'t> Fn(&'t mut H::Txn) -> BoxFuture<'t, ClusterResult<()>>,
    {
        let db = &self.db;
        let action = &action;
        self.perform(purpose, move || async move {
            let mut txn = db
                .begin()
                .await
                .map_err(|e| e.annotate("begin transaction failed"))?;

            let outcome = action(&mut txn).await;
            if let Err(err) = outcome {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "{} rollback transaction failed", purpose);
                }
                return Err(err);
            }

            txn.commit()
                .await
                .map_err(|e| e.annotate("commit transaction failed"))
        })
        .instrument(self.span(purpose, None, &[]))
        .await
    }
}
