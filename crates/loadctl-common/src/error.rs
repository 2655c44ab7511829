// SPDX-License-Identifier: Apache-2.0

//! Cluster error taxonomy and retry classification
//!
//! Every failure coming back from the SQL layer, the import services or the
//! network is normalized into [`ClusterError`]. The retry loop only ever asks
//! one question of it: [`is_retryable_error`].

use std::io;
use std::sync::OnceLock;

use regex::Regex;
use sqlx::mysql::MySqlDatabaseError;
use thiserror::Error;
use tonic::Code;

/// Server error codes that describe transient cluster conditions.
pub mod codes {
    /// Generic "unknown error", TiDB uses it for many recoverable hiccups.
    pub const ERR_UNKNOWN: u16 = 1105;
    /// Deadlock found while taking a lock; the whole statement can be retried.
    pub const ERR_LOCK_DEADLOCK: u16 = 1213;
    pub const ERR_PD_SERVER_TIMEOUT: u16 = 9001;
    pub const ERR_TIKV_SERVER_TIMEOUT: u16 = 9002;
    pub const ERR_TIKV_SERVER_BUSY: u16 = 9003;
    pub const ERR_RESOLVE_LOCK_TIMEOUT: u16 = 9004;
    pub const ERR_REGION_UNAVAILABLE: u16 = 9005;
    /// Write conflict under optimistic transactions.
    pub const ERR_WRITE_CONFLICT_IN_TIDB: u16 = 9007;
}

const RETRYABLE_SERVER_CODES: &[u16] = &[
    codes::ERR_UNKNOWN,
    codes::ERR_LOCK_DEADLOCK,
    codes::ERR_WRITE_CONFLICT_IN_TIDB,
    codes::ERR_PD_SERVER_TIMEOUT,
    codes::ERR_TIKV_SERVER_TIMEOUT,
    codes::ERR_TIKV_SERVER_BUSY,
    codes::ERR_RESOLVE_LOCK_TIMEOUT,
    codes::ERR_REGION_UNAVAILABLE,
];

const RETRYABLE_RPC_CODES: &[Code] = &[
    Code::DeadlineExceeded,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unknown,
];

/// Expectation failures produced by SQL mocking harnesses. They are plain
/// string errors and must fail fast instead of being retried into a pass.
const MOCK_HARNESS_FAILURE_PATTERN: &str =
    r"^call to (?s:.*) was not expected|arguments do not match:|could not match actual sql";

fn mock_harness_failure() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(MOCK_HARNESS_FAILURE_PATTERN).expect("mock harness pattern is a valid regex")
    })
}

/// Unified error type for every operation against the cluster
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("EOF")]
    Eof,

    #[error("network error: {0}")]
    Network(#[source] io::Error),

    #[error("Error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("rpc error: code = {code:?} desc = {message}")]
    Rpc { code: Code, message: String },

    #[error("failed to decode row: {0}")]
    Decode(String),

    /// A bare message without any richer type information.
    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),

    #[error("{context}: {source}")]
    Annotated {
        context: String,
        #[source]
        source: Box<ClusterError>,
    },
}

impl ClusterError {
    pub fn server(code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    pub fn rpc(code: Code, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn network(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        Self::Network(io::Error::new(kind, message.into()))
    }

    /// Wraps the error with a context label while keeping the cause reachable.
    pub fn annotate(self, context: impl Into<String>) -> Self {
        Self::Annotated {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error once every annotation layer is peeled off.
    pub fn cause(&self) -> &ClusterError {
        let mut current = self;
        while let Self::Annotated { source, .. } = current {
            current = source;
        }
        current
    }
}

/// Result type alias for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Reports whether a failed operation may be attempted again.
///
/// Caller-driven termination (cancellation, deadlines, end of stream) is
/// never retryable.
///
/// Row decoding failures ([`ClusterError::Decode`]) are permanent here even
/// though a plain string error with the same text would be retried: a value
/// that cannot be scanned once will not scan on the next attempt either.
pub fn is_retryable_error(err: &ClusterError) -> bool {
    match err.cause() {
        ClusterError::Canceled | ClusterError::DeadlineExceeded | ClusterError::Eof => false,
        ClusterError::Network(io_err) => io_err.kind() == io::ErrorKind::TimedOut,
        ClusterError::Server { code, .. } => RETRYABLE_SERVER_CODES.contains(code),
        ClusterError::Rpc { code, .. } => RETRYABLE_RPC_CODES.contains(code),
        ClusterError::Decode(_) => false,
        ClusterError::Message(message) => !mock_harness_failure().is_match(message),
        ClusterError::Other(_) => true,
        ClusterError::Annotated { .. } => unreachable!("cause() strips annotations"),
    }
}

/// Same as [`is_retryable_error`] for optional errors; `None` never retries.
pub fn is_retryable(err: Option<&ClusterError>) -> bool {
    err.is_some_and(is_retryable_error)
}

/// Reports whether the error stems from the caller stopping the work rather
/// than from the cluster, either locally or as a `Cancelled` RPC status.
/// Deadline expiry is not cancellation. Used for reporting only, not for
/// retry decisions.
pub fn is_context_canceled_error(err: &ClusterError) -> bool {
    matches!(
        err.cause(),
        ClusterError::Canceled
            | ClusterError::Rpc {
                code: Code::Cancelled,
                ..
            }
    )
}

impl From<io::Error> for ClusterError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::Eof,
            _ => Self::Network(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for ClusterError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::DeadlineExceeded
    }
}

impl From<sqlx::Error> for ClusterError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                match db_err.try_downcast_ref::<MySqlDatabaseError>() {
                    Some(mysql_err) => Self::server(mysql_err.number(), mysql_err.message()),
                    None => Self::Other(Box::new(sqlx::Error::Database(db_err))),
                }
            }
            sqlx::Error::Io(io_err) => io_err.into(),
            sqlx::Error::PoolTimedOut => Self::network(
                io::ErrorKind::TimedOut,
                "pool timed out while waiting for an open connection",
            ),
            sqlx::Error::RowNotFound => Self::message("no rows in result set"),
            err @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)) => Self::Decode(err.to_string()),
            other => Self::Other(Box::new(other)),
        }
    }
}
