// SPDX-License-Identifier: Apache-2.0

//! Cluster-facing building blocks shared by the loadctl crates
//!
//! - [`error`]: the cluster error taxonomy and the retry classifier
//! - [`retry`]: [`SqlWithRetry`], the retrying statement executor
//! - [`connect`]: connection parameters, DSN rendering and pool setup
//! - [`ident`]: identifier quoting for generated SQL
//! - [`http`]: JSON fetching from status endpoints

pub mod connect;
pub mod error;
pub mod http;
pub mod ident;
pub mod retry;
pub mod sql;

pub use connect::{MySqlConnectParam, TlsFiles};
pub use error::{
    is_context_canceled_error, is_retryable, is_retryable_error, ClusterError, ClusterResult,
};
pub use http::{FetchError, HttpJsonFetcher, JsonFetcher};
pub use ident::{escape_identifier, unique_table, write_mysql_identifier};
pub use retry::SqlWithRetry;
pub use sql::{FromSqlRow, FromSqlValue, MySqlHandle, MySqlTxn, SqlHandle, SqlRow, SqlTxn, SqlValue};
