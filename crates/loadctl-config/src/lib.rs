// SPDX-License-Identifier: Apache-2.0

//! Configuration for loadctl
//!
//! A [`Config`] is loaded from TOML with conservative defaults, then resolved
//! once by [`Config::adjust`], which may consult the cluster's status
//! endpoint through [`fetch_cluster_topology`] for connection details the
//! document leaves open.

pub mod adjust;
pub mod config;
pub mod duration;
pub mod error;
pub mod sql_mode;
pub mod topology;

pub use config::{
    AppConfig, BackendKind, CheckpointConfig, Config, CronConfig, CsvConfig, MydumperConfig,
    PostRestoreConfig, Security, TableRoute, TidbConfig, TikvImporterConfig,
};
pub use duration::{Duration, DurationError};
pub use error::{ConfigError, ConfigResult};
pub use sql_mode::{SqlMode, SqlModeError, DEFAULT_IMPORT_SQL_MODE, DEFAULT_SQL_MODE};
pub use topology::{fetch_cluster_topology, ClusterTopology};
