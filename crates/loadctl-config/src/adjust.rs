// SPDX-License-Identifier: Apache-2.0

//! The adjustment pass
//!
//! Turns a loaded document into a fully resolved one: asks the cluster for
//! whatever connection details are missing, fills backend-dependent
//! defaults and rejects inconsistent settings. Runs once, stops at the first
//! violation, and leaves an already resolved document untouched.

use loadctl_common::connect::{TLS_CLUSTER, TLS_DISABLED};
use loadctl_common::{JsonFetcher, MySqlConnectParam};
use tracing::{debug, info, instrument};

use crate::config::{
    BackendKind, Config, CHECKPOINT_DRIVER_FILE, CHECKPOINT_DRIVER_MYSQL,
    DEFAULT_CHECKPOINT_SCHEMA, DEFAULT_MAX_ALLOWED_PACKET, GIB, KIB, MIB, ON_DUPLICATE_ERROR,
    ON_DUPLICATE_IGNORE, ON_DUPLICATE_REPLACE,
};
use crate::error::{ConfigError, ConfigResult};
use crate::sql_mode::{SqlMode, DEFAULT_SQL_MODE};
use crate::topology::fetch_cluster_topology;

const DEFAULT_INDEX_CONCURRENCY: usize = 2;
const DEFAULT_TABLE_CONCURRENCY: usize = 6;
const DEFAULT_IO_CONCURRENCY: usize = 5;

const DEFAULT_BATCH_IMPORT_RATIO: f64 = 0.75;
const DEFAULT_READ_BLOCK_SIZE: u64 = 64 * KIB;
const DEFAULT_BATCH_SIZE: u64 = 100 * GIB;
const DEFAULT_MAX_REGION_SIZE: u64 = 256 * MIB;
const DEFAULT_REGION_SPLIT_SIZE: u64 = 96 * MIB;
const DEFAULT_SEND_KV_PAIRS: usize = 32768;

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    /// Resolves the document in place. `fetcher` is only used when the SQL
    /// port or the placement driver address is missing.
    #[instrument(skip_all, fields(backend = %self.tikv_importer.backend))]
    pub async fn adjust(&mut self, fetcher: &dyn JsonFetcher) -> ConfigResult<()> {
        let backend = self.adjust_backend()?;
        self.adjust_topology(fetcher).await?;
        self.adjust_concurrency(backend)?;
        self.adjust_security()?;
        self.adjust_csv()?;
        self.adjust_routes()?;
        self.adjust_sql_mode()?;
        self.adjust_tuning();
        self.adjust_checkpoint()?;

        debug!(config = %self, "config adjusted");
        Ok(())
    }

    fn adjust_backend(&mut self) -> ConfigResult<BackendKind> {
        let backend: BackendKind = self.tikv_importer.backend.parse()?;
        self.tikv_importer.backend = backend.as_str().to_string();
        Ok(backend)
    }

    async fn adjust_topology(&mut self, fetcher: &dyn JsonFetcher) -> ConfigResult<()> {
        if self.tidb.port == 0 || self.tidb.pd_addr.is_empty() {
            let topology =
                fetch_cluster_topology(fetcher, &self.tidb.host, self.tidb.status_port).await?;
            info!(
                port = ?topology.port,
                pd_addr = %topology.pd_addr,
                "filled missing connection settings from cluster"
            );
            if self.tidb.port == 0 {
                self.tidb.port = topology.port.unwrap_or(0);
            }
            if self.tidb.pd_addr.is_empty() {
                self.tidb.pd_addr = topology.pd_addr;
            }
        }

        if self.tidb.port == 0 {
            return Err(ConfigError::invalid(
                "tidb.port",
                "is not set and the cluster did not report a usable port",
            ));
        }
        if self.tidb.pd_addr.is_empty() {
            return Err(ConfigError::invalid("tidb.pd-addr", "must not be empty"));
        }
        Ok(())
    }

    fn adjust_concurrency(&mut self, backend: BackendKind) -> ConfigResult<()> {
        let app = &mut self.app;
        if app.region_concurrency == 0 {
            app.region_concurrency = available_cpus();
        }

        match backend {
            BackendKind::Importer | BackendKind::Local => {
                if app.index_concurrency == 0 {
                    app.index_concurrency = DEFAULT_INDEX_CONCURRENCY;
                }
                if app.table_concurrency == 0 {
                    app.table_concurrency = DEFAULT_TABLE_CONCURRENCY;
                }
            }
            BackendKind::Tidb => {
                if app.index_concurrency == 0 {
                    app.index_concurrency = app.region_concurrency;
                }
                if app.table_concurrency == 0 {
                    app.table_concurrency = app.region_concurrency;
                }
            }
        }

        if app.io_concurrency == 0 {
            app.io_concurrency = DEFAULT_IO_CONCURRENCY;
        }

        match backend {
            BackendKind::Local if self.tikv_importer.sorted_kv_dir.is_empty() => {
                Err(ConfigError::invalid(
                    "tikv-importer.sorted-kv-dir",
                    "must not be empty when using the 'local' backend",
                ))
            }
            BackendKind::Tidb => {
                let on_duplicate = self.tikv_importer.on_duplicate.to_ascii_lowercase();
                match on_duplicate.as_str() {
                    ON_DUPLICATE_REPLACE | ON_DUPLICATE_IGNORE | ON_DUPLICATE_ERROR => {
                        self.tikv_importer.on_duplicate = on_duplicate;
                        Ok(())
                    }
                    _ => Err(ConfigError::invalid(
                        "tikv-importer.on-duplicate",
                        format!(
                            "unsupported value ({}), expected one of replace, ignore, error",
                            self.tikv_importer.on_duplicate
                        ),
                    )),
                }
            }
            _ => Ok(()),
        }
    }

    fn adjust_security(&mut self) -> ConfigResult<()> {
        let security = self
            .tidb
            .security
            .get_or_insert_with(|| self.security.clone());
        let has_ca = !security.ca_path.is_empty();

        match self.tidb.tls.as_str() {
            "" => {
                self.tidb.tls = if has_ca { TLS_CLUSTER } else { TLS_DISABLED }.to_string();
            }
            TLS_CLUSTER if !has_ca => {
                return Err(ConfigError::invalid(
                    "tidb.tls",
                    "cannot be 'cluster' without `tidb.security.ca-path` or `security.ca-path`",
                ));
            }
            // false, skip-verify, preferred, cluster with a CA, or a named profile
            _ => {}
        }
        Ok(())
    }

    fn adjust_csv(&self) -> ConfigResult<()> {
        let csv = &self.mydumper.csv;

        if csv.separator.len() != 1 {
            return Err(ConfigError::invalid(
                "mydumper.csv.separator",
                "must be exactly one byte long",
            ));
        }
        if csv.delimiter.len() > 1 {
            return Err(ConfigError::invalid(
                "mydumper.csv.delimiter",
                "must be one byte long or empty",
            ));
        }
        if csv.separator == csv.delimiter {
            return Err(ConfigError::invalid(
                "mydumper.csv.delimiter",
                "cannot be the same character as `mydumper.csv.separator`",
            ));
        }
        if csv.backslash_escape {
            if csv.separator == "\\" {
                return Err(ConfigError::invalid(
                    "mydumper.csv.separator",
                    "cannot be '\\' when `mydumper.csv.backslash-escape` is true",
                ));
            }
            if csv.delimiter == "\\" {
                return Err(ConfigError::invalid(
                    "mydumper.csv.delimiter",
                    "cannot be '\\' when `mydumper.csv.backslash-escape` is true",
                ));
            }
        }
        Ok(())
    }

    fn adjust_routes(&mut self) -> ConfigResult<()> {
        let case_sensitive = self.mydumper.case_sensitive;
        for (i, route) in self.routes.iter_mut().enumerate() {
            if !case_sensitive {
                route.schema_pattern = route.schema_pattern.to_lowercase();
                route.table_pattern = route.table_pattern.to_lowercase();
                route.target_schema = route.target_schema.to_lowercase();
                route.target_table = route.target_table.to_lowercase();
            }

            if route.schema_pattern.is_empty() {
                return Err(ConfigError::invalid(
                    format!("routes.{}.schema-pattern", i),
                    "schema pattern of table route rule should not be empty",
                ));
            }
            if route.target_schema.is_empty() {
                return Err(ConfigError::invalid(
                    format!("routes.{}.target-schema", i),
                    "target schema of table route rule should not be empty",
                ));
            }
            if !route.table_pattern.is_empty() && route.target_table.is_empty() {
                return Err(ConfigError::invalid(
                    format!("routes.{}.target-table", i),
                    "target table of table route rule should not be empty when `table-pattern` is set",
                ));
            }
            if route.table_pattern.is_empty() && !route.target_table.is_empty() {
                return Err(ConfigError::invalid(
                    format!("routes.{}.table-pattern", i),
                    "table pattern of table route rule should not be empty when `target-table` is set",
                ));
            }
        }
        Ok(())
    }

    fn adjust_sql_mode(&self) -> ConfigResult<()> {
        SqlMode::parse(&self.tidb.sql_mode).map_err(|e| {
            ConfigError::invalid("tidb.sql-mode", format!("must be a valid SQL_MODE: {}", e))
        })?;
        Ok(())
    }

    fn adjust_tuning(&mut self) {
        let mydumper = &mut self.mydumper;
        if !(0.0..1.0).contains(&mydumper.batch_import_ratio) {
            mydumper.batch_import_ratio = DEFAULT_BATCH_IMPORT_RATIO;
        }
        if mydumper.read_block_size == 0 {
            mydumper.read_block_size = DEFAULT_READ_BLOCK_SIZE;
        }
        if mydumper.batch_size == 0 {
            mydumper.batch_size = DEFAULT_BATCH_SIZE;
        }
        if mydumper.max_region_size == 0 {
            mydumper.max_region_size = DEFAULT_MAX_REGION_SIZE;
        }
        if self.tidb.max_allowed_packet == 0 {
            self.tidb.max_allowed_packet = DEFAULT_MAX_ALLOWED_PACKET;
        }
        if self.tikv_importer.region_split_size == 0 {
            self.tikv_importer.region_split_size = DEFAULT_REGION_SPLIT_SIZE;
        }
        if self.tikv_importer.send_kv_pairs == 0 {
            self.tikv_importer.send_kv_pairs = DEFAULT_SEND_KV_PAIRS;
        }
    }

    fn adjust_checkpoint(&mut self) -> ConfigResult<()> {
        if self.checkpoint.schema.is_empty() {
            self.checkpoint.schema = DEFAULT_CHECKPOINT_SCHEMA.to_string();
        }
        if self.checkpoint.driver.is_empty() {
            self.checkpoint.driver = CHECKPOINT_DRIVER_FILE.to_string();
        }
        self.checkpoint.driver = self.checkpoint.driver.to_ascii_lowercase();

        match self.checkpoint.driver.as_str() {
            CHECKPOINT_DRIVER_FILE => {
                if self.checkpoint.dsn.is_empty() {
                    self.checkpoint.dsn = format!("/tmp/{}.pb", self.checkpoint.schema);
                }
            }
            CHECKPOINT_DRIVER_MYSQL => {
                if self.checkpoint.dsn.is_empty() {
                    self.checkpoint.dsn = self.checkpoint_connect_param().to_dsn();
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    "checkpoint.driver",
                    format!("unknown checkpoint driver ({}), expected 'file' or 'mysql'", other),
                ));
            }
        }
        Ok(())
    }

    /// Connection used by the `mysql` checkpoint driver: the cluster's
    /// credentials with server-default session settings.
    pub fn checkpoint_connect_param(&self) -> MySqlConnectParam {
        MySqlConnectParam {
            sql_mode: DEFAULT_SQL_MODE.to_string(),
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            vars: Default::default(),
            ..self.connect_param()
        }
    }
}
