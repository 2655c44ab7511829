// SPDX-License-Identifier: Apache-2.0

//! The configuration document
//!
//! Every section deserializes with conservative defaults and rejects unknown
//! keys. [`Config::adjust`](crate::adjust) resolves whatever is left open.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use loadctl_common::{MySqlConnectParam, TlsFiles};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::duration::Duration;
use crate::error::{ConfigError, ConfigResult};
use crate::sql_mode::DEFAULT_IMPORT_SQL_MODE;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = KIB << 10;
pub const GIB: u64 = MIB << 10;

pub const DEFAULT_MAX_ALLOWED_PACKET: u64 = 64 * MIB;
pub const DEFAULT_CHECKPOINT_SCHEMA: &str = "tidb_lightning_checkpoint";

pub const CHECKPOINT_DRIVER_FILE: &str = "file";
pub const CHECKPOINT_DRIVER_MYSQL: &str = "mysql";

pub const ON_DUPLICATE_REPLACE: &str = "replace";
pub const ON_DUPLICATE_IGNORE: &str = "ignore";
pub const ON_DUPLICATE_ERROR: &str = "error";

const REDACTED: &str = "******";

/// Which import pipeline is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// External import service
    Importer,
    /// In-process import engine
    Local,
    /// Plain SQL statements
    Tidb,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Importer => "importer",
            Self::Local => "local",
            Self::Tidb => "tidb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "importer" => Ok(Self::Importer),
            "local" => Ok(Self::Local),
            "tidb" => Ok(Self::Tidb),
            _ => Err(ConfigError::invalid(
                "tikv-importer.backend",
                format!("unsupported backend ({})", s),
            )),
        }
    }
}

/// `[lightning]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct AppConfig {
    pub level: String,
    pub file: String,
    pub region_concurrency: usize,
    pub index_concurrency: usize,
    pub table_concurrency: usize,
    pub io_concurrency: usize,
    pub check_requirements: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: String::new(),
            region_concurrency: 0,
            index_concurrency: 0,
            table_concurrency: 0,
            io_concurrency: 0,
            check_requirements: true,
        }
    }
}

/// `[security]` and `[tidb.security]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Security {
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
}

impl Security {
    pub fn tls_files(&self) -> TlsFiles {
        TlsFiles {
            ca_path: self.ca_path.clone(),
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
        }
    }
}

/// `[tidb]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct TidbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub status_port: u16,
    pub pd_addr: String,
    pub sql_mode: String,
    pub tls: String,
    pub max_allowed_packet: u64,
    pub build_stats_concurrency: usize,
    pub distsql_scan_concurrency: usize,
    pub index_serial_scan_concurrency: usize,
    pub checksum_table_concurrency: usize,
    /// Absent means "inherit the global `[security]` section"; an empty
    /// table is an explicit override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
}

impl Default for TidbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            user: "root".to_string(),
            password: String::new(),
            status_port: 10080,
            pd_addr: String::new(),
            sql_mode: DEFAULT_IMPORT_SQL_MODE.to_string(),
            tls: String::new(),
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            build_stats_concurrency: 20,
            distsql_scan_concurrency: 100,
            index_serial_scan_concurrency: 20,
            checksum_table_concurrency: 16,
            security: None,
        }
    }
}

/// `[tikv-importer]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct TikvImporterConfig {
    pub backend: String,
    pub addr: String,
    pub on_duplicate: String,
    pub sorted_kv_dir: String,
    pub region_split_size: u64,
    pub send_kv_pairs: usize,
}

impl Default for TikvImporterConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Importer.as_str().to_string(),
            addr: String::new(),
            on_duplicate: ON_DUPLICATE_REPLACE.to_string(),
            sorted_kv_dir: String::new(),
            region_split_size: 0,
            send_kv_pairs: 0,
        }
    }
}

impl TikvImporterConfig {
    /// The backend as a closed enum. Meaningful after adjustment.
    pub fn backend_kind(&self) -> ConfigResult<BackendKind> {
        self.backend.parse()
    }
}

/// `[mydumper.csv]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CsvConfig {
    pub separator: String,
    pub delimiter: String,
    pub header: bool,
    pub trim_last_separator: bool,
    pub not_null: bool,
    pub null: String,
    pub backslash_escape: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            separator: ",".to_string(),
            delimiter: "\"".to_string(),
            header: true,
            trim_last_separator: false,
            not_null: false,
            null: "\\N".to_string(),
            backslash_escape: true,
        }
    }
}

/// `[mydumper]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct MydumperConfig {
    pub read_block_size: u64,
    pub batch_size: u64,
    pub batch_import_ratio: f64,
    pub data_source_dir: String,
    pub character_set: String,
    pub case_sensitive: bool,
    pub strict_format: bool,
    pub max_region_size: u64,
    pub no_schema: bool,
    pub csv: CsvConfig,
}

impl Default for MydumperConfig {
    fn default() -> Self {
        Self {
            read_block_size: 64 * KIB,
            batch_size: 100 * GIB,
            batch_import_ratio: 0.75,
            data_source_dir: String::new(),
            character_set: "auto".to_string(),
            case_sensitive: false,
            strict_format: false,
            max_region_size: 256 * MIB,
            no_schema: false,
            csv: CsvConfig::default(),
        }
    }
}

/// `[checkpoint]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CheckpointConfig {
    pub enable: bool,
    pub schema: String,
    pub driver: String,
    pub dsn: String,
    pub keep_after_success: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enable: true,
            schema: DEFAULT_CHECKPOINT_SCHEMA.to_string(),
            driver: CHECKPOINT_DRIVER_FILE.to_string(),
            dsn: String::new(),
            keep_after_success: false,
        }
    }
}

/// `[post-restore]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct PostRestoreConfig {
    pub checksum: bool,
    pub analyze: bool,
    pub level_1_compact: bool,
    pub compact: bool,
}

impl Default for PostRestoreConfig {
    fn default() -> Self {
        Self {
            checksum: true,
            analyze: true,
            level_1_compact: false,
            compact: false,
        }
    }
}

/// `[cron]`: intervals of periodic background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct CronConfig {
    /// How often the importer is put back into import mode.
    pub switch_mode: Duration,
    /// How often progress is logged.
    pub log_progress: Duration,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            switch_mode: Duration::from_secs(5 * 60),
            log_progress: Duration::from_secs(5 * 60),
        }
    }
}

/// One `[[routes]]` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct TableRoute {
    pub schema_pattern: String,
    pub table_pattern: String,
    pub target_schema: String,
    pub target_table: String,
}

/// The whole document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    #[serde(rename = "lightning")]
    pub app: AppConfig,
    pub tidb: TidbConfig,
    pub security: Security,
    pub tikv_importer: TikvImporterConfig,
    pub mydumper: MydumperConfig,
    pub checkpoint: CheckpointConfig,
    pub post_restore: PostRestoreConfig,
    pub cron: CronConfig,
    pub routes: Vec<TableRoute>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a standalone document on top of the defaults.
    pub fn from_toml_str(document: &str) -> ConfigResult<Self> {
        let mut config = Self::default();
        config.load_from_toml(document)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config file");
        Self::from_toml_str(&document)
    }

    /// Merges `document` into this configuration. Keys the document does not
    /// mention keep their current values.
    pub fn load_from_toml(&mut self, document: &str) -> ConfigResult<()> {
        // Typed parse first so typos and type errors report their location.
        toml::from_str::<Config>(document).map_err(|e| ConfigError::parse(e.to_string()))?;

        let overlay: toml::Table = document
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::parse(e.to_string()))?;
        let mut merged = toml::Value::try_from(&*self)
            .map_err(|e| ConfigError::Serialize { message: e.to_string() })?;
        merge_toml(&mut merged, toml::Value::Table(overlay));

        *self = merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::parse(e.to_string()))?;
        Ok(())
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        serde_json::to_string(self).map_err(|e| ConfigError::Serialize { message: e.to_string() })
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        serde_json::from_str(json).map_err(|e| ConfigError::parse(e.to_string()))
    }

    /// JSON form with credentials masked, for logs.
    pub fn redacted_json(&self) -> ConfigResult<String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| ConfigError::Serialize { message: e.to_string() })?;
        if let Some(password) = value.pointer_mut("/tidb/password") {
            if password.as_str().is_some_and(|p| !p.is_empty()) {
                *password = REDACTED.into();
            }
        }
        if let Some(dsn) = value.pointer_mut("/checkpoint/dsn") {
            if self.checkpoint.driver == CHECKPOINT_DRIVER_MYSQL && !self.checkpoint.dsn.is_empty() {
                *dsn = REDACTED.into();
            }
        }
        Ok(value.to_string())
    }

    fn effective_security(&self) -> &Security {
        self.tidb.security.as_ref().unwrap_or(&self.security)
    }

    /// Connection parameters for import sessions.
    pub fn connect_param(&self) -> MySqlConnectParam {
        let mut param = MySqlConnectParam {
            host: self.tidb.host.clone(),
            port: self.tidb.port,
            user: self.tidb.user.clone(),
            password: self.tidb.password.clone(),
            sql_mode: self.tidb.sql_mode.clone(),
            max_allowed_packet: self.tidb.max_allowed_packet,
            tls: self.tidb.tls.clone(),
            tls_files: self.effective_security().tls_files(),
            vars: Default::default(),
        };

        for (name, value) in [
            ("tidb_build_stats_concurrency", self.tidb.build_stats_concurrency),
            ("tidb_distsql_scan_concurrency", self.tidb.distsql_scan_concurrency),
            (
                "tidb_index_serial_scan_concurrency",
                self.tidb.index_serial_scan_concurrency,
            ),
            (
                "tidb_checksum_table_concurrency",
                self.tidb.checksum_table_concurrency,
            ),
        ] {
            param.vars.insert(name.to_string(), value.to_string());
        }
        param
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.redacted_json() {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("<unserializable config>"),
        }
    }
}

fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
