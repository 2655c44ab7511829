// SPDX-License-Identifier: Apache-2.0

//! Connection parameters for the cluster's SQL layer
//!
//! The same parameters render a go-sql-driver style DSN (stored in checkpoint
//! descriptors and logs) and open an SQLx pool.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use tracing::{debug, instrument, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::ClusterResult;
use crate::sql::{MySqlHandle, SqlHandle};

pub const TLS_DISABLED: &str = "false";
pub const TLS_SKIP_VERIFY: &str = "skip-verify";
pub const TLS_PREFERRED: &str = "preferred";
pub const TLS_CLUSTER: &str = "cluster";

/// Bytes left as is in DSN variable values; space becomes `+`.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Certificate files backing the `cluster` and named TLS modes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
}

/// Parameters needed to connect to the cluster's SQL endpoint
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MySqlConnectParam {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub sql_mode: String,
    pub max_allowed_packet: u64,
    pub tls: String,
    pub tls_files: TlsFiles,
    pub vars: BTreeMap<String, String>,
}

impl fmt::Debug for MySqlConnectParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnectParam")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("sql_mode", &self.sql_mode)
            .field("max_allowed_packet", &self.max_allowed_packet)
            .field("tls", &self.tls)
            .field("vars", &self.vars)
            .finish()
    }
}

impl MySqlConnectParam {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

    /// Renders the DSN
    /// `user:password@tcp(host:port)/?charset=utf8mb4&sql_mode='..'&maxAllowedPacket=..&tls=..`
    /// followed by one query-escaped `&key=value` per session variable.
    pub fn to_dsn(&self) -> String {
        let mut dsn = format!(
            "{}:{}@tcp({}:{})/?charset=utf8mb4&sql_mode='{}'&maxAllowedPacket={}&tls={}",
            self.user,
            self.password,
            self.host,
            self.port,
            self.sql_mode,
            self.max_allowed_packet,
            self.tls
        );

        for (key, value) in &self.vars {
            dsn.push('&');
            dsn.push_str(key);
            dsn.push('=');
            push_query_escaped(&mut dsn, value);
        }

        dsn
    }

    fn ssl_mode(&self) -> MySqlSslMode {
        match self.tls.as_str() {
            "" | TLS_DISABLED => MySqlSslMode::Disabled,
            TLS_SKIP_VERIFY => MySqlSslMode::Required,
            TLS_PREFERRED => MySqlSslMode::Preferred,
            TLS_CLUSTER => MySqlSslMode::VerifyCa,
            _ => MySqlSslMode::VerifyIdentity,
        }
    }

    /// Builds SQLx connect options from these parameters.
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .charset("utf8mb4")
            .ssl_mode(self.ssl_mode());

        if !self.tls_files.ca_path.is_empty() {
            options = options.ssl_ca(&self.tls_files.ca_path);
        }
        if !self.tls_files.cert_path.is_empty() {
            options = options.ssl_client_cert(&self.tls_files.cert_path);
        }
        if !self.tls_files.key_path.is_empty() {
            options = options.ssl_client_key(&self.tls_files.key_path);
        }
        options
    }

    /// Statements run on every new pooled connection to apply the session
    /// `sql_mode` and variables.
    pub fn session_statements(&self) -> Vec<(String, String)> {
        let mut statements = Vec::with_capacity(self.vars.len() + 1);
        statements.push((
            "SET SESSION sql_mode = ?".to_string(),
            self.sql_mode.clone(),
        ));
        for (name, value) in &self.vars {
            if !is_variable_name(name) {
                warn!(variable = %name, "skipping session variable with invalid name");
                continue;
            }
            statements.push((format!("SET SESSION {} = ?", name), value.clone()));
        }
        statements
    }

    /// Opens a pooled handle and checks it is alive.
    pub async fn connect(&self) -> ClusterResult<MySqlHandle> {
        self.connect_with_timeout(Self::CONNECT_TIMEOUT).await
    }

    /// Like [`connect`](Self::connect), giving up on the first connection
    /// after `acquire_timeout`.
    #[instrument(skip(self), fields(host = %self.host, port = self.port, tls = %self.tls))]
    pub async fn connect_with_timeout(
        &self,
        acquire_timeout: Duration,
    ) -> ClusterResult<MySqlHandle> {
        let statements = self.session_statements();
        let pool = MySqlPoolOptions::new()
            .acquire_timeout(acquire_timeout)
            .after_connect(move |conn, _meta| {
                let statements = statements.clone();
                Box::pin(async move {
                    for (sql, value) in &statements {
                        sqlx::query(sql.as_str())
                            .bind(value.as_str())
                            .execute(&mut *conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .connect_lazy_with(self.connect_options());

        let handle = MySqlHandle::new(pool);
        handle
            .ping()
            .await
            .map_err(|e| e.annotate("connect failed"))?;

        debug!("connected to cluster SQL endpoint");
        Ok(handle)
    }
}

fn push_query_escaped(out: &mut String, value: &str) {
    for (i, part) in value.split(' ').enumerate() {
        if i > 0 {
            out.push('+');
        }
        out.extend(utf8_percent_encode(part, QUERY_VALUE));
    }
}

fn is_variable_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param() -> MySqlConnectParam {
        MySqlConnectParam {
            host: "172.16.30.11".into(),
            port: 4001,
            user: "guest".into(),
            password: "12345".into(),
            sql_mode: "ONLY_FULL_GROUP_BY,NO_AUTO_CREATE_USER".into(),
            max_allowed_packet: 67_108_864,
            tls: TLS_DISABLED.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_to_dsn_without_vars() {
        assert_eq!(
            param().to_dsn(),
            "guest:12345@tcp(172.16.30.11:4001)/?charset=utf8mb4&sql_mode='ONLY_FULL_GROUP_BY,NO_AUTO_CREATE_USER'&maxAllowedPacket=67108864&tls=false"
        );
    }

    #[test]
    fn test_to_dsn_appends_escaped_vars_in_order() {
        let mut p = param();
        p.vars.insert("tidb_distsql_scan_concurrency".into(), "15".into());
        p.vars.insert("tidb_build_stats_concurrency".into(), "20".into());
        p.vars.insert("time_zone".into(), "+08:00 x&y".into());

        let dsn = p.to_dsn();
        assert!(dsn.ends_with(
            "&tls=false&tidb_build_stats_concurrency=20&tidb_distsql_scan_concurrency=15&time_zone=%2B08%3A00+x%26y"
        ));
        assert_eq!(dsn, p.to_dsn());
    }

    #[test]
    fn test_to_dsn_escapes_like_query_strings() {
        let mut p = param();
        p.vars.insert("v".into(), "a~b*c d/é".into());
        assert!(
            p.to_dsn().ends_with("&tls=false&v=a~b%2Ac+d%2F%C3%A9"),
            "{}",
            p.to_dsn()
        );
    }

    #[test]
    fn test_session_statements_skip_bad_names() {
        let mut p = param();
        p.vars.insert("tidb_build_stats_concurrency".into(), "20".into());
        p.vars.insert("x; DROP TABLE t".into(), "1".into());

        let statements = p.session_statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].0, "SET SESSION sql_mode = ?");
        assert_eq!(
            statements[1],
            (
                "SET SESSION tidb_build_stats_concurrency = ?".to_string(),
                "20".to_string()
            )
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", param());
        assert!(!rendered.contains("12345"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_with_annotation() {
        use crate::error::ClusterError;
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let p = MySqlConnectParam {
            host: "127.0.0.1".into(),
            port,
            user: "root".into(),
            tls: TLS_DISABLED.into(),
            ..Default::default()
        };
        let err = match p.connect_with_timeout(Duration::from_secs(1)).await {
            Ok(_) => panic!("connected to a closed port"),
            Err(err) => err,
        };

        assert!(err.to_string().starts_with("connect failed"), "{}", err);
        assert!(
            matches!(
                err.cause(),
                ClusterError::Network(_) | ClusterError::DeadlineExceeded
            ),
            "{:?}",
            err
        );
    }

    #[test]
    fn test_ssl_mode_mapping() {
        let mut p = param();
        assert!(matches!(p.ssl_mode(), MySqlSslMode::Disabled));
        p.tls = TLS_CLUSTER.into();
        assert!(matches!(p.ssl_mode(), MySqlSslMode::VerifyCa));
        p.tls = TLS_SKIP_VERIFY.into();
        assert!(matches!(p.ssl_mode(), MySqlSslMode::Required));
        p.tls = "custom-profile".into();
        assert!(matches!(p.ssl_mode(), MySqlSslMode::VerifyIdentity));
    }
}
