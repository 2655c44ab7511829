// SPDX-License-Identifier: Apache-2.0

//! Cluster topology discovery through the SQL node's status endpoint

use loadctl_common::JsonFetcher;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{ConfigError, ConfigResult};

/// What the status endpoint reports about the running cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    /// SQL port, `None` when the node reports none.
    pub port: Option<u16>,
    /// First usable placement driver address.
    pub pd_addr: String,
}

#[derive(Debug, Deserialize)]
struct StatusSettings {
    #[serde(default)]
    port: Option<PortField>,
    #[serde(rename = "advertise-address", default)]
    advertise_address: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(i64),
    Text(String),
}

impl PortField {
    fn resolve(&self) -> ConfigResult<Option<u16>> {
        let raw = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::fetch_settings(format!("invalid port {:?}", s)))?,
        };
        match raw {
            0 => Ok(None),
            1..=65535 => Ok(Some(raw as u16)),
            _ => Err(ConfigError::fetch_settings(format!("invalid port {}", raw))),
        }
    }
}

pub fn settings_url(host: &str, status_port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}/settings", host, status_port)
    } else {
        format!("http://{}:{}/settings", host, status_port)
    }
}

/// Extracts the first usable `host:port` from a comma separated list of
/// addresses, each optionally carrying a scheme, a path or a query.
pub fn first_address(list: &str) -> Option<String> {
    list.split(',').find_map(|entry| {
        let mut addr = entry.trim();
        if let Some((_, rest)) = addr.split_once("://") {
            addr = rest;
        }
        let addr = addr.split(['/', '?']).next().unwrap_or_default().trim();
        (!addr.is_empty()).then(|| addr.to_string())
    })
}

fn decode(body: Value) -> ConfigResult<ClusterTopology> {
    let settings: StatusSettings = serde_json::from_value(body)
        .map_err(|e| ConfigError::fetch_settings(format!("cannot decode settings: {}", e)))?;

    let port = match &settings.port {
        Some(port) => port.resolve()?,
        None => None,
    };

    let (source, list) = match settings.advertise_address.as_deref() {
        Some(advertise) if !advertise.is_empty() => ("advertise-address", advertise),
        _ => ("path", settings.path.as_deref().unwrap_or_default()),
    };
    let pd_addr = first_address(list).ok_or_else(|| {
        ConfigError::fetch_settings(format!("no usable address in `{}` ({:?})", source, list))
    })?;

    Ok(ClusterTopology { port, pd_addr })
}

/// Asks the SQL node at `host:status_port` for its SQL port and the
/// placement driver address. Issues exactly one request and never retries.
#[instrument(skip(fetcher))]
pub async fn fetch_cluster_topology(
    fetcher: &dyn JsonFetcher,
    host: &str,
    status_port: u16,
) -> ConfigResult<ClusterTopology> {
    let url = settings_url(host, status_port);
    let body = fetcher
        .get_json(&url)
        .await
        .map_err(|e| ConfigError::fetch_settings(e.to_string()))?;
    let topology = decode(body)?;
    debug!(port = ?topology.port, pd_addr = %topology.pd_addr, "fetched cluster topology");
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_address() {
        assert_eq!(
            first_address("123.45.67.89:1234,56.78.90.12:3456").as_deref(),
            Some("123.45.67.89:1234")
        );
        assert_eq!(
            first_address(" , http://pd-0.pd:2379/pd/api?x=1").as_deref(),
            Some("pd-0.pd:2379")
        );
        assert_eq!(first_address(",,"), None);
        assert_eq!(first_address(""), None);
    }

    #[test]
    fn test_settings_url_brackets_ipv6() {
        assert_eq!(settings_url("127.0.0.1", 10080), "http://127.0.0.1:10080/settings");
        assert_eq!(settings_url("::1", 10080), "http://[::1]:10080/settings");
    }

    #[test]
    fn test_decode_prefers_advertise_address() {
        let topology = decode(json!({
            "port": 6666,
            "advertise-address": "121.212.121.212:5555",
            "path": "34.34.34.34:3434",
        }))
        .unwrap();
        assert_eq!(topology.port, Some(6666));
        assert_eq!(topology.pd_addr, "121.212.121.212:5555");
    }

    #[test]
    fn test_decode_falls_back_to_path() {
        let topology = decode(json!({
            "port": "4444",
            "advertise-address": "",
            "path": "123.45.67.89:1234,56.78.90.12:3456",
        }))
        .unwrap();
        assert_eq!(topology.port, Some(4444));
        assert_eq!(topology.pd_addr, "123.45.67.89:1234");
    }

    #[test]
    fn test_decode_without_address_fails() {
        let err = decode(json!({"port": 1234, "path": ",,"})).unwrap_err();
        assert!(matches!(err, ConfigError::FetchSettings { .. }));

        let err = decode(json!({})).unwrap_err();
        assert!(err.to_string().starts_with("cannot fetch settings from cluster"));
    }

    #[test]
    fn test_decode_bad_port() {
        assert!(decode(json!({"port": 70000, "path": "a:1"})).is_err());
        assert!(decode(json!({"port": "abc", "path": "a:1"})).is_err());
        assert_eq!(
            decode(json!({"port": 0, "path": "a:1"})).unwrap().port,
            None
        );
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(decode(json!("invalid-string")).is_err());
    }
}
