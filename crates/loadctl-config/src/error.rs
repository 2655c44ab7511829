// SPDX-License-Identifier: Apache-2.0

//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while loading or adjusting a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field violates a structural or semantic rule.
    #[error("invalid config: `{field}` {reason}")]
    Invalid { field: String, reason: String },

    /// Topology discovery failed; terminal for the adjustment pass.
    #[error(
        "cannot fetch settings from cluster: {message}, please manually fill in `tidb.port` and `tidb.pd-addr`"
    )]
    FetchSettings { message: String },

    #[error("cannot parse config file: {message}")]
    Parse { message: String },

    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize config: {message}")]
    Serialize { message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn fetch_settings(message: impl Into<String>) -> Self {
        Self::FetchSettings {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// The dotted path of the offending field, for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
