// SPDX-License-Identifier: Apache-2.0

//! SQL mode vocabulary accepted by the cluster's SQL layer

use std::fmt;

use thiserror::Error;

/// Session SQL mode the server starts with.
pub const DEFAULT_SQL_MODE: &str = "ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_AUTO_CREATE_USER,NO_ENGINE_SUBSTITUTION";

/// Relaxed SQL mode used for import sessions unless the document overrides it.
pub const DEFAULT_IMPORT_SQL_MODE: &str = "ONLY_FULL_GROUP_BY,NO_AUTO_CREATE_USER";

const MODE_NAMES: &[&str] = &[
    "REAL_AS_FLOAT",
    "PIPES_AS_CONCAT",
    "ANSI_QUOTES",
    "IGNORE_SPACE",
    "NOT_USED",
    "ONLY_FULL_GROUP_BY",
    "NO_UNSIGNED_SUBTRACTION",
    "NO_DIR_IN_CREATE",
    "POSTGRESQL",
    "ORACLE",
    "MSSQL",
    "DB2",
    "MAXDB",
    "NO_KEY_OPTIONS",
    "NO_TABLE_OPTIONS",
    "NO_FIELD_OPTIONS",
    "MYSQL323",
    "MYSQL40",
    "ANSI",
    "NO_AUTO_VALUE_ON_ZERO",
    "NO_BACKSLASH_ESCAPES",
    "STRICT_TRANS_TABLES",
    "STRICT_ALL_TABLES",
    "NO_ZERO_IN_DATE",
    "NO_ZERO_DATE",
    "INVALID_DATES",
    "ERROR_FOR_DIVISION_BY_ZERO",
    "TRADITIONAL",
    "NO_AUTO_CREATE_USER",
    "HIGH_NOT_PRECEDENCE",
    "NO_ENGINE_SUBSTITUTION",
    "PAD_CHAR_TO_FULL_LENGTH",
    "ALLOW_INVALID_DATES",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ERROR 1231 (42000): Variable 'sql_mode' can't be set to the value of '{value}'")]
pub struct SqlModeError {
    pub value: String,
}

/// A parsed, comma separated SQL mode list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlMode {
    modes: Vec<&'static str>,
}

impl SqlMode {
    /// Parses a mode list case-insensitively. Empty entries are ignored.
    pub fn parse(value: &str) -> Result<Self, SqlModeError> {
        let mut modes = Vec::new();
        for entry in value.split(',') {
            let name = entry.trim().to_ascii_uppercase();
            if name.is_empty() {
                continue;
            }
            let known = MODE_NAMES
                .iter()
                .copied()
                .find(|candidate| *candidate == name)
                .ok_or_else(|| SqlModeError {
                    value: value.to_string(),
                })?;
            if !modes.contains(&known) {
                modes.push(known);
            }
        }
        Ok(Self { modes })
    }

    pub fn contains(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m.eq_ignore_ascii_case(mode))
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

impl fmt::Display for SqlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.modes.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse() {
        assert!(SqlMode::parse(DEFAULT_SQL_MODE).is_ok());
        let mode = SqlMode::parse(DEFAULT_IMPORT_SQL_MODE).unwrap();
        assert!(mode.contains("only_full_group_by"));
        assert!(!mode.contains("STRICT_TRANS_TABLES"));
    }

    #[test]
    fn test_case_and_whitespace_are_normalised() {
        let mode = SqlMode::parse(" ansi_quotes , Strict_All_Tables,,").unwrap();
        assert_eq!(mode.to_string(), "ANSI_QUOTES,STRICT_ALL_TABLES");
    }

    #[test]
    fn test_empty_is_valid() {
        assert!(SqlMode::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = SqlMode::parse("invalid-sql-mode").unwrap_err();
        assert_eq!(
            err.to_string(),
            "ERROR 1231 (42000): Variable 'sql_mode' can't be set to the value of 'invalid-sql-mode'"
        );
    }
}
