// SPDX-License-Identifier: Apache-2.0

//! Human readable durations such as `5m` or `13m20s`

use std::fmt;
use std::str::FromStr;
use std::time;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration: {message}")]
pub struct DurationError {
    pub message: String,
}

/// A duration written as text in config documents and their JSON form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(pub time::Duration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(time::Duration::from_secs(secs))
    }

    pub fn as_std(&self) -> time::Duration {
        self.0
    }
}

impl From<time::Duration> for Duration {
    fn from(d: time::Duration) -> Self {
        Self(d)
    }
}

impl FromStr for Duration {
    type Err = DurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        humantime::parse_duration(value.trim())
            .map(Self)
            .map_err(|e| DurationError {
                message: match e {
                    humantime::DurationError::UnknownUnit { unit, .. } => {
                        format!("unknown unit {} in duration {}", unit, value)
                    }
                    other => format!("{} in duration {}", other, value),
                },
            })
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // humantime separates components with spaces; the document form does not.
        let text = humantime::format_duration(self.0).to_string();
        f.write_str(&text.replace(' ', ""))
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a duration such as \"5m\" or \"1h30m\"")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compound() {
        let d: Duration = "13m20s".parse().unwrap();
        assert_eq!(d.as_std().as_secs(), 13 * 60 + 20);
    }

    #[test]
    fn test_unknown_unit_is_rejected() {
        let err = "13x20s".parse::<Duration>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid duration: unknown unit x in duration 13x20s"
        );
    }

    #[test]
    fn test_display_has_no_spaces() {
        assert_eq!(Duration::from_secs(800).to_string(), "13m20s");
        assert_eq!(Duration::from_secs(300).to_string(), "5m");
        assert_eq!(Duration::default().to_string(), "0s");
    }

    #[test]
    fn test_json_form() {
        let d: Duration = "13m20s".parse().unwrap();
        assert_eq!(serde_json::to_string(&d).unwrap(), r#""13m20s""#);
        let back: Duration = serde_json::from_str(r#""13m20s""#).unwrap();
        assert_eq!(back, d);
        assert!(serde_json::from_str::<Duration>("800").is_err());
    }
}
