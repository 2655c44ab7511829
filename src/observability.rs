// SPDX-License-Identifier: Apache-2.0

//! Logging setup driven by the `[lightning]` section.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use loadctl_config::AppConfig;

use crate::bootstrap::{BootstrapError, BootstrapResult};

/// Env var checked before `RUST_LOG` to override the configured level.
pub const LOG_ENV: &str = "LOADCTL_LOG";

/// Maps a configured level name onto a tracing filter directive.
pub fn filter_directive(level: &str) -> BootstrapResult<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "" | "info" => Ok("info"),
        "debug" => Ok("debug"),
        "trace" => Ok("trace"),
        "warn" | "warning" => Ok("warn"),
        "error" | "fatal" => Ok("error"),
        other => Err(BootstrapError::Logging(format!(
            "unsupported log level ({})",
            other
        ))),
    }
}

fn env_filter(level: &str) -> BootstrapResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::new(filter_directive(level)?))
}

/// Installs the global JSON subscriber. Logs go to `app.file` when set,
/// stderr otherwise. Keep the returned guard alive until exit so buffered
/// lines are flushed.
pub fn init_tracing(app: &AppConfig) -> BootstrapResult<Option<WorkerGuard>> {
    let filter = env_filter(&app.level)?;

    let (writer, guard) = if app.file.is_empty() {
        (BoxMakeWriter::new(std::io::stderr), None)
    } else {
        let path = Path::new(&app.file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| BootstrapError::Logging(format!("invalid log file ({})", app.file)))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| BootstrapError::Logging(format!("cannot create {}: {}", dir.display(), e)))?;

        let appender = tracing_appender::rolling::never(dir, name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        (BoxMakeWriter::new(non_blocking), Some(guard))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .try_init()
        .map_err(|e| BootstrapError::Logging(e.to_string()))?;

    install_panic_hook();
    tracing::info!(level = %app.level, file = %app.file, "logger initialized");
    Ok(guard)
}

fn install_panic_hook() {
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown cause".to_string()
        };

        tracing::error!(target: "panic", location = %location, message = %message, "loadctl panicked");
        previous_hook(panic_info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("").unwrap(), "info");
        assert_eq!(filter_directive("DEBUG").unwrap(), "debug");
        assert_eq!(filter_directive("warning").unwrap(), "warn");
        assert_eq!(filter_directive("fatal").unwrap(), "error");
        assert!(filter_directive("loud").is_err());
    }
}
