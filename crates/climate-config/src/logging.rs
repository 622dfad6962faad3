// ── Tracing setup ──
//
// One subscriber for the process: an EnvFilter (RUST_LOG wins over the
// configured level), text or JSON lines, to stderr or a file through
// tracing-appender's non-blocking writer.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ConfigError;

/// Output line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `"info"` or `"climate_core=debug,info"`.
    pub level: String,
    pub format: LogFormat,
    /// Write here instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Parse the configured level into a filter.
pub fn filter_for(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level).map_err(|e| ConfigError::Logging(format!("invalid level '{level}': {e}")))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process when logging to a file; dropping it flushes.
pub fn init_tracing(settings: &LoggingSettings) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(&settings.level)?,
    };

    let (writer, guard) = match &settings.file {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(settings.file.is_none())
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter);

    match settings.format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    }
    .map_err(|e| ConfigError::Logging(e.to_string()))?;

    Ok(guard)
}

fn split_log_path(path: &Path) -> (&Path, &OsStr) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let name = path.file_name().unwrap_or(OsStr::new("climate-hub.log"));
    (dir, name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_directives() {
        assert!(filter_for("debug").is_ok());
        assert!(filter_for("climate_core=trace,info").is_ok());
        assert!(matches!(
            filter_for("climate_core=loudest"),
            Err(ConfigError::Logging(_))
        ));
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        let (dir, name) = split_log_path(Path::new("hub.log"));
        assert_eq!(dir, Path::new("."));
        assert_eq!(name, "hub.log");

        let (dir, name) = split_log_path(Path::new("/var/log/climate/hub.log"));
        assert_eq!(dir, Path::new("/var/log/climate"));
        assert_eq!(name, "hub.log");
    }
}
