//! Configuration for climate-hub.
//!
//! TOML file + environment layering via figment, and translation to
//! `climate_core::CoordinatorConfig`. Durations are humantime strings
//! (`"300ms"`, `"5m"`). [`logging`] installs the tracing subscriber.

pub mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use climate_core::{BackoffConfig, CoordinatorConfig, ReconnectConfig};

pub use logging::{LogFormat, LoggingSettings, init_tracing};

/// Prefix for environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "CLIMATE_HUB_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub push: PushSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Refresh scheduling and cloud call limits.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSettings {
    pub debounce_window: String,
    pub idle_poll_interval: String,
    pub fetch_timeout: String,
    pub command_timeout: String,
    pub backoff_base: String,
    pub backoff_ceiling: String,
    pub throttle_min_delay: String,
    pub auth_escalation_after: u32,
    pub discovery_attempts: u32,
    pub shutdown_grace: String,
    pub stale_after: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_window: "300ms".into(),
            idle_poll_interval: "60s".into(),
            fetch_timeout: "10s".into(),
            command_timeout: "10s".into(),
            backoff_base: "2s".into(),
            backoff_ceiling: "2m".into(),
            throttle_min_delay: "30s".into(),
            auth_escalation_after: 3,
            discovery_attempts: 3,
            shutdown_grace: "2s".into(),
            stale_after: "5m".into(),
        }
    }
}

/// Push listener.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PushSettings {
    pub enabled: bool,
    pub reconnect_initial: String,
    pub reconnect_max: String,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_initial: "5s".into(),
            reconnect_max: "5m".into(),
        }
    }
}

/// Subscriber fan-out.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HubSettings {
    /// Undelivered updates kept per subscriber before the oldest is dropped.
    pub queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "climate-hub", "climate-hub").map_or_else(
        || PathBuf::from(".").join("climate-hub.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_from(&config_path())
}

/// Load from `path` + environment. A missing file means defaults.
///
/// Layering, last wins: defaults, the TOML file, `CLIMATE_HUB_*`
/// variables (`CLIMATE_HUB_SYNC__FETCH_TIMEOUT=5s`), then the plain
/// `LOG_LEVEL` / `LOG_FORMAT` / `LOG_FILE` variables.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(
            Env::raw()
                .only(&["LOG_LEVEL", "LOG_FORMAT", "LOG_FILE"])
                .map(|key| {
                    let field = key.as_str().to_ascii_lowercase();
                    let field = field.trim_start_matches("log_");
                    format!("logging.{field}").into()
                }),
        );

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and convert to the coordinator's runtime configuration.
    pub fn coordinator_config(&self) -> Result<CoordinatorConfig, ConfigError> {
        let sync = &self.sync;

        let fetch_backoff = BackoffConfig {
            base: non_zero("sync.backoff_base", &sync.backoff_base)?,
            ceiling: duration("sync.backoff_ceiling", &sync.backoff_ceiling)?,
        };
        if fetch_backoff.ceiling < fetch_backoff.base {
            return Err(invalid("sync.backoff_ceiling", "must not be below sync.backoff_base"));
        }

        let reconnect = ReconnectConfig {
            initial_delay: non_zero("push.reconnect_initial", &self.push.reconnect_initial)?,
            max_delay: duration("push.reconnect_max", &self.push.reconnect_max)?,
        };
        if reconnect.max_delay < reconnect.initial_delay {
            return Err(invalid("push.reconnect_max", "must not be below push.reconnect_initial"));
        }

        if sync.auth_escalation_after == 0 {
            return Err(invalid("sync.auth_escalation_after", "must be at least 1"));
        }
        if sync.discovery_attempts == 0 {
            return Err(invalid("sync.discovery_attempts", "must be at least 1"));
        }
        if self.hub.queue_capacity == 0 {
            return Err(invalid("hub.queue_capacity", "must be at least 1"));
        }

        let defaults = CoordinatorConfig::default();
        Ok(CoordinatorConfig {
            debounce_window: duration("sync.debounce_window", &sync.debounce_window)?,
            idle_poll_interval: non_zero("sync.idle_poll_interval", &sync.idle_poll_interval)?,
            fetch_timeout: non_zero("sync.fetch_timeout", &sync.fetch_timeout)?,
            command_timeout: non_zero("sync.command_timeout", &sync.command_timeout)?,
            fetch_backoff,
            throttle_min_delay: duration("sync.throttle_min_delay", &sync.throttle_min_delay)?,
            auth_escalation_after: sync.auth_escalation_after,
            discovery_attempts: sync.discovery_attempts,
            discovery_backoff: defaults.discovery_backoff,
            shutdown_grace: duration("sync.shutdown_grace", &sync.shutdown_grace)?,
            subscriber_queue_capacity: self.hub.queue_capacity,
            stale_after: non_zero("sync.stale_after", &sync.stale_after)?,
            push_enabled: self.push.enabled,
            reconnect,
        })
    }
}

fn duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|e| invalid(field, format!("'{raw}': {e}")))
}

fn non_zero(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let parsed = duration(field, raw)?;
    if parsed.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(parsed)
}
