//! Configuration for the nasshape engine and CLI.
//!
//! Layered loading (built-in defaults, then a TOML file, then `NASSHAPE_`
//! environment variables), validation, and translation into
//! `nasshape_core::EngineConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nasshape_api::{TlsMode, TransportConfig};
use nasshape_core::{CoaSettings, DispatchConfig, EngineConfig};

/// Environment prefix. Nested keys use `__`, e.g.
/// `NASSHAPE_ENGINE__QUEUE_CAPACITY=128`.
pub const ENV_PREFIX: &str = "NASSHAPE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Policy snapshot loaded when `--policy` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PathBuf>,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub coa: CoaSection,
}

/// `[engine]`: dispatcher and scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Bandwidth rule evaluation period. 0 disables the scheduler.
    pub evaluation_interval_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_attempts: 3,
            retry_backoff_ms: 500,
            retry_backoff_max_ms: 10_000,
            evaluation_interval_secs: 60,
        }
    }
}

/// `[transport]`: router management API connections.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportSection {
    pub timeout_secs: u64,
    /// Accept self-signed router certificates.
    pub insecure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            insecure: true,
            ca_cert: None,
        }
    }
}

/// `[coa]`: RADIUS Change-of-Authorization channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoaSection {
    pub timeout_secs: u64,
    pub retries: u32,
    pub default_port: u16,
}

impl Default for CoaSection {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            retries: 2,
            default_port: nasshape_core::config::DEFAULT_COA_PORT,
        }
    }
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        if e.queue_capacity == 0 {
            return Err(invalid("engine.queue_capacity", "must be greater than 0"));
        }
        if e.max_attempts == 0 {
            return Err(invalid("engine.max_attempts", "must be at least 1"));
        }
        if e.retry_backoff_max_ms < e.retry_backoff_ms {
            return Err(invalid(
                "engine.retry_backoff_max_ms",
                "must not be below engine.retry_backoff_ms",
            ));
        }
        if self.transport.timeout_secs == 0 {
            return Err(invalid("transport.timeout_secs", "must be greater than 0"));
        }
        if self.coa.timeout_secs == 0 {
            return Err(invalid("coa.timeout_secs", "must be greater than 0"));
        }
        if self.coa.default_port == 0 {
            return Err(invalid("coa.default_port", "must be a valid UDP port"));
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let tls = match (&self.transport.ca_cert, self.transport.insecure) {
            (Some(path), _) => TlsMode::CustomCa(path.clone()),
            (None, true) => TlsMode::DangerAcceptInvalid,
            (None, false) => TlsMode::System,
        };
        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.transport.timeout_secs),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            dispatch: DispatchConfig {
                queue_capacity: self.engine.queue_capacity,
                max_attempts: self.engine.max_attempts,
                retry_backoff: Duration::from_millis(self.engine.retry_backoff_ms),
                retry_backoff_max: Duration::from_millis(self.engine.retry_backoff_max_ms),
            },
            coa: CoaSettings {
                timeout: Duration::from_secs(self.coa.timeout_secs),
                retries: self.coa.retries,
                default_port: self.coa.default_port,
            },
            transport: self.transport_config(),
            evaluation_interval: Duration::from_secs(self.engine.evaluation_interval_secs),
        }
    }

    /// Render as TOML, e.g. for `config show`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "nasshape", "nasshape").map_or_else(
        || PathBuf::from(".nasshape").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the platform config path (if present) and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (if present) and the environment, then validate.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Write `cfg` to `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cfg.to_toml()?)?;
    Ok(())
}
