//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use nasshape_config::ConfigError;
use nasshape_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFIG: i32 = 6;
    pub const DEVICE: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Policy snapshot ──────────────────────────────────────────────

    #[error("No policy snapshot given")]
    #[diagnostic(
        code(nasshape::no_policy),
        help(
            "Pass --policy <snapshot.toml>, set NASSHAPE_POLICY,\n\
             or set `policy = \"...\"` in {config}"
        )
    )]
    NoPolicy { config: String },

    #[error("Could not read policy snapshot {}", .path.display())]
    #[diagnostic(code(nasshape::policy_read))]
    PolicyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Policy snapshot {} is not valid TOML", .path.display())]
    #[diagnostic(
        code(nasshape::policy_parse),
        help("The snapshot holds [[devices]], [[traffic_classes]], [[bindings]], [[services]], [[bandwidth_rules]], [[cdn_bandwidth_rules]] and [[subscribers]] tables.")
    )]
    PolicyParse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{entity} '{identifier}' not found")]
    #[diagnostic(
        code(nasshape::not_found),
        help("Check the ids and names in the policy snapshot.")
    )]
    NotFound { entity: String, identifier: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(nasshape::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(nasshape::config),
        help("Inspect the effective configuration with: nasshape config show")
    )]
    Config(#[from] ConfigError),

    // ── Devices / store ──────────────────────────────────────────────

    #[error("Device {device}: {message}")]
    #[diagnostic(
        code(nasshape::device),
        help("Check that the router is reachable and its API credentials are correct.")
    )]
    Device { device: String, message: String },

    #[error(transparent)]
    #[diagnostic(code(nasshape::engine))]
    Engine(CoreError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(nasshape::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            Self::NoPolicy { .. }
            | Self::PolicyRead { .. }
            | Self::PolicyParse { .. }
            | Self::Config(_) => exit_code::CONFIG,
            Self::Device { .. } => exit_code::DEVICE,
            Self::Engine(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { entity, identifier } => CliError::NotFound {
                entity: entity.into(),
                identifier,
            },

            CoreError::InvalidSubnetList { input, reason } => CliError::Validation {
                field: "subnets".into(),
                reason: format!("{input:?}: {reason}"),
            },

            CoreError::InvalidDeviceList { input, reason } => CliError::Validation {
                field: "devices".into(),
                reason: format!("{input:?}: {reason}"),
            },

            CoreError::Validation { message } => CliError::Validation {
                field: "policy".into(),
                reason: message,
            },

            CoreError::Device { device, message } => CliError::Device { device, message },

            other => CliError::Engine(other),
        }
    }
}
