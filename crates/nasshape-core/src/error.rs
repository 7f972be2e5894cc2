// ── Core error types ──
//
// Errors surfaced by the engine's produced operations. Device failures
// inside dispatched jobs never reach these callers; they are logged by
// the dispatcher. The `From<nasshape_api::Error>` impl covers the few
// synchronous paths that talk to a device or build a client.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lookup errors ────────────────────────────────────────────────
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    // ── Configuration errors (rejected before any device work) ──────
    #[error("Invalid subnet list {input:?}: {reason}")]
    InvalidSubnetList { input: String, reason: String },

    #[error("Invalid device list {input:?}: {reason}")]
    InvalidDeviceList { input: String, reason: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("Policy store error: {message}")]
    Store { message: String },

    #[error("Device {device}: {message}")]
    Device { device: String, message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<nasshape_api::Error> for CoreError {
    fn from(err: nasshape_api::Error) -> Self {
        use nasshape_api::Error as Api;

        match err {
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            Api::InvalidRequest(msg) => CoreError::Validation { message: msg },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::Transport(e) => CoreError::Device {
                device: e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_else(|| "<unknown>".into()),
                message: format!("HTTP transport error: {e}"),
            },
            other => CoreError::Device {
                device: "<unknown>".into(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_api_errors_become_device_errors() {
        let err: CoreError = nasshape_api::Error::RouterApi {
            message: "busy".into(),
            status: 503,
        }
        .into();
        assert!(matches!(err, CoreError::Device { .. }));
    }

    #[test]
    fn not_found_display() {
        let err = CoreError::not_found("subscriber", 42);
        assert_eq!(err.to_string(), "subscriber not found: 42");
    }
}
