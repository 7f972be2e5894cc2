use thiserror::Error;

/// Top-level error type for the `nasshape-api` crate.
///
/// Covers every failure mode of both device-facing channels: the router
/// management REST API and the RADIUS CoA/Disconnect channel.
/// `nasshape-core` maps these into engine-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The router rejected the management credentials.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Router API ──────────────────────────────────────────────────
    /// Structured error returned by the router management API.
    #[error("Router API error (HTTP {status}): {message}")]
    RouterApi { message: String, status: u16 },

    // ── RADIUS ──────────────────────────────────────────────────────
    /// Socket-level failure on the CoA channel.
    #[error("RADIUS socket error: {0}")]
    RadiusIo(#[from] std::io::Error),

    /// The NAS answered with CoA-NAK / Disconnect-NAK.
    #[error("RADIUS request rejected by NAS: {reason}")]
    RadiusNak { reason: String },

    /// The reply could not be parsed or failed authenticator verification.
    #[error("Malformed RADIUS reply: {0}")]
    RadiusMalformed(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A request argument could not be encoded for the target protocol.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::RouterApi { status, .. } => *status >= 500,
            Self::Timeout { .. } | Self::RadiusIo(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::RouterApi { status: 404, .. } => true,
            _ => false,
        }
    }
}
