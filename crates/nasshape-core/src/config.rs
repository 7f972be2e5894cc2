// ── Runtime engine configuration ──
//
// Tuning for the per-device dispatcher, the bandwidth scheduler and the
// CoA channel. Never touches disk: the CLI builds an `EngineConfig` from
// `nasshape-config` and hands it in.

use std::time::Duration;

use nasshape_api::TransportConfig;

/// Standard RADIUS dynamic-authorization port (RFC 5176).
pub const DEFAULT_COA_PORT: u16 = 3799;

/// Per-device worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Jobs buffered per device before new ones are dropped.
    pub queue_capacity: usize,
    /// Attempts per job, including the first. Transient errors only.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub retry_backoff: Duration,
    /// Upper bound on the retry delay.
    pub retry_backoff_max: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
    }
}

/// RADIUS CoA channel settings shared by every device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoaSettings {
    pub timeout: Duration,
    /// Retransmissions after the first send.
    pub retries: u32,
    /// Used when a device does not set its own CoA port.
    pub default_port: u16,
}

impl Default for CoaSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            retries: 2,
            default_port: DEFAULT_COA_PORT,
        }
    }
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub dispatch: DispatchConfig,
    pub coa: CoaSettings,
    pub transport: TransportConfig,
    /// Bandwidth scheduler tick. Zero disables the scheduler.
    pub evaluation_interval: Duration,
}
