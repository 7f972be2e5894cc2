// ── Subscriber and service plan types ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ids::{DeviceId, ServiceId, SubscriberId};
use super::rules::{Multiplier, scale};

/// Most FUP tiers a service may define per period.
pub const MAX_FUP_TIERS: usize = 3;

/// A download/upload rate pair in kbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub download_kbps: u32,
    pub upload_kbps: u32,
}

impl Rate {
    pub fn new(download_kbps: u32, upload_kbps: u32) -> Self {
        Self {
            download_kbps,
            upload_kbps,
        }
    }

    pub fn scaled(self, m: Multiplier) -> Self {
        Self {
            download_kbps: scale(self.download_kbps, m.download),
            upload_kbps: scale(self.upload_kbps, m.upload),
        }
    }
}

/// Renders as a `Mikrotik-Rate-Limit` value: `upload/download` from the
/// subscriber's side, as the NAS expects.
impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k/{}k", self.upload_kbps, self.download_kbps)
    }
}

/// One FUP throttle step: once usage reaches `threshold_bytes`, the
/// subscriber drops to this explicit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FupTier {
    pub threshold_bytes: u64,
    pub download_kbps: u32,
    pub upload_kbps: u32,
}

impl FupTier {
    pub fn rate(&self) -> Rate {
        Rate::new(self.download_kbps, self.upload_kbps)
    }
}

/// A billable service plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub download_kbps: u32,
    pub upload_kbps: u32,
    #[serde(default)]
    pub daily_tiers: Vec<FupTier>,
    #[serde(default)]
    pub monthly_tiers: Vec<FupTier>,
}

impl Service {
    pub fn contracted(&self) -> Rate {
        Rate::new(self.download_kbps, self.upload_kbps)
    }

    /// The rate a subscriber on this plan should have right now.
    ///
    /// At level 0 on both axes this is the contracted rate scaled by the
    /// bandwidth multiplier. Any FUP level overrides the multiplier with
    /// the tier's explicit rate. When both axes are throttled the monthly
    /// table wins ties and higher levels.
    pub fn effective_rate(&self, daily_level: u8, monthly_level: u8, multiplier: Multiplier) -> Rate {
        let (table, level) = if monthly_level > 0 && monthly_level >= daily_level {
            (&self.monthly_tiers, monthly_level)
        } else {
            (&self.daily_tiers, daily_level)
        };
        if level == 0 {
            return self.contracted().scaled(multiplier);
        }
        let idx = usize::from(level - 1);
        table
            .get(idx)
            .or_else(|| table.last())
            .map_or_else(|| self.contracted(), FupTier::rate)
    }

    pub fn validate(&self) -> Result<(), crate::error::CoreError> {
        for (label, tiers) in [("daily", &self.daily_tiers), ("monthly", &self.monthly_tiers)] {
            if tiers.len() > MAX_FUP_TIERS {
                return Err(crate::error::CoreError::validation(format!(
                    "service {}: at most {MAX_FUP_TIERS} {label} FUP tiers",
                    self.id
                )));
            }
            if tiers.windows(2).any(|w| w[0].threshold_bytes >= w[1].threshold_bytes) {
                return Err(crate::error::CoreError::validation(format!(
                    "service {}: {label} FUP thresholds must increase",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Accounting-only reset scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ResetKind {
    /// FUP levels and both quota counters.
    Fup,
    /// Daily quota and daily byte counters.
    Daily,
    /// Monthly quota and monthly byte counters.
    Monthly,
    All,
}

/// A subscriber and its billing-layer usage state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub username: String,
    pub service_id: ServiceId,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub online: bool,

    #[serde(default)]
    pub daily_fup_level: u8,
    #[serde(default)]
    pub monthly_fup_level: u8,
    #[serde(default)]
    pub daily_quota_used: u64,
    #[serde(default)]
    pub monthly_quota_used: u64,

    #[serde(default)]
    pub daily_download: u64,
    #[serde(default)]
    pub daily_upload: u64,
    #[serde(default)]
    pub monthly_download: u64,
    #[serde(default)]
    pub monthly_upload: u64,

    /// Live session counters already accounted for.
    #[serde(default)]
    pub last_session_download: u64,
    #[serde(default)]
    pub last_session_upload: u64,

    #[serde(default)]
    pub last_fup_reset: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_daily_reset: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_monthly_reset: Option<DateTime<Utc>>,
}

impl Subscriber {
    pub fn fup_level(&self) -> u8 {
        self.daily_fup_level.max(self.monthly_fup_level)
    }

    /// Zero the counters `kind` covers and stamp the matching reset times.
    pub fn reset(&mut self, kind: ResetKind, now: DateTime<Utc>) {
        if matches!(kind, ResetKind::Fup | ResetKind::All) {
            self.daily_fup_level = 0;
            self.monthly_fup_level = 0;
            self.daily_quota_used = 0;
            self.monthly_quota_used = 0;
            self.last_fup_reset = Some(now);
        }
        if matches!(kind, ResetKind::Daily | ResetKind::All) {
            self.daily_quota_used = 0;
            self.daily_download = 0;
            self.daily_upload = 0;
            self.last_daily_reset = Some(now);
        }
        if matches!(kind, ResetKind::Monthly | ResetKind::All) {
            self.monthly_quota_used = 0;
            self.monthly_download = 0;
            self.monthly_upload = 0;
            self.last_monthly_reset = Some(now);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tier(threshold_gb: u64, down: u32, up: u32) -> FupTier {
        FupTier {
            threshold_bytes: threshold_gb << 30,
            download_kbps: down,
            upload_kbps: up,
        }
    }

    fn service() -> Service {
        Service {
            id: ServiceId(1),
            name: "Home 20M".into(),
            download_kbps: 20_480,
            upload_kbps: 5_120,
            daily_tiers: vec![tier(5, 10_240, 2_048), tier(10, 4_096, 1_024)],
            monthly_tiers: vec![tier(100, 8_192, 2_048), tier(200, 2_048, 512), tier(300, 1_024, 256)],
        }
    }

    fn subscriber() -> Subscriber {
        Subscriber {
            id: SubscriberId(1),
            username: "alice".into(),
            service_id: ServiceId(1),
            device_id: Some(DeviceId(1)),
            online: true,
            daily_fup_level: 2,
            monthly_fup_level: 1,
            daily_quota_used: 11 << 30,
            monthly_quota_used: 120 << 30,
            daily_download: 9 << 30,
            daily_upload: 2 << 30,
            monthly_download: 100 << 30,
            monthly_upload: 20 << 30,
            last_session_download: 7,
            last_session_upload: 3,
            last_fup_reset: None,
            last_daily_reset: None,
            last_monthly_reset: None,
        }
    }

    #[test]
    fn level_zero_uses_contracted_rate_with_multiplier() {
        let rate = service().effective_rate(0, 0, Multiplier::uniform(200));
        assert_eq!(rate, Rate::new(40_960, 10_240));
    }

    #[test]
    fn fup_tier_ignores_multiplier() {
        let rate = service().effective_rate(1, 0, Multiplier::uniform(200));
        assert_eq!(rate, Rate::new(10_240, 2_048));
    }

    #[test]
    fn higher_axis_selects_table() {
        let svc = service();
        assert_eq!(svc.effective_rate(2, 1, Multiplier::NONE), Rate::new(4_096, 1_024));
        assert_eq!(svc.effective_rate(1, 3, Multiplier::NONE), Rate::new(1_024, 256));
        assert_eq!(svc.effective_rate(2, 2, Multiplier::NONE), Rate::new(2_048, 512));
    }

    #[test]
    fn missing_tier_falls_back_to_last() {
        assert_eq!(
            service().effective_rate(3, 0, Multiplier::NONE),
            Rate::new(4_096, 1_024)
        );
    }

    #[test]
    fn rate_renders_upload_first() {
        assert_eq!(Rate::new(20_480, 5_120).to_string(), "5120k/20480k");
    }

    #[test]
    fn too_many_tiers_rejected() {
        let mut svc = service();
        svc.daily_tiers.push(tier(20, 1, 1));
        svc.daily_tiers.push(tier(30, 1, 1));
        assert!(svc.validate().is_err());
        assert!(service().validate().is_ok());
    }

    #[test]
    fn monthly_reset_keeps_fup_levels() {
        let mut sub = subscriber();
        let now = Utc::now();
        sub.reset(ResetKind::Monthly, now);
        assert_eq!(sub.monthly_quota_used, 0);
        assert_eq!(sub.monthly_download, 0);
        assert_eq!(sub.daily_fup_level, 2);
        assert_eq!(sub.monthly_fup_level, 1);
        assert_eq!(sub.daily_quota_used, 11 << 30);
        assert_eq!(sub.last_monthly_reset, Some(now));
        assert_eq!(sub.last_fup_reset, None);
    }

    #[test]
    fn fup_reset_clears_levels_and_quotas_only() {
        let mut sub = subscriber();
        sub.reset(ResetKind::Fup, Utc::now());
        assert_eq!(sub.fup_level(), 0);
        assert_eq!(sub.daily_quota_used, 0);
        assert_eq!(sub.monthly_quota_used, 0);
        assert_eq!(sub.daily_download, 9 << 30);
    }

    #[test]
    fn all_reset_is_the_union() {
        let mut sub = subscriber();
        sub.reset(ResetKind::All, Utc::now());
        assert_eq!(sub.fup_level(), 0);
        assert_eq!(
            (sub.daily_download, sub.daily_upload, sub.monthly_download, sub.monthly_upload),
            (0, 0, 0, 0)
        );
        assert!(sub.last_fup_reset.is_some());
        assert!(sub.last_daily_reset.is_some());
        assert!(sub.last_monthly_reset.is_some());
        // Baseline is owned by the live-session path, not the reset.
        assert_eq!(sub.last_session_download, 7);
    }

    #[test]
    fn reset_kind_parses_case_insensitively() {
        assert_eq!("Monthly".parse::<ResetKind>().unwrap(), ResetKind::Monthly);
        assert_eq!(ResetKind::All.to_string(), "all");
    }
}
