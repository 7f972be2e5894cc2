// ── Usage accounting ──
//
// Folds live session counters into a subscriber's period usage. The
// stored baseline is the part of the live counters already accounted
// for; only what lies beyond it is new traffic.

use serde::Serialize;

use crate::model::{FupTier, MAX_FUP_TIERS, Service, Subscriber, SubscriberId};

/// Bytes generated since `baseline`. A live counter below the baseline
/// means the session restarted, so all of it is new.
pub fn incremental(live: u64, baseline: u64) -> u64 {
    if live >= baseline { live - baseline } else { live }
}

/// How many tiers `used` has crossed. Tiers with a zero threshold are
/// treated as unconfigured.
pub fn tier_level(tiers: &[FupTier], used: u64) -> u8 {
    let crossed = tiers
        .iter()
        .take(MAX_FUP_TIERS)
        .filter(|t| t.threshold_bytes > 0 && t.threshold_bytes <= used)
        .count();
    u8::try_from(crossed).unwrap_or(u8::MAX)
}

/// Result of one accounting pass for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub subscriber_id: SubscriberId,
    pub download: u64,
    pub upload: u64,
    pub daily_fup_level: u8,
    pub monthly_fup_level: u8,
    /// Whether either FUP level went up in this pass.
    pub escalated: bool,
}

/// Account live counters `(download, upload)` against the subscriber's
/// baseline and escalate FUP levels. Levels never go down here; only a
/// reset lowers them.
pub fn apply_usage(
    subscriber: &mut Subscriber,
    service: &Service,
    live_download: u64,
    live_upload: u64,
) -> UsageReport {
    let download = incremental(live_download, subscriber.last_session_download);
    let upload = incremental(live_upload, subscriber.last_session_upload);
    let total = download.saturating_add(upload);

    subscriber.daily_download = subscriber.daily_download.saturating_add(download);
    subscriber.daily_upload = subscriber.daily_upload.saturating_add(upload);
    subscriber.monthly_download = subscriber.monthly_download.saturating_add(download);
    subscriber.monthly_upload = subscriber.monthly_upload.saturating_add(upload);
    subscriber.daily_quota_used = subscriber.daily_quota_used.saturating_add(total);
    subscriber.monthly_quota_used = subscriber.monthly_quota_used.saturating_add(total);
    subscriber.last_session_download = live_download;
    subscriber.last_session_upload = live_upload;

    let before = (subscriber.daily_fup_level, subscriber.monthly_fup_level);
    subscriber.daily_fup_level = subscriber
        .daily_fup_level
        .max(tier_level(&service.daily_tiers, subscriber.daily_quota_used));
    subscriber.monthly_fup_level = subscriber
        .monthly_fup_level
        .max(tier_level(&service.monthly_tiers, subscriber.monthly_quota_used));

    UsageReport {
        subscriber_id: subscriber.id,
        download,
        upload,
        daily_fup_level: subscriber.daily_fup_level,
        monthly_fup_level: subscriber.monthly_fup_level,
        escalated: (subscriber.daily_fup_level, subscriber.monthly_fup_level) != before,
    }
}
