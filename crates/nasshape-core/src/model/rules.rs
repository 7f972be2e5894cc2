// ── Bandwidth rule types ──
//
// Time-of-day / day-of-week schedules and the multipliers they apply.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};

use super::ids::{RuleId, ServiceId, TrafficClassId};

// ── TimeWindow ──────────────────────────────────────────────────────

/// A half-open `[start, end)` time-of-day window. When `end` is earlier
/// than `start` the window spans midnight; `start == end` covers the
/// whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        use std::cmp::Ordering;

        match self.start.cmp(&self.end) {
            Ordering::Less => self.start <= t && t < self.end,
            Ordering::Greater => t >= self.start || t < self.end,
            Ordering::Equal => true,
        }
    }
}

/// `HH:MM` (or `HH:MM:SS`) on the wire.
mod hhmm {
    use super::{Deserialize, Deserializer, NaiveTime, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{raw}': {e}")))
    }
}

// ── DaySet ──────────────────────────────────────────────────────────

/// Set of weekdays, stored as a bitmask (Monday = bit 0). An empty set
/// means every day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaySet(u8);

impl DaySet {
    pub const EVERY_DAY: Self = Self(0x7f);

    pub fn from_days(days: impl IntoIterator<Item = Weekday>) -> Self {
        Self(
            days.into_iter()
                .fold(0, |mask, d| mask | 1 << d.num_days_from_monday()),
        )
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 == 0 || self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn days(self) -> Vec<Weekday> {
        let mut day = Weekday::Mon;
        let mut out = Vec::new();
        for _ in 0..7 {
            if self.0 & (1 << day.num_days_from_monday()) != 0 {
                out.push(day);
            }
            day = day.succ();
        }
        out
    }
}

impl Serialize for DaySet {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(self.days().iter().map(ToString::to_string))
    }
}

impl<'de> Deserialize<'de> for DaySet {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(d)?;
        let days = names
            .iter()
            .map(|n| {
                n.trim()
                    .parse::<Weekday>()
                    .map_err(|_| serde::de::Error::custom(format!("unknown weekday '{n}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_days(days))
    }
}

// ── Trigger / Multiplier ────────────────────────────────────────────

/// What drives a rule. Only `Time` rules are applied by the scheduler;
/// the others are evaluated by the billing layer.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Trigger {
    #[default]
    Time,
    Quota,
    Fup,
}

/// Download/upload multipliers in percent. 100 leaves a rate unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Multiplier {
    pub download: u32,
    pub upload: u32,
}

impl Multiplier {
    pub const UNCHANGED: u32 = 100;
    pub const NONE: Self = Self {
        download: Self::UNCHANGED,
        upload: Self::UNCHANGED,
    };

    pub fn uniform(pct: u32) -> Self {
        Self {
            download: pct,
            upload: pct,
        }
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::NONE
    }
}

/// Scale a kbps rate by a percent multiplier.
pub fn scale(kbps: u32, pct: u32) -> u32 {
    let scaled = u64::from(kbps) * u64::from(pct) / 100;
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

// ── Rules ───────────────────────────────────────────────────────────

/// Time-and-day schedule fields shared by both rule kinds.
pub trait Schedule {
    fn rule_id(&self) -> RuleId;
    fn priority(&self) -> i32;
    fn enabled(&self) -> bool;
    fn trigger(&self) -> Trigger;
    fn window(&self) -> TimeWindow;
    fn days(&self) -> DaySet;

    /// Enabled, time-triggered, and inside its window on an allowed day.
    fn is_active_at(&self, now: NaiveDateTime) -> bool {
        self.enabled()
            && self.trigger() == Trigger::Time
            && self.days().contains(now.weekday())
            && self.window().contains(now.time())
    }
}

/// A per-service bandwidth rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(flatten)]
    pub window: TimeWindow,
    #[serde(default)]
    pub days: DaySet,
    #[serde(default = "unchanged")]
    pub download_multiplier: u32,
    #[serde(default = "unchanged")]
    pub upload_multiplier: u32,
    /// Services in scope. Empty applies to every service.
    #[serde(default)]
    pub service_ids: Vec<ServiceId>,
    /// Lower wins.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_apply: bool,
}

impl BandwidthRule {
    pub fn multiplier(&self) -> Multiplier {
        Multiplier {
            download: self.download_multiplier,
            upload: self.upload_multiplier,
        }
    }

    pub fn covers(&self, service: ServiceId) -> bool {
        self.service_ids.is_empty() || self.service_ids.contains(&service)
    }
}

/// A traffic-class bandwidth rule with one combined multiplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnBandwidthRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(flatten)]
    pub window: TimeWindow,
    #[serde(default)]
    pub days: DaySet,
    #[serde(default = "unchanged")]
    pub speed_multiplier: u32,
    /// Traffic classes in scope. Empty applies to every class.
    #[serde(default)]
    pub traffic_class_ids: Vec<TrafficClassId>,
    /// Optional further restriction to bindings of these services.
    #[serde(default)]
    pub service_ids: Vec<ServiceId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_apply: bool,
}

impl CdnBandwidthRule {
    pub fn covers(&self, class: TrafficClassId, service: ServiceId) -> bool {
        (self.traffic_class_ids.is_empty() || self.traffic_class_ids.contains(&class))
            && (self.service_ids.is_empty() || self.service_ids.contains(&service))
    }
}

macro_rules! impl_schedule {
    ($ty:ty) => {
        impl Schedule for $ty {
            fn rule_id(&self) -> RuleId {
                self.id
            }
            fn priority(&self) -> i32 {
                self.priority
            }
            fn enabled(&self) -> bool {
                self.enabled
            }
            fn trigger(&self) -> Trigger {
                self.trigger
            }
            fn window(&self) -> TimeWindow {
                self.window
            }
            fn days(&self) -> DaySet {
                self.days
            }
        }
    };
}

impl_schedule!(BandwidthRule);
impl_schedule!(CdnBandwidthRule);

fn unchanged() -> u32 {
    Multiplier::UNCHANGED
}

fn enabled() -> bool {
    true
}
