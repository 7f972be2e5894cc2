// ── Domain model ──
//
// Desired-state policy entities as held by the policy store, plus the
// subscriber usage state the FUP enforcer mutates.

pub mod ids;
pub mod policy;
pub mod rules;
pub mod subscriber;

pub use ids::{BindingId, DeviceId, RuleId, ServiceId, SubscriberId, TrafficClassId};
pub use policy::{BindingWindow, Device, ServiceTrafficBinding, TrafficClass};
pub use rules::{
    BandwidthRule, CdnBandwidthRule, DaySet, Multiplier, Schedule, TimeWindow, Trigger,
};
pub use subscriber::{FupTier, MAX_FUP_TIERS, Rate, ResetKind, Service, Subscriber};
