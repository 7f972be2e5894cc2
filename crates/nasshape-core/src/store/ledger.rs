// ── PCQ push ledger ──
//
// Records which (class, speed tier, device) queue setups have been pushed,
// so a later binding edit knows what to tear down.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::model::{DeviceId, ServiceTrafficBinding, TrafficClassId};

/// Identity of one device-side PCQ setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PushKey {
    pub class_id: TrafficClassId,
    pub speed_limit: u32,
    pub device_id: DeviceId,
}

impl PushKey {
    /// Key of the setup a binding describes, if it describes one.
    pub fn of(binding: &ServiceTrafficBinding) -> Option<Self> {
        if !binding.active || !binding.has_pcq() {
            return None;
        }
        Some(Self {
            class_id: binding.traffic_class_id,
            speed_limit: binding.speed_limit,
            device_id: binding.device_id?,
        })
    }
}

/// Concurrent set of pushed setups, stamped with the last push time.
#[derive(Default)]
pub struct PushLedger {
    entries: DashMap<PushKey, DateTime<Utc>>,
}

impl PushLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a setup as pushed. Returns `true` if it was not tracked before.
    pub fn record(&self, key: PushKey) -> bool {
        self.entries.insert(key, Utc::now()).is_none()
    }

    /// Stop tracking a setup. Returns `true` if it was tracked.
    pub fn forget(&self, key: &PushKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &PushKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn last_pushed(&self, key: &PushKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|r| *r.value())
    }

    /// Every tracked setup for one traffic class.
    pub fn keys_for_class(&self, class_id: TrafficClassId) -> BTreeSet<PushKey> {
        self.entries
            .iter()
            .map(|r| *r.key())
            .filter(|k| k.class_id == class_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(class: u64, speed: u32, device: u64) -> PushKey {
        PushKey {
            class_id: TrafficClassId(class),
            speed_limit: speed,
            device_id: DeviceId(device),
        }
    }

    #[test]
    fn keys_with_same_parts_are_equal() {
        let ledger = PushLedger::new();
        assert!(ledger.record(key(1, 10_240, 2)));
        assert!(!ledger.record(key(1, 10_240, 2)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn components_never_alias() {
        // "1-12-3" vs "11-2-3" style collisions cannot happen with a struct key.
        let ledger = PushLedger::new();
        ledger.record(key(1, 12, 3));
        assert!(!ledger.contains(&key(11, 2, 3)));
    }

    #[test]
    fn forget_and_class_listing() {
        let ledger = PushLedger::new();
        ledger.record(key(1, 100, 1));
        ledger.record(key(1, 200, 2));
        ledger.record(key(2, 100, 1));

        assert_eq!(ledger.keys_for_class(TrafficClassId(1)).len(), 2);
        assert!(ledger.forget(&key(1, 100, 1)));
        assert!(!ledger.forget(&key(1, 100, 1)));
        assert_eq!(
            ledger.keys_for_class(TrafficClassId(1)),
            BTreeSet::from([key(1, 200, 2)])
        );
        assert!(ledger.last_pushed(&key(2, 100, 1)).is_some());
    }
}
