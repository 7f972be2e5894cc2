// ── In-memory policy store ──

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use super::PolicyStore;
use super::collection::EntityCollection;
use crate::error::CoreError;
use crate::model::{
    BandwidthRule, BindingId, CdnBandwidthRule, Device, DeviceId, RuleId, Service, ServiceId,
    ServiceTrafficBinding, Subscriber, SubscriberId, TrafficClass, TrafficClassId,
};

/// Every policy entity at one point in time, as loaded from a file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicySnapshot {
    pub devices: Vec<Device>,
    pub traffic_classes: Vec<TrafficClass>,
    pub bindings: Vec<ServiceTrafficBinding>,
    pub services: Vec<Service>,
    pub bandwidth_rules: Vec<BandwidthRule>,
    pub cdn_bandwidth_rules: Vec<CdnBandwidthRule>,
    pub subscribers: Vec<Subscriber>,
}

impl PolicySnapshot {
    /// Check the cross-record constraints a relational store would enforce.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut names = HashSet::new();
        for class in &self.traffic_classes {
            if !names.insert(class.name.as_str()) {
                return Err(CoreError::validation(format!(
                    "duplicate traffic class name '{}'",
                    class.name
                )));
            }
            class.parsed_subnets()?;
            class.explicit_devices()?;
        }
        for binding in &self.bindings {
            binding.validate()?;
        }
        for service in &self.services {
            service.validate()?;
        }
        Ok(())
    }
}

/// `PolicyStore` backed by concurrent in-process collections.
pub struct MemoryStore {
    devices: EntityCollection<DeviceId, Device>,
    classes: EntityCollection<TrafficClassId, TrafficClass>,
    bindings: EntityCollection<BindingId, ServiceTrafficBinding>,
    services: EntityCollection<ServiceId, Service>,
    bandwidth_rules: EntityCollection<RuleId, BandwidthRule>,
    cdn_rules: EntityCollection<RuleId, CdnBandwidthRule>,
    subscribers: EntityCollection<SubscriberId, Subscriber>,
    reply_rates: DashMap<String, String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            devices: EntityCollection::new(),
            classes: EntityCollection::new(),
            bindings: EntityCollection::new(),
            services: EntityCollection::new(),
            bandwidth_rules: EntityCollection::new(),
            cdn_rules: EntityCollection::new(),
            subscribers: EntityCollection::new(),
            reply_rates: DashMap::new(),
        }
    }

    /// Build a store from a validated snapshot.
    pub fn from_snapshot(snapshot: PolicySnapshot) -> Result<Self, CoreError> {
        let store = Self::new();
        store.load(snapshot)?;
        Ok(store)
    }

    /// Replace every collection with the snapshot's contents.
    pub fn load(&self, snapshot: PolicySnapshot) -> Result<(), CoreError> {
        snapshot.validate()?;
        self.devices
            .replace_all(snapshot.devices.into_iter().map(|d| (d.id, d)));
        self.classes
            .replace_all(snapshot.traffic_classes.into_iter().map(|c| (c.id, c)));
        self.bindings
            .replace_all(snapshot.bindings.into_iter().map(|b| (b.id, b)));
        self.services
            .replace_all(snapshot.services.into_iter().map(|s| (s.id, s)));
        self.bandwidth_rules
            .replace_all(snapshot.bandwidth_rules.into_iter().map(|r| (r.id, r)));
        self.cdn_rules
            .replace_all(snapshot.cdn_bandwidth_rules.into_iter().map(|r| (r.id, r)));
        self.subscribers
            .replace_all(snapshot.subscribers.into_iter().map(|s| (s.id, s)));
        Ok(())
    }

    // ── Direct mutation (policy CRUD stand-in) ───────────────────────

    pub fn upsert_device(&self, device: Device) {
        self.devices.upsert(device.id, device);
    }

    pub fn upsert_traffic_class(&self, class: TrafficClass) {
        self.classes.upsert(class.id, class);
    }

    pub fn upsert_binding(&self, binding: ServiceTrafficBinding) {
        self.bindings.upsert(binding.id, binding);
    }

    pub fn remove_binding(&self, id: BindingId) -> Option<ServiceTrafficBinding> {
        self.bindings.remove(&id).map(|b| (*b).clone())
    }

    pub fn upsert_service(&self, service: Service) {
        self.services.upsert(service.id, service);
    }

    pub fn upsert_bandwidth_rule(&self, rule: BandwidthRule) {
        self.bandwidth_rules.upsert(rule.id, rule);
    }

    pub fn upsert_cdn_bandwidth_rule(&self, rule: CdnBandwidthRule) {
        self.cdn_rules.upsert(rule.id, rule);
    }

    pub fn upsert_subscriber(&self, subscriber: Subscriber) {
        self.subscribers.upsert(subscriber.id, subscriber);
    }

    /// Current reply rate-limit attribute for a username.
    pub fn reply_rate(&self, username: &str) -> Option<String> {
        self.reply_rates.get(username).map(|r| r.value().clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

fn cloned<T: Clone>(items: Vec<std::sync::Arc<T>>) -> Vec<T> {
    items.iter().map(|a| (**a).clone()).collect()
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn devices(&self) -> Result<Vec<Device>, CoreError> {
        Ok(cloned(self.devices.snapshot()))
    }

    async fn device(&self, id: DeviceId) -> Result<Option<Device>, CoreError> {
        Ok(self.devices.get(&id).map(|d| (*d).clone()))
    }

    async fn traffic_classes(&self) -> Result<Vec<TrafficClass>, CoreError> {
        Ok(cloned(self.classes.snapshot()))
    }

    async fn traffic_class(&self, id: TrafficClassId) -> Result<Option<TrafficClass>, CoreError> {
        Ok(self.classes.get(&id).map(|c| (*c).clone()))
    }

    async fn bindings(&self) -> Result<Vec<ServiceTrafficBinding>, CoreError> {
        Ok(cloned(self.bindings.snapshot()))
    }

    async fn binding(&self, id: BindingId) -> Result<Option<ServiceTrafficBinding>, CoreError> {
        Ok(self.bindings.get(&id).map(|b| (*b).clone()))
    }

    async fn services(&self) -> Result<Vec<Service>, CoreError> {
        Ok(cloned(self.services.snapshot()))
    }

    async fn service(&self, id: ServiceId) -> Result<Option<Service>, CoreError> {
        Ok(self.services.get(&id).map(|s| (*s).clone()))
    }

    async fn bandwidth_rules(&self) -> Result<Vec<BandwidthRule>, CoreError> {
        Ok(cloned(self.bandwidth_rules.snapshot()))
    }

    async fn cdn_bandwidth_rules(&self) -> Result<Vec<CdnBandwidthRule>, CoreError> {
        Ok(cloned(self.cdn_rules.snapshot()))
    }

    async fn subscribers(&self) -> Result<Vec<Subscriber>, CoreError> {
        Ok(cloned(self.subscribers.snapshot()))
    }

    async fn subscriber(&self, id: SubscriberId) -> Result<Option<Subscriber>, CoreError> {
        Ok(self.subscribers.get(&id).map(|s| (*s).clone()))
    }

    async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<(), CoreError> {
        if self.subscribers.get(&subscriber.id).is_none() {
            return Err(CoreError::not_found("subscriber", subscriber.id));
        }
        self.subscribers.upsert(subscriber.id, subscriber.clone());
        Ok(())
    }

    async fn set_reply_rate(&self, username: &str, rate: &str) -> Result<(), CoreError> {
        self.reply_rates.insert(username.to_owned(), rate.to_owned());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn class(id: u64, name: &str) -> TrafficClass {
        TrafficClass {
            id: TrafficClassId(id),
            name: name.into(),
            color: String::new(),
            subnets: "1.2.3.0/24".into(),
            device_ids: String::new(),
            active: true,
        }
    }

    #[test]
    fn duplicate_class_names_rejected() {
        let snapshot = PolicySnapshot {
            traffic_classes: vec![class(1, "Netflix"), class(2, "Netflix")],
            ..PolicySnapshot::default()
        };
        assert!(matches!(
            MemoryStore::from_snapshot(snapshot),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn malformed_subnets_rejected_on_load() {
        let mut bad = class(1, "Bad");
        bad.subnets = "not-a-net".into();
        let snapshot = PolicySnapshot {
            traffic_classes: vec![bad],
            ..PolicySnapshot::default()
        };
        assert!(matches!(
            MemoryStore::from_snapshot(snapshot),
            Err(CoreError::InvalidSubnetList { .. })
        ));
    }

    #[tokio::test]
    async fn lookups_by_id_and_name() {
        let store = MemoryStore::from_snapshot(PolicySnapshot {
            traffic_classes: vec![class(2, "YouTube"), class(1, "Netflix")],
            ..PolicySnapshot::default()
        })
        .unwrap();

        let names: Vec<String> = store
            .traffic_classes()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Netflix", "YouTube"]);
        assert_eq!(
            store.traffic_class_by_name("YouTube").await.unwrap().unwrap().id,
            TrafficClassId(2)
        );
        assert!(store.traffic_class(TrafficClassId(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saving_unknown_subscriber_fails() {
        let store = MemoryStore::new();
        let sub: Subscriber = serde_json::from_value(serde_json::json!({
            "id": 1, "username": "ghost", "service_id": 1
        }))
        .unwrap();
        assert!(store.save_subscriber(&sub).await.is_err());
        store.upsert_subscriber(sub.clone());
        assert!(store.save_subscriber(&sub).await.is_ok());
    }

    #[tokio::test]
    async fn reply_rate_round_trip() {
        let store = MemoryStore::new();
        store.set_reply_rate("alice", "5120k/20480k").await.unwrap();
        assert_eq!(store.reply_rate("alice").as_deref(), Some("5120k/20480k"));
    }
}
