// ── Policy store boundary ──
//
// The engine reads desired state from, and writes subscriber usage back
// to, an external policy store. `PolicyStore` is the narrow surface it
// needs; `MemoryStore` is the in-process implementation used by the CLI
// and tests.

mod collection;
pub mod ledger;
mod memory;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{
    BandwidthRule, BindingId, CdnBandwidthRule, Device, DeviceId, RuleId, Service, ServiceId,
    ServiceTrafficBinding, Subscriber, SubscriberId, TrafficClass, TrafficClassId,
};

pub use ledger::{PushKey, PushLedger};
pub use memory::{MemoryStore, PolicySnapshot};

/// Read access to policy entities plus the two subscriber writes the
/// FUP enforcer performs. Every call is a single read or write.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn devices(&self) -> Result<Vec<Device>, CoreError>;
    async fn device(&self, id: DeviceId) -> Result<Option<Device>, CoreError>;

    async fn traffic_classes(&self) -> Result<Vec<TrafficClass>, CoreError>;
    async fn traffic_class(&self, id: TrafficClassId) -> Result<Option<TrafficClass>, CoreError>;

    async fn bindings(&self) -> Result<Vec<ServiceTrafficBinding>, CoreError>;
    async fn binding(&self, id: BindingId) -> Result<Option<ServiceTrafficBinding>, CoreError>;

    async fn services(&self) -> Result<Vec<Service>, CoreError>;
    async fn service(&self, id: ServiceId) -> Result<Option<Service>, CoreError>;

    async fn bandwidth_rules(&self) -> Result<Vec<BandwidthRule>, CoreError>;
    async fn cdn_bandwidth_rules(&self) -> Result<Vec<CdnBandwidthRule>, CoreError>;

    async fn subscribers(&self) -> Result<Vec<Subscriber>, CoreError>;
    async fn subscriber(&self, id: SubscriberId) -> Result<Option<Subscriber>, CoreError>;

    /// Persist a subscriber's usage state.
    async fn save_subscriber(&self, subscriber: &Subscriber) -> Result<(), CoreError>;

    /// Write the rate-limit attribute returned on the subscriber's next
    /// RADIUS authentication.
    async fn set_reply_rate(&self, username: &str, rate: &str) -> Result<(), CoreError>;

    async fn bandwidth_rule(&self, id: RuleId) -> Result<Option<BandwidthRule>, CoreError> {
        Ok(self.bandwidth_rules().await?.into_iter().find(|r| r.id == id))
    }

    async fn cdn_bandwidth_rule(&self, id: RuleId) -> Result<Option<CdnBandwidthRule>, CoreError> {
        Ok(self
            .cdn_bandwidth_rules()
            .await?
            .into_iter()
            .find(|r| r.id == id))
    }

    async fn traffic_class_by_name(&self, name: &str) -> Result<Option<TrafficClass>, CoreError> {
        Ok(self
            .traffic_classes()
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }
}
