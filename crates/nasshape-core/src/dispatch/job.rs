// ── Device jobs ──

use std::fmt;

use ipnet::IpNet;
use nasshape_api::QueueSpec;
use serde::Serialize;

use crate::client::DeviceClient;
use crate::model::{DeviceId, Rate};

/// One unit of device-side work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeviceOp {
    /// Address list, then mark rules. The mark rules are skipped when the
    /// list push fails so a device never meters unclassified traffic.
    SyncClass {
        class_name: String,
        subnets: Vec<IpNet>,
    },
    RemoveClass {
        class_name: String,
    },
    SyncQueue {
        spec: QueueSpec,
    },
    RemoveQueue {
        class_name: String,
        speed_limit: u32,
    },
    /// Push a subscriber's rate live through the CoA then management path.
    PushRate {
        username: String,
        session_id: Option<String>,
        address: Option<String>,
        rate: Rate,
    },
}

impl DeviceOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncClass { .. } => "sync-class",
            Self::RemoveClass { .. } => "remove-class",
            Self::SyncQueue { .. } => "sync-queue",
            Self::RemoveQueue { .. } => "remove-queue",
            Self::PushRate { .. } => "push-rate",
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::RemoveClass { .. } | Self::RemoveQueue { .. })
    }

    /// Run a shaping op against a device client. `PushRate` goes through
    /// the fallback chain instead and is a no-op here.
    pub(crate) async fn run_shaping(&self, client: &dyn DeviceClient) -> Result<(), nasshape_api::Error> {
        match self {
            Self::SyncClass {
                class_name,
                subnets,
            } => {
                client.sync_address_list(class_name, subnets).await?;
                client.sync_mark_rule(class_name).await
            }
            Self::RemoveClass { class_name } => {
                client.remove_address_list_and_mark_rule(class_name).await
            }
            Self::SyncQueue { spec } => client.sync_queue_setup(spec).await,
            Self::RemoveQueue {
                class_name,
                speed_limit,
            } => client.remove_queue_setup(class_name, *speed_limit).await,
            Self::PushRate { .. } => Ok(()),
        }
    }
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncClass {
                class_name,
                subnets,
            } => write!(f, "sync-class {class_name} ({} subnets)", subnets.len()),
            Self::RemoveClass { class_name } => write!(f, "remove-class {class_name}"),
            Self::SyncQueue { spec } => write!(
                f,
                "sync-queue {} @{}k (rate {}k)",
                spec.class_name, spec.speed_limit, spec.rate_limit
            ),
            Self::RemoveQueue {
                class_name,
                speed_limit,
            } => write!(f, "remove-queue {class_name} @{speed_limit}k"),
            Self::PushRate { username, rate, .. } => write!(f, "push-rate {username} {rate}"),
        }
    }
}

/// A device op addressed to one device, as produced by a reconciliation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOp {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub op: DeviceOp,
}

impl PlannedOp {
    pub fn new(device_id: DeviceId, op: DeviceOp) -> Self {
        Self { device_id, op }
    }
}
