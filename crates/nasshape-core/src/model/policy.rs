// ── Shaping policy types ──

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::NaiveTime;
use ipnet::IpNet;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ids::{BindingId, DeviceId, ServiceId, TrafficClassId};
use super::rules::{Multiplier, TimeWindow};
use crate::error::CoreError;
use crate::keyset;

/// A named traffic classification ("CDN"): the subnets a content network
/// serves from, and the routers that should classify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficClass {
    pub id: TrafficClassId,
    /// Globally unique; keys every artifact pushed to devices.
    pub name: String,
    #[serde(default)]
    pub color: String,
    /// Comma- or newline-separated networks, as entered by the operator.
    #[serde(default)]
    pub subnets: String,
    /// Comma-separated device ids. Empty targets every active device.
    #[serde(default)]
    pub device_ids: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl TrafficClass {
    pub fn parsed_subnets(&self) -> Result<Vec<IpNet>, CoreError> {
        keyset::parse_subnets(&self.subnets)
    }

    pub fn explicit_devices(&self) -> Result<BTreeSet<DeviceId>, CoreError> {
        keyset::parse_device_ids(&self.device_ids)
    }

    /// Devices this class targets given the currently active fleet.
    pub fn device_scope(&self, active: &BTreeSet<DeviceId>) -> Result<BTreeSet<DeviceId>, CoreError> {
        Ok(keyset::resolve_scope(&self.explicit_devices()?, active))
    }
}

/// Binds a traffic class to a service plan, optionally with a PCQ setup
/// on one router metering that class at the service's speed tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ServiceTrafficBinding {
    pub id: BindingId,
    pub service_id: ServiceId,
    pub traffic_class_id: TrafficClassId,
    /// Speed cap for this class on this service, in kbps.
    #[serde(default)]
    pub speed_limit: u32,
    #[serde(default)]
    pub bypass_quota: bool,
    #[serde(default)]
    pub pcq_enabled: bool,
    #[serde(default = "default_pcq_limit")]
    pub pcq_limit: u32,
    #[serde(default = "default_pcq_total_limit")]
    pub pcq_total_limit: u32,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
    /// Router IP pools whose subscribers the PCQ setup meters.
    #[serde(default)]
    pub pcq_pools: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Scales the speed cap while the window is open.
    #[serde(default)]
    pub time_window: Option<BindingWindow>,
}

/// A binding's own time-of-day speed adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingWindow {
    #[serde(flatten)]
    pub window: TimeWindow,
    /// Percent; 100 leaves the cap unchanged.
    pub speed_multiplier: u32,
}

impl ServiceTrafficBinding {
    /// Whether the PCQ fields describe a pushable queue setup.
    pub fn has_pcq(&self) -> bool {
        self.pcq_enabled
            && self.speed_limit > 0
            && self.device_id.is_some()
            && !self.pcq_pools.is_empty()
    }

    /// Reject records whose PCQ fields are half filled in.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.pcq_enabled {
            return Ok(());
        }
        if self.speed_limit == 0 {
            return Err(CoreError::validation(format!(
                "binding {}: PCQ requires a speed limit",
                self.id
            )));
        }
        if self.device_id.is_none() {
            return Err(CoreError::validation(format!(
                "binding {}: PCQ requires a target device",
                self.id
            )));
        }
        if self.pcq_pools.iter().all(|p| p.trim().is_empty()) {
            return Err(CoreError::validation(format!(
                "binding {}: PCQ requires at least one IP pool",
                self.id
            )));
        }
        if self.pcq_limit == 0 || self.pcq_total_limit < self.pcq_limit {
            return Err(CoreError::validation(format!(
                "binding {}: PCQ total limit must be at least the per-flow limit",
                self.id
            )));
        }
        Ok(())
    }

    /// Multiplier contributed by the binding's own window at `time`.
    pub fn window_multiplier(&self, time: NaiveTime) -> u32 {
        match self.time_window {
            Some(w) if w.window.contains(time) => w.speed_multiplier,
            _ => Multiplier::UNCHANGED,
        }
    }
}

/// A NAS router and how to reach both of its control channels.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Router address; the CoA channel targets it directly.
    pub address: IpAddr,
    /// Management API root. Defaults to `https://{address}`.
    #[serde(default)]
    pub api_url: Option<Url>,
    pub api_username: String,
    pub api_password: SecretString,
    #[serde(default)]
    pub radius_secret: Option<SecretString>,
    #[serde(default)]
    pub coa_port: Option<u16>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// IP pools this router hands out. Empty means unrestricted.
    #[serde(default)]
    pub pools: Vec<String>,
}

impl Device {
    pub fn management_url(&self) -> Result<Url, CoreError> {
        if let Some(url) = &self.api_url {
            return Ok(url.clone());
        }
        let host = match self.address {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        Url::parse(&format!("https://{host}")).map_err(|e| CoreError::Config {
            message: format!("device {}: {e}", self.id),
        })
    }
}

fn default_true() -> bool {
    true
}

fn default_pcq_limit() -> u32 {
    50
}

fn default_pcq_total_limit() -> u32 {
    2000
}
