// ── Device-facing capabilities ──
//
// The engine talks to routers through two narrow traits. The concrete
// REST and RADIUS clients from `nasshape-api` implement them here; tests
// substitute recording fakes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ipnet::IpNet;
use nasshape_api::{ActiveSession, CoaSender, QueueSpec, RouterClient, TransportConfig};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::CoaSettings;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, Rate};

type ApiResult<T = ()> = Result<T, nasshape_api::Error>;

/// Idempotent shaping and session-control primitives on one NAS.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn sync_address_list(&self, class_name: &str, subnets: &[IpNet]) -> ApiResult;
    async fn sync_mark_rule(&self, class_name: &str) -> ApiResult;
    async fn remove_address_list_and_mark_rule(&self, class_name: &str) -> ApiResult;
    async fn sync_queue_setup(&self, spec: &QueueSpec) -> ApiResult;
    async fn remove_queue_setup(&self, class_name: &str, speed_limit: u32) -> ApiResult;
    async fn get_active_session(&self, username: &str) -> ApiResult<Option<ActiveSession>>;
    async fn restore_rate(&self, username: &str, address: Option<&str>, rate: Rate) -> ApiResult;
    async fn disconnect_user(&self, username: &str) -> ApiResult;
}

/// RADIUS dynamic-authorization primitives on one NAS.
#[async_trait]
pub trait CoaClient: Send + Sync {
    async fn update_rate_limit(&self, username: &str, session_id: Option<&str>, rate: &str) -> ApiResult;
    async fn disconnect_user(&self, username: &str, session_id: Option<&str>) -> ApiResult;
}

/// Hands out clients for a device. Implementations may cache them.
pub trait DeviceConnector: Send + Sync {
    fn device_client(&self, device: &Device) -> Result<Arc<dyn DeviceClient>, CoreError>;

    /// `Ok(None)` when the device has no CoA channel configured.
    fn coa_client(&self, device: &Device) -> Result<Option<Arc<dyn CoaClient>>, CoreError>;
}

// ── nasshape-api adapters ───────────────────────────────────────────

#[async_trait]
impl DeviceClient for RouterClient {
    async fn sync_address_list(&self, class_name: &str, subnets: &[IpNet]) -> ApiResult {
        let rendered: Vec<String> = subnets.iter().map(ToString::to_string).collect();
        RouterClient::sync_address_list(self, class_name, &rendered).await
    }

    async fn sync_mark_rule(&self, class_name: &str) -> ApiResult {
        RouterClient::sync_mark_rule(self, class_name).await
    }

    async fn remove_address_list_and_mark_rule(&self, class_name: &str) -> ApiResult {
        RouterClient::remove_address_list_and_mark_rule(self, class_name).await
    }

    async fn sync_queue_setup(&self, spec: &QueueSpec) -> ApiResult {
        RouterClient::sync_queue_setup(self, spec).await
    }

    async fn remove_queue_setup(&self, class_name: &str, speed_limit: u32) -> ApiResult {
        RouterClient::remove_queue_setup(self, class_name, speed_limit).await
    }

    async fn get_active_session(&self, username: &str) -> ApiResult<Option<ActiveSession>> {
        RouterClient::get_active_session(self, username).await
    }

    async fn restore_rate(&self, username: &str, address: Option<&str>, rate: Rate) -> ApiResult {
        RouterClient::restore_rate(self, username, address, rate.download_kbps, rate.upload_kbps)
            .await
    }

    async fn disconnect_user(&self, username: &str) -> ApiResult {
        RouterClient::disconnect_user(self, username).await
    }
}

#[async_trait]
impl CoaClient for CoaSender {
    async fn update_rate_limit(&self, username: &str, session_id: Option<&str>, rate: &str) -> ApiResult {
        CoaSender::update_rate_limit(self, username, session_id, rate).await
    }

    async fn disconnect_user(&self, username: &str, session_id: Option<&str>) -> ApiResult {
        CoaSender::disconnect_user(self, username, session_id).await
    }
}

// ── RouterConnector ─────────────────────────────────────────────────

/// Builds `RouterClient`/`CoaSender` pairs from device records, one per
/// device, reused across jobs.
pub struct RouterConnector {
    transport: TransportConfig,
    coa: CoaSettings,
    routers: DashMap<DeviceId, Arc<RouterClient>>,
}

impl RouterConnector {
    pub fn new(transport: TransportConfig, coa: CoaSettings) -> Self {
        Self {
            transport,
            coa,
            routers: DashMap::new(),
        }
    }

    /// Drop a cached client, e.g. after the device's credentials change.
    pub fn evict(&self, id: DeviceId) {
        self.routers.remove(&id);
    }
}

impl DeviceConnector for RouterConnector {
    fn device_client(&self, device: &Device) -> Result<Arc<dyn DeviceClient>, CoreError> {
        if let Some(client) = self.routers.get(&device.id) {
            return Ok(Arc::clone(client.value()) as Arc<dyn DeviceClient>);
        }
        let client = Arc::new(RouterClient::new(
            device.management_url()?,
            device.api_username.clone(),
            device.api_password.clone(),
            &self.transport,
        )?);
        debug!(device_id = %device.id, url = %client.base_url(), "built router client");
        self.routers.insert(device.id, Arc::clone(&client));
        Ok(client)
    }

    fn coa_client(&self, device: &Device) -> Result<Option<Arc<dyn CoaClient>>, CoreError> {
        let Some(secret) = &device.radius_secret else {
            return Ok(None);
        };
        if secret.expose_secret().is_empty() {
            return Ok(None);
        }
        let port = device.coa_port.unwrap_or(self.coa.default_port);
        let sender = CoaSender::new(
            SocketAddr::new(device.address, port),
            secret.clone(),
            self.coa.timeout,
            self.coa.retries,
        );
        Ok(Some(Arc::new(sender)))
    }
}
