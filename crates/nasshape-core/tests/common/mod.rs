//! Recording fakes for the device and CoA channels.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ipnet::IpNet;
use nasshape_api::{ActiveSession, QueueSpec};
use nasshape_core::{
    CoaClient, CoreError, Device, DeviceClient, DeviceConnector, DeviceId, DispatchConfig,
    EngineConfig, Rate,
};

type ApiResult<T = ()> = Result<T, nasshape_api::Error>;

/// One observed device-side call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SyncList { class: String, subnets: Vec<String> },
    SyncMark { class: String },
    RemoveClass { class: String },
    SyncQueue { class: String, speed: u32, rate: u32 },
    RemoveQueue { class: String, speed: u32 },
    Session { username: String },
    RestoreRate { username: String, rate: Rate },
    Disconnect { username: String },
    CoaRate { username: String, session_id: Option<String>, rate: String },
    CoaDisconnect { username: String },
}

impl Call {
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::RemoveClass { .. } | Self::RemoveQueue { .. })
    }
}

/// Everything the fakes saw, in order, tagged by device.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<(u64, Call)>>>);

impl Journal {
    fn push(&self, device: u64, call: Call) {
        self.0.lock().unwrap().push((device, call));
    }

    pub fn all(&self) -> Vec<(u64, Call)> {
        self.0.lock().unwrap().clone()
    }

    pub fn for_device(&self, device: u64) -> Vec<Call> {
        self.all()
            .into_iter()
            .filter(|(d, _)| *d == device)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn devices_with(&self, pred: impl Fn(&Call) -> bool) -> Vec<u64> {
        let mut out: Vec<u64> = self
            .all()
            .into_iter()
            .filter(|(_, c)| pred(c))
            .map(|(d, _)| d)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Scripted failures, consumed front to back.
#[derive(Default)]
pub struct Script {
    pub sync_list: Mutex<VecDeque<nasshape_api::Error>>,
    pub restore_rate: Mutex<VecDeque<nasshape_api::Error>>,
    pub coa_rate: Mutex<VecDeque<nasshape_api::Error>>,
    /// Mark rule failures, per device id.
    pub sync_mark: Mutex<HashMap<u64, VecDeque<nasshape_api::Error>>>,
    pub session_error: Mutex<Option<nasshape_api::Error>>,
}

fn next_failure(queue: &Mutex<VecDeque<nasshape_api::Error>>) -> ApiResult {
    match queue.lock().unwrap().pop_front() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub struct FakeDevice {
    id: u64,
    journal: Journal,
    script: Arc<Script>,
    sessions: Arc<Mutex<HashMap<String, ActiveSession>>>,
    delay: Duration,
}

#[async_trait]
impl DeviceClient for FakeDevice {
    async fn sync_address_list(&self, class_name: &str, subnets: &[IpNet]) -> ApiResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        next_failure(&self.script.sync_list)?;
        self.journal.push(
            self.id,
            Call::SyncList {
                class: class_name.into(),
                subnets: subnets.iter().map(ToString::to_string).collect(),
            },
        );
        Ok(())
    }

    async fn sync_mark_rule(&self, class_name: &str) -> ApiResult {
        let failure = self
            .script
            .sync_mark
            .lock()
            .unwrap()
            .get_mut(&self.id)
            .and_then(VecDeque::pop_front);
        if let Some(e) = failure {
            return Err(e);
        }
        self.journal.push(self.id, Call::SyncMark { class: class_name.into() });
        Ok(())
    }

    async fn remove_address_list_and_mark_rule(&self, class_name: &str) -> ApiResult {
        self.journal.push(self.id, Call::RemoveClass { class: class_name.into() });
        Ok(())
    }

    async fn sync_queue_setup(&self, spec: &QueueSpec) -> ApiResult {
        self.journal.push(
            self.id,
            Call::SyncQueue {
                class: spec.class_name.clone(),
                speed: spec.speed_limit,
                rate: spec.rate_limit,
            },
        );
        Ok(())
    }

    async fn remove_queue_setup(&self, class_name: &str, speed_limit: u32) -> ApiResult {
        self.journal.push(
            self.id,
            Call::RemoveQueue {
                class: class_name.into(),
                speed: speed_limit,
            },
        );
        Ok(())
    }

    async fn get_active_session(&self, username: &str) -> ApiResult<Option<ActiveSession>> {
        self.journal.push(self.id, Call::Session { username: username.into() });
        if let Some(e) = self.script.session_error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.sessions.lock().unwrap().get(username).cloned())
    }

    async fn restore_rate(&self, username: &str, _address: Option<&str>, rate: Rate) -> ApiResult {
        next_failure(&self.script.restore_rate)?;
        self.journal.push(
            self.id,
            Call::RestoreRate {
                username: username.into(),
                rate,
            },
        );
        Ok(())
    }

    async fn disconnect_user(&self, username: &str) -> ApiResult {
        self.journal.push(self.id, Call::Disconnect { username: username.into() });
        Ok(())
    }
}

pub struct FakeCoa {
    id: u64,
    journal: Journal,
    script: Arc<Script>,
}

#[async_trait]
impl CoaClient for FakeCoa {
    async fn update_rate_limit(&self, username: &str, session_id: Option<&str>, rate: &str) -> ApiResult {
        next_failure(&self.script.coa_rate)?;
        self.journal.push(
            self.id,
            Call::CoaRate {
                username: username.into(),
                session_id: session_id.map(str::to_owned),
                rate: rate.into(),
            },
        );
        Ok(())
    }

    async fn disconnect_user(&self, username: &str, _session_id: Option<&str>) -> ApiResult {
        self.journal.push(self.id, Call::CoaDisconnect { username: username.into() });
        Ok(())
    }
}

/// Hands out fakes that share one journal and script.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub journal: Journal,
    pub script: Arc<Script>,
    pub sessions: Arc<Mutex<HashMap<String, ActiveSession>>>,
    /// Devices answering CoA. Others have no CoA channel.
    pub coa_devices: Arc<Mutex<Vec<u64>>>,
    pub delay: Duration,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coa(self, device: u64) -> Self {
        self.coa_devices.lock().unwrap().push(device);
        self
    }

    pub fn fail_mark_rule(&self, device: u64, error: nasshape_api::Error) {
        self.script
            .sync_mark
            .lock()
            .unwrap()
            .entry(device)
            .or_default()
            .push_back(error);
    }

    pub fn online(&self, username: &str, session_id: &str, download: u64, upload: u64) {
        self.sessions.lock().unwrap().insert(
            username.into(),
            ActiveSession {
                id: "*1".into(),
                session_id: Some(session_id.into()),
                address: Some("100.64.0.10".into()),
                bytes_in: upload,
                bytes_out: download,
            },
        );
    }
}

impl DeviceConnector for FakeConnector {
    fn device_client(&self, device: &Device) -> Result<Arc<dyn DeviceClient>, CoreError> {
        Ok(Arc::new(FakeDevice {
            id: device.id.get(),
            journal: self.journal.clone(),
            script: Arc::clone(&self.script),
            sessions: Arc::clone(&self.sessions),
            delay: self.delay,
        }))
    }

    fn coa_client(&self, device: &Device) -> Result<Option<Arc<dyn CoaClient>>, CoreError> {
        if !self.coa_devices.lock().unwrap().contains(&device.id.get()) {
            return Ok(None);
        }
        Ok(Some(Arc::new(FakeCoa {
            id: device.id.get(),
            journal: self.journal.clone(),
            script: Arc::clone(&self.script),
        })))
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn device(id: u64) -> Device {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": format!("nas-{id}"),
        "address": format!("192.0.2.{id}"),
        "api_username": "api",
        "api_password": "secret",
        "radius_secret": "radius",
    }))
    .unwrap()
}

pub fn device_ids(raw: &[u64]) -> Vec<DeviceId> {
    raw.iter().copied().map(DeviceId).collect()
}

/// Fast retries so failure tests finish quickly.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        dispatch: DispatchConfig {
            queue_capacity: 16,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(4),
        },
        ..EngineConfig::default()
    }
}

pub fn transient() -> nasshape_api::Error {
    nasshape_api::Error::RouterApi {
        message: "busy".into(),
        status: 503,
    }
}

pub fn fatal() -> nasshape_api::Error {
    nasshape_api::Error::RadiusNak {
        reason: "Session-Context-Not-Found".into(),
    }
}
