// ── Per-device dispatcher ──
//
// Device work runs on one worker per device fed by a bounded queue.
// `enqueue` never waits: a full queue drops the job with a warning, so a
// slow or dead router can never stall the caller. Jobs for one device
// run in FIFO order; different devices proceed independently.

mod job;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::client::DeviceConnector;
use crate::config::DispatchConfig;
use crate::fup::{FallbackChain, RateTarget};
use crate::model::{Device, DeviceId};

pub use job::{DeviceOp, PlannedOp};

struct DeviceJob {
    device: Arc<Device>,
    op: DeviceOp,
}

/// Counters shared by the dispatcher and its workers.
#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    idle: Notify,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub workers: usize,
}

/// Cheaply cloneable handle to the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatchConfig,
    connector: Arc<dyn DeviceConnector>,
    queues: DashMap<DeviceId, mpsc::Sender<DeviceJob>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                connector,
                queues: DashMap::new(),
                shared: Arc::new(Shared::default()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Queue `op` for `device`. Returns `false` if the job was dropped.
    ///
    /// Must be called from within a Tokio runtime; the device's worker is
    /// spawned on first use.
    pub fn enqueue(&self, device: &Device, op: DeviceOp) -> bool {
        if self.inner.cancel.is_cancelled() {
            warn!(device_id = %device.id, op = %op, "dispatcher shut down, dropping job");
            self.inner.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let sender = self
            .inner
            .queues
            .entry(device.id)
            .or_insert_with(|| self.spawn_worker(device.id))
            .clone();

        self.inner.shared.pending.fetch_add(1, Ordering::AcqRel);
        let job = DeviceJob {
            device: Arc::new(device.clone()),
            op,
        };
        match sender.try_send(job) {
            Ok(()) => true,
            Err(err) => {
                let (reason, job) = match err {
                    mpsc::error::TrySendError::Full(job) => ("queue full", job),
                    mpsc::error::TrySendError::Closed(job) => ("worker gone", job),
                };
                warn!(
                    device_id = %device.id,
                    device = %device.name,
                    op = %job.op,
                    reason,
                    "dropping device job"
                );
                self.inner.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.inner.shared.finish_one();
                false
            }
        }
    }

    /// Queue each planned op for its device. Returns how many were accepted.
    pub fn enqueue_all<'a>(
        &self,
        devices: &BTreeMap<DeviceId, Device>,
        ops: impl IntoIterator<Item = &'a PlannedOp>,
    ) -> usize {
        let mut accepted = 0;
        for planned in ops {
            let Some(device) = devices.get(&planned.device_id) else {
                warn!(device_id = %planned.device_id, op = %planned.op, "unknown device, skipping");
                continue;
            };
            if self.enqueue(device, planned.op.clone()) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Wait until every accepted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop every worker. Queued jobs are discarded; a job in flight
    /// finishes its current device call.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn stats(&self) -> DispatchStats {
        let shared = &self.inner.shared;
        DispatchStats {
            pending: shared.pending.load(Ordering::Acquire),
            completed: shared.completed.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            dropped: shared.dropped.load(Ordering::Relaxed),
            workers: self.inner.queues.len(),
        }
    }

    fn spawn_worker(&self, device_id: DeviceId) -> mpsc::Sender<DeviceJob> {
        let capacity = self.inner.config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let worker = Worker {
            device_id,
            config: self.inner.config.clone(),
            connector: Arc::clone(&self.inner.connector),
            shared: Arc::clone(&self.inner.shared),
            cancel: self.inner.cancel.child_token(),
        };
        debug!(%device_id, capacity, "spawning device worker");
        tokio::spawn(worker.run(rx));
        tx
    }
}

// ── Worker ───────────────────────────────────────────────────────────

struct Worker {
    device_id: DeviceId,
    config: DispatchConfig,
    connector: Arc<dyn DeviceConnector>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<DeviceJob>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                job = rx.recv() => {
                    let Some(job) = job else { break };
                    self.execute(job).await;
                    self.shared.finish_one();
                }
            }
        }

        // Account for anything still queued so `wait_idle` cannot hang.
        rx.close();
        while rx.try_recv().is_ok() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            self.shared.finish_one();
        }
        debug!(device_id = %self.device_id, "device worker stopped");
    }

    async fn execute(&self, job: DeviceJob) {
        let device = &job.device;
        let client = match self.connector.device_client(device) {
            Ok(client) => client,
            Err(e) => {
                error!(device_id = %device.id, device = %device.name, error = %e, "cannot build device client");
                self.shared.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if let DeviceOp::PushRate {
            username,
            session_id,
            address,
            rate,
        } = &job.op
        {
            let coa = self.connector.coa_client(device).unwrap_or_else(|e| {
                warn!(device_id = %device.id, error = %e, "CoA channel unavailable");
                None
            });
            let target = RateTarget {
                username: username.clone(),
                session_id: session_id.clone(),
                address: address.clone(),
                rate: *rate,
            };
            let outcome = FallbackChain::for_device(coa, client)
                .run(&target, &self.config)
                .await;
            let counter = match outcome {
                crate::fup::ChainOutcome::Applied { .. } => &self.shared.completed,
                crate::fup::ChainOutcome::Exhausted { .. } => &self.shared.failed,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match job.op.run_shaping(client.as_ref()).await {
                Ok(()) => {
                    debug!(device_id = %device.id, op = %job.op, attempt, "device job done");
                    self.shared.completed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        device_id = %device.id,
                        device = %device.name,
                        op = %job.op,
                        attempt,
                        error = %e,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "device job failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(
                        device_id = %device.id,
                        device = %device.name,
                        op = %job.op,
                        attempt,
                        error = %e,
                        "device job failed"
                    );
                    self.shared.failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }
}
