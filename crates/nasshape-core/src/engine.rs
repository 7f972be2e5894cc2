// ── Engine facade ──
//
// The produced surface: reconcile policy edits, apply bandwidth rules,
// reset and account subscriber usage. Every call validates and plans
// synchronously, queues device work on the dispatcher, and returns
// without waiting for any device.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use nasshape_api::ActiveSession;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bandwidth::{self, Evaluation, RuleFilter};
use crate::client::{DeviceConnector, RouterConnector};
use crate::config::EngineConfig;
use crate::dispatch::{DeviceOp, DispatchStats, Dispatcher};
use crate::error::CoreError;
use crate::model::rules::scale;
use crate::model::{
    Device, DeviceId, Multiplier, Rate, ResetKind, RuleId, Service, ServiceId,
    ServiceTrafficBinding, Subscriber, SubscriberId, TrafficClass, TrafficClassId,
};
use crate::store::{PolicyStore, PushKey, PushLedger};
use crate::sync::cdn::{self, PreviousClass};
use crate::sync::pcq::{self, PcqContext};
use crate::sync::ReconcileOutcome;
use crate::usage::{self, UsageReport};

/// Outcome of a single-subscriber FUP reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub subscriber_id: SubscriberId,
    pub username: String,
    /// Live counters captured as the new accounting baseline.
    pub baseline_download: u64,
    pub baseline_upload: u64,
    /// Rate written to the reply mirror.
    pub rate: Rate,
    /// Whether a live rate push was queued.
    pub live_push: bool,
}

pub struct Engine {
    store: Arc<dyn PolicyStore>,
    connector: Arc<dyn DeviceConnector>,
    dispatcher: Dispatcher,
    ledger: PushLedger,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn PolicyStore>,
        connector: Arc<dyn DeviceConnector>,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(config.dispatch.clone(), Arc::clone(&connector)),
            store,
            connector,
            ledger: PushLedger::new(),
        }
    }

    /// Engine talking to real routers over REST and RADIUS.
    pub fn with_routers(config: &EngineConfig, store: Arc<dyn PolicyStore>) -> Self {
        let connector = RouterConnector::new(config.transport.clone(), config.coa.clone());
        Self::new(config, store, Arc::new(connector))
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ledger(&self) -> &PushLedger {
        &self.ledger
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Wait for every queued device job to finish.
    pub async fn wait_idle(&self) {
        self.dispatcher.wait_idle().await;
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    // ── Traffic classes ──────────────────────────────────────────────

    /// Push `desired` to its device scope, cleaning up what `previous`
    /// left behind on devices it no longer targets.
    pub async fn reconcile_class(
        &self,
        desired: &TrafficClass,
        previous: Option<&TrafficClass>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let devices = self.active_devices().await?;
        let active: BTreeSet<DeviceId> = devices.keys().copied().collect();
        let previous = previous
            .map(|p| PreviousClass::from_class(p, &active))
            .transpose()?;

        let ops = cdn::plan_class(desired, previous.as_ref(), &active)?;
        let enqueued = self.dispatcher.enqueue_all(&devices, &ops);
        info!(
            class = %desired.name,
            ops = ops.len(),
            enqueued,
            "class reconciliation queued"
        );
        Ok(ReconcileOutcome { ops, enqueued })
    }

    /// Re-push a stored class to its current scope.
    pub async fn resync_class(&self, name: &str) -> Result<ReconcileOutcome, CoreError> {
        let class = self
            .store
            .traffic_class_by_name(name)
            .await?
            .ok_or_else(|| CoreError::not_found("traffic class", name))?;
        self.reconcile_class(&class, Some(&class)).await
    }

    // ── Service bindings (PCQ) ───────────────────────────────────────

    /// Move one binding's PCQ setup from `previous` to `desired`. Pass
    /// `None` as `desired` when the binding was deleted.
    pub async fn reconcile_binding(
        &self,
        desired: Option<&ServiceTrafficBinding>,
        previous: Option<&ServiceTrafficBinding>,
    ) -> Result<ReconcileOutcome, CoreError> {
        let devices = self.active_devices().await?;
        let active: BTreeSet<DeviceId> = devices.keys().copied().collect();
        let classes = self.classes_by_id().await?;
        let bindings = self.store.bindings().await?;

        let rate_limit = match desired {
            Some(binding) => {
                let rules = self.store.cdn_bandwidth_rules().await?;
                Some(bandwidth::binding_rate(
                    &rules,
                    binding,
                    local_now(),
                    RuleFilter::AutoApply,
                ))
            }
            None => None,
        };

        let plan = pcq::plan_binding(
            desired,
            previous,
            &PcqContext {
                classes: &classes,
                bindings: &bindings,
                active: &active,
                rate_limit,
            },
        )?;

        let enqueued = self.dispatcher.enqueue_all(&devices, &plan.ops);
        if let Some(old) = plan.forget {
            self.ledger.forget(&old);
        }
        if let Some(new) = plan.record {
            self.ledger.record(new);
        }
        info!(
            binding_id = ?desired.or(previous).map(|b| b.id),
            ops = plan.ops.len(),
            enqueued,
            "binding reconciliation queued"
        );
        Ok(ReconcileOutcome {
            ops: plan.ops,
            enqueued,
        })
    }

    // ── Bandwidth rules ──────────────────────────────────────────────

    /// Apply a service rule's multiplier now, regardless of its window.
    /// Returns how many subscribers had their reply rate rewritten.
    pub async fn apply_bandwidth_rule(&self, id: RuleId) -> Result<usize, CoreError> {
        let rule = self
            .store
            .bandwidth_rule(id)
            .await?
            .ok_or_else(|| CoreError::not_found("bandwidth rule", id))?;
        if !rule.enabled {
            return Err(CoreError::validation(format!("bandwidth rule {id} is disabled")));
        }

        let services = self.store.services().await?;
        let mut updated = 0;
        for service in services.iter().filter(|s| rule.covers(s.id)) {
            updated += self
                .apply_service_multiplier(service.id, rule.multiplier())
                .await?;
        }
        info!(rule_id = %id, rule = %rule.name, updated, "bandwidth rule applied");
        Ok(updated)
    }

    /// Apply a class rule's multiplier to every PCQ setup in its scope
    /// now. Returns how many bindings were rewritten.
    pub async fn apply_cdn_bandwidth_rule(&self, id: RuleId) -> Result<usize, CoreError> {
        let rule = self
            .store
            .cdn_bandwidth_rule(id)
            .await?
            .ok_or_else(|| CoreError::not_found("CDN bandwidth rule", id))?;
        if !rule.enabled {
            return Err(CoreError::validation(format!(
                "CDN bandwidth rule {id} is disabled"
            )));
        }

        let devices = self.active_devices().await?;
        let classes = self.classes_by_id().await?;
        let bindings = self.store.bindings().await?;
        let now = local_now();

        let mut updated = 0;
        for binding in bandwidth::bindings_in_scope(&rule, &bindings) {
            let rate = scale(
                scale(binding.speed_limit, rule.speed_multiplier),
                binding.window_multiplier(now.time()),
            );
            if self.queue_binding_rate(&devices, &classes, binding, rate) {
                updated += 1;
            }
        }
        info!(rule_id = %id, rule = %rule.name, updated, "CDN bandwidth rule applied");
        Ok(updated)
    }

    /// Winning auto-apply rule per scope at `now`.
    pub async fn evaluate(&self, now: NaiveDateTime) -> Result<Vec<Evaluation>, CoreError> {
        let rules = self.store.bandwidth_rules().await?;
        let cdn_rules = self.store.cdn_bandwidth_rules().await?;
        let services: Vec<ServiceId> = self
            .store
            .services()
            .await?
            .iter()
            .map(|s| s.id)
            .collect();
        let bindings = self.store.bindings().await?;
        Ok(bandwidth::evaluate(
            now,
            &rules,
            &cdn_rules,
            &services,
            &bindings,
            RuleFilter::AutoApply,
        ))
    }

    /// Rewrite the reply rate of every level-0 subscriber on a service and
    /// push it live to those online. Throttled subscribers keep their tier
    /// rate. Returns how many subscribers were rewritten.
    pub async fn apply_service_multiplier(
        &self,
        service_id: ServiceId,
        multiplier: Multiplier,
    ) -> Result<usize, CoreError> {
        let service = self
            .store
            .service(service_id)
            .await?
            .ok_or_else(|| CoreError::not_found("service", service_id))?;
        let devices = self.active_devices().await?;
        let rate = service.effective_rate(0, 0, multiplier);

        let mut updated = 0;
        for sub in self.store.subscribers().await? {
            if sub.service_id != service_id || sub.fup_level() > 0 {
                continue;
            }
            self.store
                .set_reply_rate(&sub.username, &rate.to_string())
                .await?;
            updated += 1;
            if sub.online {
                self.queue_rate(&devices, &sub, None, rate);
            }
        }
        debug!(service_id = %service_id, %rate, updated, "service rate rewritten");
        Ok(updated)
    }

    /// Queue a PCQ rate rewrite for one binding. Returns `false` when the
    /// binding's class or device is unavailable.
    pub async fn push_binding_rate(
        &self,
        binding: &ServiceTrafficBinding,
        rate_limit: u32,
    ) -> Result<bool, CoreError> {
        let devices = self.active_devices().await?;
        let classes = self.classes_by_id().await?;
        Ok(self.queue_binding_rate(&devices, &classes, binding, rate_limit))
    }

    // ── FUP enforcement ──────────────────────────────────────────────

    pub async fn reset_fup(&self, id: SubscriberId) -> Result<ResetReport, CoreError> {
        self.reset_fup_at(id, Utc::now()).await
    }

    /// Reset a subscriber to normal: zero every counter, capture the live
    /// session as the new baseline, restore the contracted rate in the
    /// reply mirror, and push it to the live session.
    pub async fn reset_fup_at(
        &self,
        id: SubscriberId,
        now: DateTime<Utc>,
    ) -> Result<ResetReport, CoreError> {
        let (mut sub, service) = self.subscriber_with_service(id).await?;
        let device = self.subscriber_device(&sub).await?;

        let session = match (&device, sub.online) {
            (Some(device), true) => self.live_session(device, &sub.username).await,
            _ => None,
        };

        sub.reset(ResetKind::All, now);
        let (baseline_download, baseline_upload) =
            session.as_ref().map_or((0, 0), |s| (s.bytes_out, s.bytes_in));
        sub.last_session_download = baseline_download;
        sub.last_session_upload = baseline_upload;
        self.store.save_subscriber(&sub).await?;

        let rules = self.store.bandwidth_rules().await?;
        let multiplier = bandwidth::service_multiplier(
            &rules,
            service.id,
            now.with_timezone(&Local).naive_local(),
            RuleFilter::AutoApply,
        );
        let rate = service.effective_rate(0, 0, multiplier);
        if let Err(e) = self
            .store
            .set_reply_rate(&sub.username, &rate.to_string())
            .await
        {
            warn!(subscriber = %sub.username, error = %e, "could not update reply rate");
        }

        let live_push = match (&device, session) {
            (Some(device), Some(session)) => self.dispatcher.enqueue(
                device,
                DeviceOp::PushRate {
                    username: sub.username.clone(),
                    session_id: session.session_id,
                    address: session.address,
                    rate,
                },
            ),
            _ => false,
        };

        info!(
            subscriber = %sub.username,
            baseline_download,
            baseline_upload,
            %rate,
            live_push,
            "FUP reset"
        );
        Ok(ResetReport {
            subscriber_id: sub.id,
            username: sub.username,
            baseline_download,
            baseline_upload,
            rate,
            live_push,
        })
    }

    pub async fn bulk_reset(&self, ids: &[SubscriberId], kind: ResetKind) -> Result<usize, CoreError> {
        self.bulk_reset_at(ids, kind, Utc::now()).await
    }

    /// Accounting-only reset of many subscribers. Unknown ids are skipped.
    /// Returns how many subscribers were updated.
    pub async fn bulk_reset_at(
        &self,
        ids: &[SubscriberId],
        kind: ResetKind,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let mut updated = 0;
        for &id in ids {
            let Some(mut sub) = self.store.subscriber(id).await? else {
                debug!(subscriber_id = %id, "bulk reset: unknown subscriber, skipping");
                continue;
            };
            sub.reset(kind, now);
            self.store.save_subscriber(&sub).await?;
            updated += 1;
        }
        info!(%kind, requested = ids.len(), updated, "bulk reset");
        Ok(updated)
    }

    // ── Usage accounting ─────────────────────────────────────────────

    /// Fold a subscriber's live counters into their usage. On escalation
    /// the tier rate is mirrored and pushed live.
    pub async fn record_usage(
        &self,
        id: SubscriberId,
        live_download: u64,
        live_upload: u64,
    ) -> Result<UsageReport, CoreError> {
        let (mut sub, service) = self.subscriber_with_service(id).await?;
        let report = usage::apply_usage(&mut sub, &service, live_download, live_upload);
        self.store.save_subscriber(&sub).await?;

        if report.escalated {
            let rate = service.effective_rate(
                sub.daily_fup_level,
                sub.monthly_fup_level,
                Multiplier::NONE,
            );
            self.store
                .set_reply_rate(&sub.username, &rate.to_string())
                .await?;
            if sub.online {
                let devices = self.active_devices().await?;
                self.queue_rate(&devices, &sub, None, rate);
            }
            info!(
                subscriber = %sub.username,
                daily_level = sub.daily_fup_level,
                monthly_level = sub.monthly_fup_level,
                %rate,
                "FUP level raised"
            );
        }
        Ok(report)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn active_devices(&self) -> Result<BTreeMap<DeviceId, Device>, CoreError> {
        Ok(self
            .store
            .devices()
            .await?
            .into_iter()
            .filter(|d| d.active)
            .map(|d| (d.id, d))
            .collect())
    }

    async fn classes_by_id(&self) -> Result<BTreeMap<TrafficClassId, TrafficClass>, CoreError> {
        Ok(self
            .store
            .traffic_classes()
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect())
    }

    async fn subscriber_with_service(
        &self,
        id: SubscriberId,
    ) -> Result<(Subscriber, Service), CoreError> {
        let sub = self
            .store
            .subscriber(id)
            .await?
            .ok_or_else(|| CoreError::not_found("subscriber", id))?;
        let service = self
            .store
            .service(sub.service_id)
            .await?
            .ok_or_else(|| CoreError::not_found("service", sub.service_id))?;
        Ok((sub, service))
    }

    async fn subscriber_device(&self, sub: &Subscriber) -> Result<Option<Device>, CoreError> {
        let Some(device_id) = sub.device_id else {
            return Ok(None);
        };
        let device = self.store.device(device_id).await?;
        if device.is_none() {
            warn!(subscriber = %sub.username, %device_id, "subscriber's device is not in the store");
        }
        Ok(device.filter(|d| d.active))
    }

    /// Live session lookup. Any failure counts as offline.
    async fn live_session(&self, device: &Device, username: &str) -> Option<ActiveSession> {
        let client = match self.connector.device_client(device) {
            Ok(client) => client,
            Err(e) => {
                warn!(device_id = %device.id, subscriber = username, error = %e, "baseline capture skipped");
                return None;
            }
        };
        match client.get_active_session(username).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    device_id = %device.id,
                    device = %device.name,
                    subscriber = username,
                    error = %e,
                    "session query failed; treating subscriber as offline"
                );
                None
            }
        }
    }

    fn queue_rate(
        &self,
        devices: &BTreeMap<DeviceId, Device>,
        sub: &Subscriber,
        session_id: Option<String>,
        rate: Rate,
    ) -> bool {
        let Some(device) = sub.device_id.and_then(|id| devices.get(&id)) else {
            debug!(subscriber = %sub.username, "no active device for live rate push");
            return false;
        };
        self.dispatcher.enqueue(
            device,
            DeviceOp::PushRate {
                username: sub.username.clone(),
                session_id,
                address: None,
                rate,
            },
        )
    }

    fn queue_binding_rate(
        &self,
        devices: &BTreeMap<DeviceId, Device>,
        classes: &BTreeMap<TrafficClassId, TrafficClass>,
        binding: &ServiceTrafficBinding,
        rate_limit: u32,
    ) -> bool {
        let Some(key) = PushKey::of(binding) else {
            return false;
        };
        let (Some(class), Some(device)) = (classes.get(&key.class_id), devices.get(&key.device_id))
        else {
            warn!(
                class_id = %key.class_id,
                device_id = %key.device_id,
                "binding target unavailable; rate not pushed"
            );
            return false;
        };
        let accepted = self.dispatcher.enqueue(
            device,
            DeviceOp::SyncQueue {
                spec: pcq::queue_spec(binding, class, rate_limit),
            },
        );
        if accepted {
            self.ledger.record(key);
        }
        accepted
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}
