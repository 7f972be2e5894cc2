// ── Bandwidth scheduler ──
//
// Periodically re-evaluates auto-apply rules and rewrites only the scopes
// whose effective rate changed since the previous tick. A scope nobody
// has touched yet is assumed to run unscaled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RuleFilter, binding_rate, service_multiplier};
use crate::engine::Engine;
use crate::error::CoreError;
use crate::model::{BindingId, Multiplier, ServiceId};

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub services_changed: usize,
    pub subscribers_updated: usize,
    pub bindings_changed: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.services_changed == 0 && self.bindings_changed == 0
    }
}

#[derive(Default)]
struct Applied {
    services: HashMap<ServiceId, Multiplier>,
    bindings: HashMap<BindingId, u32>,
}

pub struct BandwidthScheduler {
    engine: Arc<Engine>,
    period: Duration,
    applied: Mutex<Applied>,
}

impl BandwidthScheduler {
    pub fn new(engine: Arc<Engine>, period: Duration) -> Self {
        Self {
            engine,
            period,
            applied: Mutex::new(Applied::default()),
        }
    }

    /// Evaluate at `now` and apply whatever changed.
    pub async fn tick(&self, now: NaiveDateTime) -> Result<TickReport, CoreError> {
        let store = self.engine.store();
        let rules = store.bandwidth_rules().await?;
        let cdn_rules = store.cdn_bandwidth_rules().await?;
        let services = store.services().await?;
        let bindings = store.bindings().await?;

        let mut applied = self.applied.lock().await;
        let mut report = TickReport::default();

        for service in &services {
            let next = service_multiplier(&rules, service.id, now, RuleFilter::AutoApply);
            let prev = applied
                .services
                .get(&service.id)
                .copied()
                .unwrap_or(Multiplier::NONE);
            if next == prev {
                continue;
            }
            info!(
                service_id = %service.id,
                download = next.download,
                upload = next.upload,
                "service multiplier changed"
            );
            report.subscribers_updated += self.engine.apply_service_multiplier(service.id, next).await?;
            report.services_changed += 1;
            applied.services.insert(service.id, next);
        }

        let mut live = Vec::new();
        for binding in bindings.iter().filter(|b| b.active && b.has_pcq()) {
            live.push(binding.id);
            let next = binding_rate(&cdn_rules, binding, now, RuleFilter::AutoApply);
            let prev = applied
                .bindings
                .get(&binding.id)
                .copied()
                .unwrap_or(binding.speed_limit);
            if next == prev {
                continue;
            }
            debug!(binding_id = %binding.id, from = prev, to = next, "binding rate changed");
            if self.engine.push_binding_rate(binding, next).await? {
                report.bindings_changed += 1;
                applied.bindings.insert(binding.id, next);
            }
        }
        applied.bindings.retain(|id, _| live.contains(id));

        Ok(report)
    }

    /// Tick on the configured interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        if self.period.is_zero() {
            debug!("bandwidth scheduler disabled");
            return;
        }
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(Local::now().naive_local()).await {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => info!(
                            services = report.services_changed,
                            subscribers = report.subscribers_updated,
                            bindings = report.bindings_changed,
                            "bandwidth rules re-applied"
                        ),
                        Err(e) => warn!(error = %e, "bandwidth evaluation failed"),
                    }
                }
            }
        }
        debug!("bandwidth scheduler stopped");
    }
}
