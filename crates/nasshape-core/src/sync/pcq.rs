// ── Per-service PCQ reconciliation ──
//
// A binding with PCQ enabled owns one queue setup keyed by
// (class, speed tier, device). The class address list and mark rules on
// that device are shared with sibling bindings and with the class's own
// CDN scope, so they are only torn down when nothing else uses them.

use std::collections::{BTreeMap, BTreeSet};

use nasshape_api::QueueSpec;
use tracing::{info, warn};

use crate::dispatch::{DeviceOp, PlannedOp};
use crate::error::CoreError;
use crate::model::{BindingId, DeviceId, ServiceTrafficBinding, TrafficClass, TrafficClassId};
use crate::store::PushKey;

/// Policy state a binding plan is computed against.
pub struct PcqContext<'a> {
    pub classes: &'a BTreeMap<TrafficClassId, TrafficClass>,
    /// Every binding currently in the store.
    pub bindings: &'a [ServiceTrafficBinding],
    pub active: &'a BTreeSet<DeviceId>,
    /// Per-flow rate for the desired binding. `None` runs at the speed cap.
    pub rate_limit: Option<u32>,
}

/// Ops plus the ledger updates they imply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcqPlan {
    pub ops: Vec<PlannedOp>,
    pub forget: Option<PushKey>,
    pub record: Option<PushKey>,
}

/// The queue setup a binding describes, running at `rate_limit` kbps.
pub fn queue_spec(binding: &ServiceTrafficBinding, class: &TrafficClass, rate_limit: u32) -> QueueSpec {
    QueueSpec {
        class_name: class.name.clone(),
        speed_limit: binding.speed_limit,
        rate_limit,
        pcq_limit: binding.pcq_limit,
        pcq_total_limit: binding.pcq_total_limit,
        pools: binding
            .pcq_pools
            .iter()
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect(),
    }
}

/// Plan the move of one binding from `previous` to `desired`. `None` for
/// `desired` means the binding was deleted.
pub fn plan_binding(
    desired: Option<&ServiceTrafficBinding>,
    previous: Option<&ServiceTrafficBinding>,
    ctx: &PcqContext<'_>,
) -> Result<PcqPlan, CoreError> {
    if let Some(binding) = desired {
        binding.validate()?;
    }

    let prev_key = previous.and_then(PushKey::of);
    let new_key = match desired.and_then(PushKey::of) {
        Some(key) if pushable(key, ctx) => Some(key),
        Some(key) => {
            warn!(
                class_id = %key.class_id,
                device_id = %key.device_id,
                "binding target is inactive or its class is empty; not pushing"
            );
            None
        }
        None => None,
    };

    let mut plan = PcqPlan::default();

    if let Some(old) = prev_key.filter(|k| Some(*k) != new_key) {
        let binding_id = previous.map(|b| b.id);
        if queue_in_use(old, binding_id, ctx) {
            info!(
                class_id = %old.class_id,
                speed_limit = old.speed_limit,
                device_id = %old.device_id,
                "queue setup still used by a sibling binding; keeping it"
            );
        } else {
            match ctx.classes.get(&old.class_id) {
                Some(class) => {
                    plan.ops.push(PlannedOp::new(
                        old.device_id,
                        DeviceOp::RemoveQueue {
                            class_name: class.name.clone(),
                            speed_limit: old.speed_limit,
                        },
                    ));
                    let reused_by_new = new_key
                        .is_some_and(|k| k.class_id == old.class_id && k.device_id == old.device_id);
                    if !reused_by_new && !shared_in_use(old, binding_id, class, ctx)? {
                        plan.ops.push(PlannedOp::new(
                            old.device_id,
                            DeviceOp::RemoveClass {
                                class_name: class.name.clone(),
                            },
                        ));
                    }
                }
                None => warn!(
                    class_id = %old.class_id,
                    device_id = %old.device_id,
                    "class of previous queue setup is gone; cannot name its artifacts"
                ),
            }
            plan.forget = Some(old);
        }
    }

    if let (Some(key), Some(binding)) = (new_key, desired) {
        let Some(class) = ctx.classes.get(&key.class_id) else {
            return Err(CoreError::not_found("traffic class", key.class_id));
        };
        plan.ops.push(PlannedOp::new(
            key.device_id,
            DeviceOp::SyncClass {
                class_name: class.name.clone(),
                subnets: class.parsed_subnets()?,
            },
        ));
        plan.ops.push(PlannedOp::new(
            key.device_id,
            DeviceOp::SyncQueue {
                spec: queue_spec(
                    binding,
                    class,
                    ctx.rate_limit.unwrap_or(binding.speed_limit),
                ),
            },
        ));
        info!(
            class = %class.name,
            speed_limit = key.speed_limit,
            device_id = %key.device_id,
            "queue setup planned"
        );
        plan.record = Some(key);
    }

    Ok(plan)
}

fn pushable(key: PushKey, ctx: &PcqContext<'_>) -> bool {
    ctx.active.contains(&key.device_id)
        && ctx
            .classes
            .get(&key.class_id)
            .is_some_and(|c| c.active && !c.subnets.trim().is_empty())
}

/// Whether another active binding describes the exact setup at `key`.
fn queue_in_use(key: PushKey, binding_id: Option<BindingId>, ctx: &PcqContext<'_>) -> bool {
    ctx.bindings
        .iter()
        .any(|b| Some(b.id) != binding_id && PushKey::of(b) == Some(key))
}

/// Whether the class address list and mark rules on `key.device_id` are
/// still needed once the setup at `key` is gone.
fn shared_in_use(
    key: PushKey,
    binding_id: Option<BindingId>,
    class: &TrafficClass,
    ctx: &PcqContext<'_>,
) -> Result<bool, CoreError> {
    let sibling = ctx.bindings.iter().any(|b| {
        Some(b.id) != binding_id
            && PushKey::of(b).is_some_and(|k| k.class_id == key.class_id && k.device_id == key.device_id)
    });
    if sibling {
        return Ok(true);
    }
    if !class.active || class.parsed_subnets()?.is_empty() {
        return Ok(false);
    }
    Ok(class.device_scope(ctx.active)?.contains(&key.device_id))
}
