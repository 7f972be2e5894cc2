// ── Traffic class (CDN) reconciliation ──

use std::collections::BTreeSet;

use tracing::info;

use crate::dispatch::{DeviceOp, PlannedOp};
use crate::error::CoreError;
use crate::keyset;
use crate::model::{DeviceId, TrafficClass};

/// What was last pushed for a class: its name and resolved device scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousClass {
    pub name: String,
    pub devices: BTreeSet<DeviceId>,
}

impl PreviousClass {
    /// Resolve the scope a previous revision of the class targeted.
    pub fn from_class(class: &TrafficClass, active: &BTreeSet<DeviceId>) -> Result<Self, CoreError> {
        let devices = if class.active && !class.parsed_subnets()?.is_empty() {
            class.device_scope(active)?
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            name: class.name.clone(),
            devices,
        })
    }
}

/// Plan the device ops that move a class from `previous` to `desired`.
///
/// Malformed subnet or device lists fail before any op is produced.
/// Removals always precede pushes, so a device sees a renamed class's old
/// artifacts torn down before the new ones appear.
pub fn plan_class(
    desired: &TrafficClass,
    previous: Option<&PreviousClass>,
    active: &BTreeSet<DeviceId>,
) -> Result<Vec<PlannedOp>, CoreError> {
    let subnets = desired.parsed_subnets()?;
    let new_scope = desired.device_scope(active)?;
    let prev_scope = previous.map(|p| p.devices.clone()).unwrap_or_default();
    let prev_name = previous.map_or(desired.name.as_str(), |p| p.name.as_str());

    let remove = |name: &str, scope: &BTreeSet<DeviceId>| {
        scope
            .iter()
            .map(|&id| {
                PlannedOp::new(
                    id,
                    DeviceOp::RemoveClass {
                        class_name: name.to_owned(),
                    },
                )
            })
            .collect::<Vec<_>>()
    };

    if subnets.is_empty() && previous.is_none() {
        info!(class = %desired.name, "no subnets and nothing pushed before; nothing to do");
        return Ok(Vec::new());
    }

    if !desired.active || subnets.is_empty() {
        let targets = keyset::union(&prev_scope, &new_scope);
        info!(
            class = %desired.name,
            active = desired.active,
            devices = targets.len(),
            "class withdrawn; removing from previous and current scope"
        );
        return Ok(remove(prev_name, &targets));
    }

    let mut ops = if prev_name == desired.name {
        remove(prev_name, &keyset::removed(&prev_scope, &new_scope))
    } else {
        info!(
            from = prev_name,
            to = %desired.name,
            devices = prev_scope.len(),
            "class renamed; removing old artifacts first"
        );
        remove(prev_name, &prev_scope)
    };

    ops.extend(new_scope.iter().map(|&id| {
        PlannedOp::new(
            id,
            DeviceOp::SyncClass {
                class_name: desired.name.clone(),
                subnets: subnets.clone(),
            },
        )
    }));
    Ok(ops)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::TrafficClassId;

    fn ids(raw: &[u64]) -> BTreeSet<DeviceId> {
        raw.iter().copied().map(DeviceId).collect()
    }

    fn class(name: &str, subnets: &str, devices: &str) -> TrafficClass {
        TrafficClass {
            id: TrafficClassId(1),
            name: name.into(),
            color: "#e50914".into(),
            subnets: subnets.into(),
            device_ids: devices.into(),
            active: true,
        }
    }

    fn summary(ops: &[PlannedOp]) -> Vec<(u64, String)> {
        ops.iter()
            .map(|p| {
                let what = match &p.op {
                    DeviceOp::SyncClass { class_name, .. } => format!("sync {class_name}"),
                    DeviceOp::RemoveClass { class_name } => format!("remove {class_name}"),
                    other => other.kind().to_owned(),
                };
                (p.device_id.get(), what)
            })
            .collect()
    }

    #[test]
    fn new_class_pushes_to_every_active_device() {
        let ops = plan_class(&class("Netflix", "1.2.3.0/24, 4.5.6.0/24", ""), None, &ids(&[1, 2])).unwrap();
        assert_eq!(
            summary(&ops),
            vec![(1, "sync Netflix".into()), (2, "sync Netflix".into())]
        );
        let DeviceOp::SyncClass { subnets, .. } = &ops[0].op else {
            panic!("expected sync");
        };
        assert_eq!(subnets.len(), 2);
    }

    #[test]
    fn scope_change_removes_only_dropped_devices() {
        let prev = PreviousClass {
            name: "Netflix".into(),
            devices: ids(&[1, 2, 3]),
        };
        let ops = plan_class(
            &class("Netflix", "1.2.3.0/24", "2,3,4"),
            Some(&prev),
            &ids(&[1, 2, 3, 4]),
        )
        .unwrap();
        assert_eq!(
            summary(&ops),
            vec![
                (1, "remove Netflix".into()),
                (2, "sync Netflix".into()),
                (3, "sync Netflix".into()),
                (4, "sync Netflix".into()),
            ]
        );
    }

    #[test]
    fn unchanged_class_issues_no_removals() {
        let prev = PreviousClass {
            name: "Netflix".into(),
            devices: ids(&[1, 2]),
        };
        let desired = class("Netflix", "1.2.3.0/24", "");
        let first = plan_class(&desired, Some(&prev), &ids(&[1, 2])).unwrap();
        let second = plan_class(&desired, Some(&prev), &ids(&[1, 2])).unwrap();
        assert_eq!(first, second);
        assert!(first.iter().all(|p| !p.op.is_removal()));
    }

    #[test]
    fn rename_removes_old_name_on_whole_previous_scope_first() {
        let prev = PreviousClass {
            name: "A".into(),
            devices: ids(&[1, 2]),
        };
        let ops = plan_class(&class("B", "1.2.3.0/24", "1,2"), Some(&prev), &ids(&[1, 2])).unwrap();
        assert_eq!(
            summary(&ops),
            vec![
                (1, "remove A".into()),
                (2, "remove A".into()),
                (1, "sync B".into()),
                (2, "sync B".into()),
            ]
        );
    }

    #[test]
    fn deactivation_clears_previous_and_current_scope() {
        let prev = PreviousClass {
            name: "Netflix".into(),
            devices: ids(&[1, 2, 3]),
        };
        let mut desired = class("Netflix", "1.2.3.0/24", "3,4");
        desired.active = false;
        let ops = plan_class(&desired, Some(&prev), &ids(&[1, 2, 3, 4])).unwrap();
        assert_eq!(
            summary(&ops),
            vec![
                (1, "remove Netflix".into()),
                (2, "remove Netflix".into()),
                (3, "remove Netflix".into()),
                (4, "remove Netflix".into()),
            ]
        );
    }

    #[test]
    fn emptied_subnets_remove_under_previous_name() {
        let prev = PreviousClass {
            name: "Old".into(),
            devices: ids(&[1]),
        };
        let ops = plan_class(&class("New", " ", ""), Some(&prev), &ids(&[1])).unwrap();
        assert_eq!(summary(&ops), vec![(1, "remove Old".into())]);
    }

    #[test]
    fn empty_new_class_is_a_noop() {
        let ops = plan_class(&class("Netflix", "", ""), None, &ids(&[1, 2])).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn malformed_lists_fail_before_planning() {
        assert!(matches!(
            plan_class(&class("X", "1.2.3.0/33", ""), None, &ids(&[1])),
            Err(CoreError::InvalidSubnetList { .. })
        ));
        assert!(matches!(
            plan_class(&class("X", "1.2.3.0/24", "one"), None, &ids(&[1])),
            Err(CoreError::InvalidDeviceList { .. })
        ));
    }

    #[test]
    fn explicit_scope_ignores_inactive_devices() {
        let ops = plan_class(&class("X", "1.2.3.0/24", "1,9"), None, &ids(&[1, 2])).unwrap();
        assert_eq!(summary(&ops), vec![(1, "sync X".into())]);
    }

    #[test]
    fn previous_scope_of_inactive_class_is_empty() {
        let mut old = class("X", "1.2.3.0/24", "");
        old.active = false;
        let prev = PreviousClass::from_class(&old, &ids(&[1, 2])).unwrap();
        assert!(prev.devices.is_empty());
    }
}
