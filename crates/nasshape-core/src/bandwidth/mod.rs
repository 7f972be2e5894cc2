// ── Bandwidth rule evaluation ──
//
// Picks, per scope, the active rule that wins at a point in time. Lower
// priority numbers win; equal priorities fall back to the lower rule id.
// Selection is pure: applying the result is the engine's job.

pub mod scheduler;

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::model::rules::scale;
use crate::model::{
    BandwidthRule, BindingId, CdnBandwidthRule, Multiplier, RuleId, Schedule, ServiceId,
    ServiceTrafficBinding, TrafficClassId,
};

/// What a multiplier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// Contracted rate of every subscriber on a service.
    Service { service_id: ServiceId },
    /// PCQ setups of one service's bindings to a traffic class.
    TrafficClass {
        class_id: TrafficClassId,
        service_id: ServiceId,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service { service_id } => write!(f, "service {service_id}"),
            Self::TrafficClass {
                class_id,
                service_id,
            } => write!(f, "class {class_id} on service {service_id}"),
        }
    }
}

/// The winning rule for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub scope: Scope,
    pub rule_id: RuleId,
    pub multiplier: Multiplier,
}

/// Which rules an evaluation considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFilter {
    /// Only rules flagged for automatic application.
    AutoApply,
    /// Every enabled rule.
    All,
}

impl RuleFilter {
    fn admits(self, auto_apply: bool) -> bool {
        match self {
            Self::AutoApply => auto_apply,
            Self::All => true,
        }
    }
}

/// Lowest `(priority, id)` among the rules active at `now` that `covers`
/// accepts.
pub fn winner<'a, R, I, F>(rules: I, now: NaiveDateTime, covers: F) -> Option<&'a R>
where
    R: Schedule + 'a,
    I: IntoIterator<Item = &'a R>,
    F: Fn(&R) -> bool,
{
    rules
        .into_iter()
        .filter(|r| r.is_active_at(now) && covers(r))
        .min_by_key(|r| (r.priority(), r.rule_id()))
}

/// Winning service rule for `service` at `now`.
pub fn service_winner<'a>(
    rules: &'a [BandwidthRule],
    service: ServiceId,
    now: NaiveDateTime,
    filter: RuleFilter,
) -> Option<&'a BandwidthRule> {
    winner(rules, now, |r| filter.admits(r.auto_apply) && r.covers(service))
}

/// Winning class rule for `class` as bound to `service` at `now`.
pub fn class_winner<'a>(
    rules: &'a [CdnBandwidthRule],
    class: TrafficClassId,
    service: ServiceId,
    now: NaiveDateTime,
    filter: RuleFilter,
) -> Option<&'a CdnBandwidthRule> {
    winner(rules, now, |r| filter.admits(r.auto_apply) && r.covers(class, service))
}

/// Multiplier a service's contracted rate runs at.
pub fn service_multiplier(
    rules: &[BandwidthRule],
    service: ServiceId,
    now: NaiveDateTime,
    filter: RuleFilter,
) -> Multiplier {
    service_winner(rules, service, now, filter).map_or(Multiplier::NONE, BandwidthRule::multiplier)
}

/// Per-flow rate a binding's PCQ setup runs at: the speed cap scaled by
/// the winning class rule and then by the binding's own time window.
pub fn binding_rate(
    rules: &[CdnBandwidthRule],
    binding: &ServiceTrafficBinding,
    now: NaiveDateTime,
    filter: RuleFilter,
) -> u32 {
    let class_pct = class_winner(
        rules,
        binding.traffic_class_id,
        binding.service_id,
        now,
        filter,
    )
    .map_or(Multiplier::UNCHANGED, |r| r.speed_multiplier);
    scale(
        scale(binding.speed_limit, class_pct),
        binding.window_multiplier(now.time()),
    )
}

/// Every scope with an active winner at `now`.
///
/// Services are evaluated individually; class rules are evaluated per
/// (class, service) pair that some PCQ binding uses.
pub fn evaluate(
    now: NaiveDateTime,
    rules: &[BandwidthRule],
    cdn_rules: &[CdnBandwidthRule],
    services: &[ServiceId],
    bindings: &[ServiceTrafficBinding],
    filter: RuleFilter,
) -> Vec<Evaluation> {
    let mut out: Vec<Evaluation> = services
        .iter()
        .filter_map(|&service_id| {
            service_winner(rules, service_id, now, filter).map(|r| Evaluation {
                scope: Scope::Service { service_id },
                rule_id: r.id,
                multiplier: r.multiplier(),
            })
        })
        .collect();

    let mut pairs: Vec<(TrafficClassId, ServiceId)> = bindings
        .iter()
        .filter(|b| b.active && b.has_pcq())
        .map(|b| (b.traffic_class_id, b.service_id))
        .collect();
    pairs.sort_unstable();
    pairs.dedup();

    out.extend(pairs.into_iter().filter_map(|(class_id, service_id)| {
        class_winner(cdn_rules, class_id, service_id, now, filter).map(|r| Evaluation {
            scope: Scope::TrafficClass {
                class_id,
                service_id,
            },
            rule_id: r.id,
            multiplier: Multiplier::uniform(r.speed_multiplier),
        })
    }));
    out
}

/// Bindings a class rule rewrites when applied.
pub fn bindings_in_scope<'a>(
    rule: &'a CdnBandwidthRule,
    bindings: &'a [ServiceTrafficBinding],
) -> impl Iterator<Item = &'a ServiceTrafficBinding> + 'a {
    bindings
        .iter()
        .filter(|b| b.active && b.has_pcq() && rule.covers(b.traffic_class_id, b.service_id))
}

/// Keyed per-binding rate table, used by the scheduler to spot changes.
pub fn binding_rates(
    rules: &[CdnBandwidthRule],
    bindings: &[ServiceTrafficBinding],
    now: NaiveDateTime,
    filter: RuleFilter,
) -> Vec<(BindingId, u32)> {
    bindings
        .iter()
        .filter(|b| b.active && b.has_pcq())
        .map(|b| (b.id, binding_rate(rules, b, now, filter)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{DaySet, DeviceId, TimeWindow, Trigger};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        // 2026-03-04 is a Wednesday.
        NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn hm(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn rule(id: u64, priority: i32, pct: u32, start: u32, end: u32) -> BandwidthRule {
        BandwidthRule {
            id: RuleId(id),
            name: format!("rule {id}"),
            trigger: Trigger::Time,
            window: TimeWindow::new(hm(start), hm(end)),
            days: DaySet::default(),
            download_multiplier: pct,
            upload_multiplier: pct,
            service_ids: Vec::new(),
            priority,
            enabled: true,
            auto_apply: true,
        }
    }

    fn cdn_rule(id: u64, pct: u32, classes: Vec<u64>) -> CdnBandwidthRule {
        CdnBandwidthRule {
            id: RuleId(id),
            name: format!("cdn {id}"),
            trigger: Trigger::Time,
            window: TimeWindow::new(hm(0), hm(0)),
            days: DaySet::default(),
            speed_multiplier: pct,
            traffic_class_ids: classes.into_iter().map(TrafficClassId).collect(),
            service_ids: Vec::new(),
            priority: 0,
            enabled: true,
            auto_apply: true,
        }
    }

    fn binding(id: u64, class: u64, service: u64) -> ServiceTrafficBinding {
        ServiceTrafficBinding {
            id: BindingId(id),
            service_id: ServiceId(service),
            traffic_class_id: TrafficClassId(class),
            speed_limit: 10_000,
            bypass_quota: false,
            pcq_enabled: true,
            pcq_limit: 50,
            pcq_total_limit: 2000,
            device_id: Some(DeviceId(1)),
            pcq_pools: vec!["pool".into()],
            active: true,
            time_window: None,
        }
    }

    #[test]
    fn lower_priority_number_wins() {
        let rules = vec![rule(1, 20, 150, 0, 0), rule(2, 10, 200, 0, 0)];
        let w = service_winner(&rules, ServiceId(1), at(12, 0), RuleFilter::All).unwrap();
        assert_eq!(w.id, RuleId(2));
    }

    #[test]
    fn equal_priority_falls_back_to_lowest_id() {
        let rules = vec![rule(9, 10, 150, 0, 0), rule(3, 10, 200, 0, 0)];
        let w = service_winner(&rules, ServiceId(1), at(12, 0), RuleFilter::All).unwrap();
        assert_eq!(w.id, RuleId(3));
    }

    #[test]
    fn overnight_rule_only_wins_inside_its_window() {
        let rules = vec![rule(1, 0, 200, 22, 6)];
        for (h, m, active) in [(23, 30, true), (3, 0, true), (12, 0, false)] {
            assert_eq!(
                service_winner(&rules, ServiceId(1), at(h, m), RuleFilter::All).is_some(),
                active,
                "{h:02}:{m:02}"
            );
        }
    }

    #[test]
    fn scoped_rule_skips_other_services() {
        let mut scoped = rule(1, 0, 50, 0, 0);
        scoped.service_ids = vec![ServiceId(2)];
        let rules = vec![scoped, rule(2, 5, 150, 0, 0)];
        assert_eq!(
            service_multiplier(&rules, ServiceId(1), at(9, 0), RuleFilter::All),
            Multiplier::uniform(150)
        );
        assert_eq!(
            service_multiplier(&rules, ServiceId(2), at(9, 0), RuleFilter::All),
            Multiplier::uniform(50)
        );
    }

    #[test]
    fn manual_rules_are_not_auto_applied() {
        let mut manual = rule(1, 0, 200, 0, 0);
        manual.auto_apply = false;
        let rules = vec![manual];
        assert_eq!(
            service_multiplier(&rules, ServiceId(1), at(9, 0), RuleFilter::AutoApply),
            Multiplier::NONE
        );
        assert_eq!(
            service_multiplier(&rules, ServiceId(1), at(9, 0), RuleFilter::All),
            Multiplier::uniform(200)
        );
    }

    #[test]
    fn disabled_rules_never_win() {
        let mut off = rule(1, 0, 200, 0, 0);
        off.enabled = false;
        assert!(service_winner(&[off], ServiceId(1), at(9, 0), RuleFilter::All).is_none());
    }

    #[test]
    fn binding_rate_stacks_class_rule_and_window() {
        let rules = vec![cdn_rule(1, 200, vec![7])];
        let mut b = binding(1, 7, 1);
        b.time_window = Some(crate::model::BindingWindow {
            window: TimeWindow::new(hm(18), hm(23)),
            speed_multiplier: 50,
        });
        assert_eq!(binding_rate(&rules, &b, at(20, 0), RuleFilter::All), 10_000);
        assert_eq!(binding_rate(&rules, &b, at(9, 0), RuleFilter::All), 20_000);
    }

    #[test]
    fn evaluate_lists_services_and_bound_classes() {
        let rules = vec![rule(1, 0, 150, 0, 0)];
        let cdn = vec![cdn_rule(2, 300, vec![7])];
        let bindings = vec![binding(1, 7, 1), binding(2, 7, 1), binding(3, 8, 1)];
        let evals = evaluate(
            at(9, 0),
            &rules,
            &cdn,
            &[ServiceId(1)],
            &bindings,
            RuleFilter::AutoApply,
        );
        assert_eq!(
            evals,
            vec![
                Evaluation {
                    scope: Scope::Service {
                        service_id: ServiceId(1)
                    },
                    rule_id: RuleId(1),
                    multiplier: Multiplier::uniform(150),
                },
                Evaluation {
                    scope: Scope::TrafficClass {
                        class_id: TrafficClassId(7),
                        service_id: ServiceId(1)
                    },
                    rule_id: RuleId(2),
                    multiplier: Multiplier::uniform(300),
                },
            ]
        );
    }
}
