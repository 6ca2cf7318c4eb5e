//! Condition Merger: turns per-resource results into a stable condition
//! history and a single work-level "Applied" condition.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use conflux_core::conditions::find_condition;
use conflux_core::{
    ConditionStatus, ManifestCondition, ResourceIdentifier, StatusCondition, WorkStatus, CONDITION_APPLIED,
};

use crate::engine::ReconcileResult;

pub const REASON_MANIFEST_APPLIED: &str = "ManifestApplyDone";
pub const REASON_MANIFEST_FAILED: &str = "ManifestApplyFailed";
pub const REASON_WORK_APPLIED: &str = "WorkApplyDone";
pub const REASON_WORK_FAILED: &str = "WorkApplyFailed";

/// "Applied" manifest condition per result, keyed by identifier.
pub fn applied_conditions(results: &[ReconcileResult], now: DateTime<Utc>) -> BTreeMap<ResourceIdentifier, ManifestCondition> {
    results
        .iter()
        .map(|r| {
            let cond = match &r.err {
                None => StatusCondition::new(
                    CONDITION_APPLIED,
                    ConditionStatus::True,
                    REASON_MANIFEST_APPLIED,
                    "The manifest is applied successfully",
                    now,
                ),
                Some(e) => StatusCondition::new(
                    CONDITION_APPLIED,
                    ConditionStatus::False,
                    REASON_MANIFEST_FAILED,
                    format!("Failed to apply the manifest with err: {}", e),
                    now,
                ),
            };
            (r.identifier.clone(), ManifestCondition { identifier: r.identifier.clone(), conditions: vec![cond] })
        })
        .collect()
}

/// A transition time strictly after `prior`.
fn transition_after(prior: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > prior { now } else { prior + Duration::microseconds(1) }
}

fn merge_status_condition(prior: &StatusCondition, new: &StatusCondition, now: DateTime<Utc>) -> StatusCondition {
    let last_transition_time = if prior.status == new.status {
        prior.last_transition_time
    } else {
        transition_after(prior.last_transition_time, now)
    };
    StatusCondition {
        type_: new.type_.clone(),
        status: new.status,
        reason: new.reason.clone(),
        message: new.message.clone(),
        last_transition_time,
    }
}

/// Conditions of `new`, each merged with the prior condition of the same
/// type. Reason and message always come from `new`; the transition time is
/// kept unless the status changed. Types only present in `prior` are dropped.
pub fn merge_status_conditions(prior: &[StatusCondition], new: &[StatusCondition], now: DateTime<Utc>) -> Vec<StatusCondition> {
    new.iter()
        .map(|n| match find_condition(prior, &n.type_) {
            Some(p) => merge_status_condition(p, n, now),
            None => StatusCondition { last_transition_time: now, ..n.clone() },
        })
        .collect()
}

/// Merge per identifier. Identifiers only present in `prior` are resources
/// no longer desired and are dropped.
pub fn merge_manifest_conditions(
    new: &BTreeMap<ResourceIdentifier, ManifestCondition>,
    prior: &[ManifestCondition],
    now: DateTime<Utc>,
) -> Vec<ManifestCondition> {
    let prior_by_id: BTreeMap<&ResourceIdentifier, &ManifestCondition> = prior.iter().map(|c| (&c.identifier, c)).collect();
    new.values()
        .map(|n| match prior_by_id.get(&n.identifier) {
            Some(p) => ManifestCondition {
                identifier: n.identifier.clone(),
                conditions: merge_status_conditions(&p.conditions, &n.conditions, now),
            },
            None => n.clone(),
        })
        .collect()
}

/// Work-level "Applied": true only if every manifest's "Applied" is true.
/// The first manifest found failing, in identifier order, names the reason.
pub fn aggregate_condition(manifest_conditions: &[ManifestCondition], now: DateTime<Utc>) -> StatusCondition {
    let mut ordered: Vec<&ManifestCondition> = manifest_conditions.iter().collect();
    ordered.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    for mc in ordered {
        match mc.condition(CONDITION_APPLIED) {
            None => {
                return StatusCondition::new(
                    CONDITION_APPLIED,
                    ConditionStatus::False,
                    REASON_WORK_FAILED,
                    format!("Resource {} not applied", mc.identifier),
                    now,
                );
            }
            Some(c) if !c.is_true() => {
                return StatusCondition::new(
                    CONDITION_APPLIED,
                    ConditionStatus::False,
                    REASON_WORK_FAILED,
                    format!("Resource {} failed to be applied: {}", mc.identifier, c.message),
                    now,
                );
            }
            Some(_) => {}
        }
    }
    StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, REASON_WORK_APPLIED, "Manifests in work are applied", now)
}

/// Next status record: results become manifest conditions merged with the
/// prior history, and the aggregate is merged with the prior work conditions
/// so its transition time is stable too.
pub fn advance_status(prior: &WorkStatus, results: &[ReconcileResult], now: DateTime<Utc>) -> WorkStatus {
    let fresh = applied_conditions(results, now);
    let manifest_conditions = merge_manifest_conditions(&fresh, &prior.manifest_conditions, now);
    let aggregate = aggregate_condition(&manifest_conditions, now);
    let mut conditions = merge_status_conditions(&prior.conditions, std::slice::from_ref(&aggregate), now);
    // other work-level condition types are owned by someone else; keep them
    for c in prior.conditions.iter().filter(|c| c.type_ != CONDITION_APPLIED) {
        conditions.push(c.clone());
    }
    WorkStatus { conditions, manifest_conditions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReconcileError;
    use chrono::TimeZone;
    use conflux_core::IdentityError;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(name: &str) -> ResourceIdentifier {
        ResourceIdentifier {
            version: "v1".into(),
            kind: "ConfigMap".into(),
            resource: Some("configmaps".into()),
            namespace: Some("default".into()),
            name: name.into(),
            ..Default::default()
        }
    }

    fn ok(name: &str) -> ReconcileResult {
        ReconcileResult { identifier: id(name), updated: true, err: None }
    }

    fn failed(name: &str) -> ReconcileResult {
        ReconcileResult { identifier: id(name), updated: false, err: Some(ReconcileError::Identity(IdentityError::MissingName)) }
    }

    #[test]
    fn unchanged_status_keeps_transition_time_and_refreshes_message() {
        let prior = vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, "Old", "old msg", t(0))];
        let new = vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, "New", "new msg", t(50))];
        let merged = merge_status_conditions(&prior, &new, t(50));
        assert_eq!(merged[0].last_transition_time, t(0));
        assert_eq!(merged[0].reason, "New");
        assert_eq!(merged[0].message, "new msg");
    }

    #[test]
    fn changed_status_moves_transition_time_forward() {
        let prior = vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, "A", "", t(10))];
        let new = vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::False, "B", "", t(20))];
        let merged = merge_status_conditions(&prior, &new, t(20));
        assert_eq!(merged[0].last_transition_time, t(20));
        assert!(merged[0].last_transition_time > prior[0].last_transition_time);
    }

    #[test]
    fn transition_is_strictly_later_even_with_a_lagging_clock() {
        let prior = vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, "A", "", t(100))];
        let new = vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::False, "B", "", t(5))];
        let merged = merge_status_conditions(&prior, &new, t(5));
        assert!(merged[0].last_transition_time > t(100));
    }

    #[test]
    fn manifest_merge_is_keyed_by_new_identifiers() {
        let prior = vec![
            ManifestCondition {
                identifier: id("kept"),
                conditions: vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, "x", "", t(0))],
            },
            ManifestCondition {
                identifier: id("gone"),
                conditions: vec![StatusCondition::new(CONDITION_APPLIED, ConditionStatus::True, "x", "", t(0))],
            },
        ];
        let fresh = applied_conditions(&[ok("kept"), ok("new")], t(30));
        let merged = merge_manifest_conditions(&fresh, &prior, t(30));
        let names: Vec<&str> = merged.iter().map(|m| m.identifier.name.as_str()).collect();
        assert_eq!(names, vec!["kept", "new"]);
        assert_eq!(merged[0].conditions[0].last_transition_time, t(0));
        assert_eq!(merged[1].conditions[0].last_transition_time, t(30));
    }

    #[test]
    fn failures_become_false_conditions_with_error_text() {
        let fresh = applied_conditions(&[failed("bad")], t(0));
        let cond = fresh[&id("bad")].condition(CONDITION_APPLIED).unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, REASON_MANIFEST_FAILED);
        assert!(cond.message.contains("missing object name"), "{}", cond.message);
    }

    #[test]
    fn aggregate_true_only_when_all_applied() {
        let all_ok: Vec<ManifestCondition> = applied_conditions(&[ok("a"), ok("b")], t(0)).into_values().collect();
        let agg = aggregate_condition(&all_ok, t(0));
        assert!(agg.is_true());
        assert_eq!(agg.reason, REASON_WORK_APPLIED);

        let mixed: Vec<ManifestCondition> = applied_conditions(&[ok("a"), failed("b"), failed("c")], t(0)).into_values().collect();
        let agg = aggregate_condition(&mixed, t(0));
        assert_eq!(agg.status, ConditionStatus::False);
        assert_eq!(agg.reason, REASON_WORK_FAILED);
        assert!(agg.message.contains("default/b"), "first failure wins: {}", agg.message);
    }

    #[test]
    fn aggregate_treats_missing_applied_as_failure() {
        let mcs = vec![ManifestCondition { identifier: id("bare"), conditions: vec![] }];
        let agg = aggregate_condition(&mcs, t(0));
        assert_eq!(agg.status, ConditionStatus::False);
        assert!(agg.message.contains("not applied"));
    }

    #[test]
    fn advance_keeps_aggregate_time_across_cycles() {
        let first = advance_status(&WorkStatus::default(), &[ok("a")], t(0));
        let second = advance_status(&first, &[ReconcileResult { identifier: id("a"), updated: false, err: None }], t(60));
        assert_eq!(second.applied().unwrap().last_transition_time, t(0));
        assert_eq!(second.manifest_conditions[0].conditions[0].last_transition_time, t(0));

        let third = advance_status(&second, &[failed("a")], t(120));
        assert_eq!(third.applied().unwrap().status, ConditionStatus::False);
        assert_eq!(third.applied().unwrap().last_transition_time, t(120));
    }

    #[test]
    fn advance_preserves_foreign_work_conditions() {
        let prior = WorkStatus {
            conditions: vec![StatusCondition::new("Available", ConditionStatus::Unknown, "Probe", "", t(0))],
            manifest_conditions: vec![],
        };
        let next = advance_status(&prior, &[ok("a")], t(10));
        assert_eq!(next.conditions.len(), 2);
        assert!(find_condition(&next.conditions, "Available").is_some());
    }
}
