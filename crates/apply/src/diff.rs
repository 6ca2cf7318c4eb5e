//! Semantic Differ: does a live object already carry the desired intent?

use conflux_core::tree::{extra_keys, is_submap, semantic_eq};
use conflux_core::MetadataPolicy;
use serde_json::Value as Json;

const METADATA: &str = "metadata";
const STATUS: &str = "status";

/// True when applying `desired` over `actual` would be a no-op.
///
/// Every top-level key of `desired` other than `status` and `metadata` must
/// be present in `actual` with a structurally equal value, and `actual` may
/// not carry top-level keys that `desired` lacks (beyond `metadata` and
/// `status`). `metadata` takes part only as `policy` dictates.
pub fn same_intent(desired: &Json, actual: &Json, policy: MetadataPolicy) -> bool {
    let (d, a) = match (desired.as_object(), actual.as_object()) {
        (Some(d), Some(a)) => (d, a),
        _ => return semantic_eq(desired, actual),
    };
    for (key, dv) in d.iter() {
        match key.as_str() {
            STATUS => continue,
            METADATA => {
                if !metadata_matches(dv, a.get(METADATA), policy) {
                    return false;
                }
            }
            _ => match a.get(key) {
                Some(av) if semantic_eq(dv, av) => {}
                _ => return false,
            },
        }
    }
    extra_keys(d, a, &[METADATA, STATUS]).is_empty()
}

fn metadata_matches(desired: &Json, actual: Option<&Json>, policy: MetadataPolicy) -> bool {
    match policy {
        MetadataPolicy::Ignore => true,
        MetadataPolicy::LabelsAndAnnotations => ["labels", "annotations"].iter().all(|field| {
            let want = match desired.get(*field).and_then(|v| v.as_object()) {
                Some(m) => m,
                None => return true,
            };
            match actual.and_then(|m| m.get(*field)).and_then(|v| v.as_object()) {
                Some(have) => is_submap(want, have),
                None => want.is_empty(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn desired() -> Json {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "reconcile-demo", "namespace": "default", "labels": { "app": "demo" } },
            "data": { "ui.properties": "color=pink\n" }
        })
    }

    fn live() -> Json {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "reconcile-demo",
                "namespace": "default",
                "uid": "8a1f0b0e-0000-0000-0000-000000000001",
                "resourceVersion": "4711",
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "labels": { "app": "demo", "extra": "x" }
            },
            "data": { "ui.properties": "color=pink\n" }
        })
    }

    #[test]
    fn generated_metadata_and_status_do_not_count() {
        let mut actual = live();
        actual["status"] = json!({ "observedGeneration": 3 });
        assert!(same_intent(&desired(), &actual, MetadataPolicy::Ignore));
    }

    #[test]
    fn changed_value_is_drift() {
        let mut actual = live();
        actual["data"]["ui.properties"] = json!("color=blue\n");
        assert!(!same_intent(&desired(), &actual, MetadataPolicy::Ignore));
    }

    #[test]
    fn extra_top_level_key_in_actual_is_drift() {
        let mut actual = live();
        actual["binaryData"] = json!({ "blob": "AAEC" });
        assert!(!same_intent(&desired(), &actual, MetadataPolicy::Ignore));
    }

    #[test]
    fn key_missing_from_actual_is_drift() {
        let mut actual = live();
        actual.as_object_mut().unwrap().remove("data");
        assert!(!same_intent(&desired(), &actual, MetadataPolicy::Ignore));
    }

    #[test]
    fn list_order_matters() {
        let d = json!({ "apiVersion": "v1", "kind": "Service", "spec": { "ports": [ {"port": 80}, {"port": 443} ] } });
        let a = json!({ "apiVersion": "v1", "kind": "Service", "spec": { "ports": [ {"port": 443}, {"port": 80} ] } });
        assert!(!same_intent(&d, &a, MetadataPolicy::Ignore));
    }

    #[test]
    fn desired_status_is_ignored() {
        let mut d = desired();
        d["status"] = json!({ "phase": "Ready" });
        assert!(same_intent(&d, &live(), MetadataPolicy::Ignore));
    }

    #[test]
    fn label_policy_detects_missing_label() {
        let mut actual = live();
        assert!(same_intent(&desired(), &actual, MetadataPolicy::LabelsAndAnnotations));
        actual["metadata"]["labels"] = json!({ "extra": "x" });
        assert!(same_intent(&desired(), &actual, MetadataPolicy::Ignore));
        assert!(!same_intent(&desired(), &actual, MetadataPolicy::LabelsAndAnnotations));
    }

    #[test]
    fn label_policy_tolerates_absent_desired_annotations() {
        let mut d = desired();
        d["metadata"]["annotations"] = json!({});
        assert!(same_intent(&d, &live(), MetadataPolicy::LabelsAndAnnotations));
        d["metadata"]["annotations"] = json!({ "team": "core" });
        assert!(!same_intent(&d, &live(), MetadataPolicy::LabelsAndAnnotations));
    }
}
