//! Immutable engine configuration.
//!
//! Defaults mirror what the reconciler has always done; `from_env` lets a
//! deployment override them without code changes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub const DEFAULT_OWNER_ANNOTATION: &str = "cluster-reconciler-managed";
pub const DEFAULT_OWNER_VALUE: &str = "true";

/// Resource types (group -> plural names) that must never be managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreList(BTreeMap<String, BTreeSet<String>>);

impl IgnoreList {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, group: &str, resource: &str) -> Self {
        self.0.entry(group.to_string()).or_default().insert(resource.to_string());
        self
    }

    pub fn contains(&self, group: &str, resource: &str) -> bool {
        self.0.get(group).map(|set| set.contains(resource)).unwrap_or(false)
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        Self::empty()
            .with("", "nodes")
            .with("", "pods")
            .with("coordination.k8s.io", "leases")
            .with("metrics.k8s.io", "nodes")
            .with("metrics.k8s.io", "pods")
    }
}

/// Fixed key/value annotation marking resources this engine manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTag {
    pub key: String,
    pub value: String,
}

impl Default for OwnershipTag {
    fn default() -> Self {
        Self { key: DEFAULT_OWNER_ANNOTATION.to_string(), value: DEFAULT_OWNER_VALUE.to_string() }
    }
}

impl OwnershipTag {
    /// Annotation present and equal to the sentinel.
    pub fn is_managed(&self, doc: &serde_json::Value) -> bool {
        doc.get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(&self.key))
            .and_then(|v| v.as_str())
            == Some(self.value.as_str())
    }

    /// Copy of `doc` carrying the ownership annotation.
    pub fn stamp(&self, doc: &serde_json::Value) -> serde_json::Value {
        let mut out = doc.clone();
        if let Some(obj) = out.as_object_mut() {
            let meta = obj.entry("metadata").or_insert_with(|| serde_json::json!({}));
            if let Some(meta) = meta.as_object_mut() {
                let annos = meta.entry("annotations").or_insert_with(|| serde_json::json!({}));
                if !annos.is_object() {
                    *annos = serde_json::json!({});
                }
                if let Some(annos) = annos.as_object_mut() {
                    annos.insert(self.key.clone(), serde_json::Value::String(self.value.clone()));
                }
            }
        }
        out
    }
}

/// How the `metadata` block takes part in intent comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataPolicy {
    /// Metadata never causes drift.
    #[default]
    Ignore,
    /// Desired labels and annotations must be present, with equal values, on
    /// the live object. Extra live entries are tolerated.
    LabelsAndAnnotations,
}

impl std::str::FromStr for MetadataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "labels-and-annotations" | "labels" => Ok(Self::LabelsAndAnnotations),
            other => Err(format!("unknown metadata policy: {} (expect ignore|labels-and-annotations)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub ignore: IgnoreList,
    pub ownership: OwnershipTag,
    pub metadata_policy: MetadataPolicy,
    /// Maximum in-flight per-resource tasks within one cycle. 1 runs sequentially.
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ignore: IgnoreList::default(),
            ownership: OwnershipTag::default(),
            metadata_policy: MetadataPolicy::default(),
            concurrency: 1,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `CONFLUX_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = std::env::var("CONFLUX_CONCURRENCY").ok().and_then(|s| s.parse::<usize>().ok()) {
            cfg.concurrency = n.max(1);
        }
        if let Some(p) = std::env::var("CONFLUX_METADATA_POLICY").ok().and_then(|s| s.parse().ok()) {
            cfg.metadata_policy = p;
        }
        if let Ok(key) = std::env::var("CONFLUX_OWNER_ANNOTATION") {
            if !key.is_empty() { cfg.ownership.key = key; }
        }
        if let Ok(value) = std::env::var("CONFLUX_OWNER_VALUE") {
            if !value.is_empty() { cfg.ownership.value = value; }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_ignore_list_covers_system_types() {
        let ig = IgnoreList::default();
        assert!(ig.contains("", "pods"));
        assert!(ig.contains("", "nodes"));
        assert!(ig.contains("coordination.k8s.io", "leases"));
        assert!(ig.contains("metrics.k8s.io", "pods"));
        assert!(!ig.contains("", "configmaps"));
        assert!(!ig.contains("apps", "pods"));
    }

    #[test]
    fn stamp_adds_annotation_without_touching_source() {
        let tag = OwnershipTag::default();
        let doc = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "x", "annotations": {"a": "b"}}});
        let stamped = tag.stamp(&doc);
        assert!(!tag.is_managed(&doc));
        assert!(tag.is_managed(&stamped));
        assert_eq!(stamped["metadata"]["annotations"]["a"], "b");
    }

    #[test]
    fn stamp_creates_metadata_when_absent() {
        let tag = OwnershipTag { key: "owner".into(), value: "me".into() };
        let stamped = tag.stamp(&json!({"kind": "ConfigMap"}));
        assert_eq!(stamped["metadata"]["annotations"]["owner"], "me");
    }

    #[test]
    fn managed_requires_sentinel_value() {
        let tag = OwnershipTag::default();
        let doc = json!({"metadata": {"annotations": {"cluster-reconciler-managed": "false"}}});
        assert!(!tag.is_managed(&doc));
    }

    #[test]
    fn metadata_policy_parses() {
        assert_eq!("ignore".parse::<MetadataPolicy>(), Ok(MetadataPolicy::Ignore));
        assert_eq!("Labels-And-Annotations".parse::<MetadataPolicy>(), Ok(MetadataPolicy::LabelsAndAnnotations));
        assert!("strict".parse::<MetadataPolicy>().is_err());
    }
}
