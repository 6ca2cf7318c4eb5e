//! Conflux core types: resource identity, semi-structured documents, status
//! conditions and engine configuration.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

pub mod conditions;
pub mod config;
pub mod tree;

pub use conditions::{ConditionStatus, ManifestCondition, StatusCondition, WorkStatus, CONDITION_APPLIED};
pub use config::{EngineConfig, IgnoreList, MetadataPolicy, OwnershipTag};

/// Errors raised while deriving an identifier from a document header.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("incomplete group/version/kind: {0}")]
    IncompleteIdentity(String),
    #[error("missing object name")]
    MissingName,
}

/// Composite key for a resource.
///
/// `resource` (the plural collection name) stays `None` until the identifier
/// has been resolved against discovery. `ordinal` is the position of the
/// document in its input list and lets malformed documents be tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    #[serde(default)]
    pub ordinal: usize,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: String,
}

impl ResourceIdentifier {
    /// Identifier for a document known only by its input position.
    pub fn from_ordinal(ordinal: usize) -> Self {
        Self { ordinal, ..Default::default() }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    /// Kind, version and name are all present.
    pub fn is_complete(&self) -> bool {
        !self.kind.is_empty() && !self.version.is_empty() && !self.name.is_empty()
    }

    /// The queryable address, once the plural resource name is known.
    pub fn target(&self) -> Option<ApiTarget> {
        let resource = self.resource.as_deref().filter(|r| !r.is_empty())?;
        Some(ApiTarget {
            group: self.group.clone(),
            version: self.version.clone(),
            kind: self.kind.clone(),
            resource: resource.to_string(),
        })
    }

    /// Same resource, ignoring the ordinal and the resolved collection name.
    pub fn same_object(&self, other: &ResourceIdentifier) -> bool {
        self.group == other.group
            && self.kind.eq_ignore_ascii_case(&other.kind)
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_empty() {
            return write!(f, "#{}", self.ordinal);
        }
        write!(f, "{}/{}", self.api_version(), self.kind)?;
        match &self.namespace {
            Some(ns) => write!(f, " {}/{}", ns, self.name),
            None => write!(f, " {}", self.name),
        }
    }
}

/// Group/version/resource address used by the dynamic client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApiTarget {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub resource: String,
}

impl ApiTarget {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }
}

impl fmt::Display for ApiTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.resource)
    }
}

/// An identifier paired with its document.
///
/// Documents are never mutated after construction; callers that need to
/// alter one (ownership tagging, resourceVersion carry-over) work on a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semistructured {
    pub identifier: ResourceIdentifier,
    pub object: Json,
}

impl Semistructured {
    /// Derive the identifier from the document header.
    pub fn from_object(object: Json) -> Result<Self, IdentityError> {
        let identifier = document_to_identifier(&object)?;
        Ok(Self { identifier, object })
    }

    /// A placeholder for an input that could not be decoded or identified.
    pub fn unidentified(ordinal: usize, object: Json) -> Self {
        Self { identifier: ResourceIdentifier::from_ordinal(ordinal), object }
    }

    pub fn annotations(&self) -> Option<&serde_json::Map<String, Json>> {
        self.object.get("metadata").and_then(|m| m.get("annotations")).and_then(|a| a.as_object())
    }
}

/// Split an `apiVersion` header into `(group, version)`. Core group is `""`.
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Extract group/version/kind and namespace/name from a document.
pub fn document_to_identifier(doc: &Json) -> Result<ResourceIdentifier, IdentityError> {
    let api_version = doc.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("");
    let kind = doc.get("kind").and_then(|v| v.as_str()).unwrap_or("");
    let (group, version) = split_api_version(api_version);
    if kind.is_empty() || version.is_empty() {
        return Err(IdentityError::IncompleteIdentity(format!("apiVersion={:?} kind={:?}", api_version, kind)));
    }
    let meta = doc.get("metadata");
    let name = meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("");
    if name.is_empty() {
        return Err(IdentityError::MissingName);
    }
    let namespace = meta
        .and_then(|m| m.get("namespace"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    Ok(ResourceIdentifier {
        ordinal: 0,
        group,
        version,
        kind: kind.to_string(),
        resource: None,
        namespace,
        name: name.to_string(),
    })
}

pub mod prelude {
    pub use super::{
        document_to_identifier, ApiTarget, ConditionStatus, EngineConfig, IdentityError, ManifestCondition,
        ResourceIdentifier, Semistructured, StatusCondition, WorkStatus,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_from_core_group_document() {
        let doc = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "reconcile-demo", "namespace": "default" },
            "data": { "ui.properties": "color=pink\n" }
        });
        let id = document_to_identifier(&doc).unwrap();
        assert_eq!(id.group, "");
        assert_eq!(id.version, "v1");
        assert_eq!(id.kind, "ConfigMap");
        assert_eq!(id.namespace.as_deref(), Some("default"));
        assert_eq!(id.name, "reconcile-demo");
        assert!(id.resource.is_none());
        assert_eq!(id.to_string(), "v1/ConfigMap default/reconcile-demo");
    }

    #[test]
    fn identifier_from_named_group_cluster_scoped() {
        let doc = json!({ "apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRole", "metadata": { "name": "viewer" } });
        let id = document_to_identifier(&doc).unwrap();
        assert_eq!(id.group, "rbac.authorization.k8s.io");
        assert_eq!(id.version, "v1");
        assert_eq!(id.namespace, None);
        assert_eq!(id.api_version(), "rbac.authorization.k8s.io/v1");
    }

    #[test]
    fn missing_kind_or_version_is_incomplete() {
        let no_kind = json!({ "apiVersion": "v1", "metadata": { "name": "x" } });
        assert!(matches!(document_to_identifier(&no_kind), Err(IdentityError::IncompleteIdentity(_))));
        let no_version = json!({ "apiVersion": "apps/", "kind": "Deployment", "metadata": { "name": "x" } });
        assert!(matches!(document_to_identifier(&no_version), Err(IdentityError::IncompleteIdentity(_))));
        assert!(matches!(document_to_identifier(&Json::Null), Err(IdentityError::IncompleteIdentity(_))));
    }

    #[test]
    fn missing_name_is_reported() {
        let doc = json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": {} });
        assert_eq!(document_to_identifier(&doc), Err(IdentityError::MissingName));
    }

    #[test]
    fn target_requires_resolved_resource() {
        let mut id = ResourceIdentifier { version: "v1".into(), kind: "ConfigMap".into(), name: "x".into(), ..Default::default() };
        assert!(id.target().is_none());
        id.resource = Some("configmaps".into());
        let t = id.target().unwrap();
        assert_eq!(t.to_string(), "v1/configmaps");
    }

    #[test]
    fn ordinal_only_identifier_displays_position() {
        assert_eq!(ResourceIdentifier::from_ordinal(3).to_string(), "#3");
        assert!(!ResourceIdentifier::from_ordinal(3).is_complete());
    }
}
