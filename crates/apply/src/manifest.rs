//! Raw manifests to desired documents.

use serde::Deserialize;
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, warn};

use conflux_core::tree::node_budget_exceeded;
use conflux_core::{IdentityError, Semistructured};

use crate::engine::{DesiredSet, DesiredState};

fn max_yaml_bytes() -> usize {
    std::env::var("CONFLUX_MAX_YAML_BYTES").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(1_000_000)
}

fn max_yaml_nodes() -> usize {
    std::env::var("CONFLUX_MAX_YAML_NODES").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(100_000)
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest too large (>{0} bytes)")]
    TooLarge(usize),
    #[error("manifest too complex (>{0} nodes)")]
    TooComplex(usize),
    #[error("parsing YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("converting YAML to JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manifest is not a mapping")]
    NotAnObject,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Decode one YAML (or JSON) document into a JSON object.
pub fn decode_manifest(raw: &str) -> Result<Json, ManifestError> {
    let max_bytes = max_yaml_bytes();
    if raw.len() > max_bytes {
        return Err(ManifestError::TooLarge(max_bytes));
    }
    let val: serde_yaml::Value = serde_yaml::from_str(raw)?;
    into_object(val)
}

fn into_object(val: serde_yaml::Value) -> Result<Json, ManifestError> {
    let json = serde_json::to_value(val)?;
    let max_nodes = max_yaml_nodes();
    if node_budget_exceeded(&json, max_nodes) {
        return Err(ManifestError::TooComplex(max_nodes));
    }
    if !json.is_object() {
        return Err(ManifestError::NotAnObject);
    }
    Ok(json)
}

/// Desired state backed by a fixed list of manifests.
///
/// A manifest that cannot be decoded or identified is kept under its
/// position in the list so it still yields a (failed) result.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    entries: Vec<Result<Json, String>>,
}

impl ManifestSet {
    /// One raw document per entry.
    pub fn new(manifests: Vec<String>) -> Self {
        let entries = manifests.iter().map(|raw| decode_manifest(raw).map_err(|e| e.to_string())).collect();
        Self { entries }
    }

    /// A multi-document YAML stream. Empty documents are dropped; a
    /// document that fails to parse ends the stream, since the parser
    /// cannot resynchronise after it.
    pub fn from_stream(text: &str) -> Self {
        let max_bytes = max_yaml_bytes();
        if text.len() > max_bytes {
            return Self { entries: vec![Err(ManifestError::TooLarge(max_bytes).to_string())] };
        }
        let mut entries = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            match serde_yaml::Value::deserialize(document) {
                Ok(serde_yaml::Value::Null) => continue,
                Ok(val) => entries.push(into_object(val).map_err(|e| e.to_string())),
                Err(e) => {
                    entries.push(Err(ManifestError::Yaml(e).to_string()));
                    break;
                }
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode every manifest; never fails as a whole.
    pub fn documents(&self) -> DesiredSet {
        let mut out = DesiredSet::new();
        for (ordinal, entry) in self.entries.iter().enumerate() {
            let doc = match entry {
                Ok(obj) => match Semistructured::from_object(obj.clone()) {
                    Ok(doc) => doc,
                    Err(e) => {
                        warn!(ordinal, error = %e, "manifest has no usable identity");
                        Semistructured::unidentified(ordinal, obj.clone())
                    }
                },
                Err(e) => {
                    warn!(ordinal, error = %e, "manifest could not be decoded");
                    Semistructured::unidentified(ordinal, Json::Null)
                }
            };
            if let Some(prev) = out.insert(doc.identifier.clone(), doc) {
                warn!(resource = %prev.identifier, ordinal, "duplicate manifest; later one wins");
            }
        }
        debug!(manifests = self.entries.len(), desired = out.len(), "decoded manifests");
        out
    }
}

impl DesiredState for ManifestSet {
    fn fetch_desired(&self) -> anyhow::Result<DesiredSet> {
        Ok(self.documents())
    }
}
