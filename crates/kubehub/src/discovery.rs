//! Discovery Index: manageable resource types and their served versions.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use conflux_core::IgnoreList;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{ApiResourceList, DiscoveryClient};
use crate::dynamic::ClientError;

#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("discovery unavailable: {0}")]
    Unavailable(#[source] ClientError),
    #[error("unexpected format for groupversion: {0:?}")]
    MalformedGroupVersion(String),
}

/// One manageable resource type within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredType {
    pub kind: String,
    pub namespaced: bool,
    /// Served versions, highest priority first.
    pub versions: Vec<String>,
}

/// group -> plural resource name -> type. Group `""` is the core group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryIndex {
    groups: BTreeMap<String, BTreeMap<String, DiscoveredType>>,
}

impl DiscoveryIndex {
    /// Build from a raw catalog, keeping only types that are not ignored, are
    /// not subresources and support `list`.
    pub fn from_catalog(lists: &[ApiResourceList], ignore: &IgnoreList) -> Result<Self, DiscoveryError> {
        let mut groups: BTreeMap<String, BTreeMap<String, DiscoveredType>> = BTreeMap::new();
        for list in lists {
            let (group, version) = split_group_version(&list.group_version)?;
            for res in list.resources.iter() {
                if ignore.contains(&group, &res.name) {
                    debug!(group = %group, resource = %res.name, "ignored resource type");
                    continue;
                }
                if res.name.contains('/') {
                    continue;
                }
                if !res.verbs.iter().any(|v| v == "list") {
                    continue;
                }
                let entry = groups
                    .entry(group.clone())
                    .or_default()
                    .entry(res.name.clone())
                    .or_insert_with(|| DiscoveredType { kind: res.kind.clone(), namespaced: res.namespaced, versions: Vec::new() });
                if !entry.versions.iter().any(|v| v == &version) {
                    entry.versions.push(version.clone());
                }
            }
        }
        for types in groups.values_mut() {
            for t in types.values_mut() {
                t.versions.sort_by(|a, b| compare_versions(a, b));
            }
        }
        Ok(Self { groups })
    }

    pub fn get(&self, group: &str, resource: &str) -> Option<&DiscoveredType> {
        self.groups.get(group).and_then(|types| types.get(resource))
    }

    /// Find a type in `group` whose kind matches case-insensitively.
    /// Returns the plural resource name with the type.
    pub fn find_kind(&self, group: &str, kind: &str) -> Option<(&str, &DiscoveredType)> {
        self.groups
            .get(group)?
            .iter()
            .find(|(_, t)| t.kind.eq_ignore_ascii_case(kind))
            .map(|(name, t)| (name.as_str(), t))
    }

    /// Every `(group, resource, type)` in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &DiscoveredType)> {
        self.groups
            .iter()
            .flat_map(|(g, types)| types.iter().map(move |(r, t)| (g.as_str(), r.as_str(), t)))
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One discovery round trip followed by filtering. Any failure is fatal:
/// a partial index is never returned.
pub async fn fetch_api_versions(client: &dyn DiscoveryClient, ignore: &IgnoreList) -> Result<DiscoveryIndex, DiscoveryError> {
    let lists = client.server_groups_and_resources().await.map_err(DiscoveryError::Unavailable)?;
    let index = DiscoveryIndex::from_catalog(&lists, ignore)?;
    counter!("discovery_types_total", index.len() as u64);
    info!(types = index.len(), "discovery index built");
    Ok(index)
}

fn split_group_version(gv: &str) -> Result<(String, String), DiscoveryError> {
    let parts: Vec<&str> = gv.split('/').collect();
    match parts.as_slice() {
        [v] if !v.is_empty() => Ok((String::new(), (*v).to_string())),
        [g, v] if !v.is_empty() => Ok(((*g).to_string(), (*v).to_string())),
        _ => Err(DiscoveryError::MalformedGroupVersion(gv.to_string())),
    }
}

/// `(major, stability, minor)` where stability is 2 for GA, 1 beta, 0 alpha.
fn parse_kube_version(v: &str) -> Option<(u32, u8, u32)> {
    let rest = v.strip_prefix('v')?;
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let major: u32 = rest[..digits].parse().ok()?;
    let tail = &rest[digits..];
    if tail.is_empty() {
        return Some((major, 2, 0));
    }
    let (stability, minor) = if let Some(m) = tail.strip_prefix("beta") {
        (1, m)
    } else if let Some(m) = tail.strip_prefix("alpha") {
        (0, m)
    } else {
        return None;
    };
    if minor.is_empty() || !minor.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((major, stability, minor.parse().ok()?))
}

/// Kubernetes version priority: GA before beta before alpha, higher
/// major then higher minor first; non-conforming strings last, lexicographic.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_kube_version(a), parse_kube_version(b)) {
        (Some((am, ast, ami)), Some((bm, bst, bmi))) => bst.cmp(&ast).then(bm.cmp(&am)).then(bmi.cmp(&ami)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
