//! Garbage collection of managed resources.
//!
//! Managed resources carry the ownership annotation. Pruning lists every
//! discovered type, keeps the tagged objects and deletes those no longer
//! desired. Each deletion stands alone: one failure does not stop the rest.

use conflux_core::{ApiTarget, EngineConfig, OwnershipTag, ResourceIdentifier, Semistructured};
use conflux_kubehub::{ClientError, DiscoveryIndex, DynamicClient};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::engine::{resolve_desired, DesiredSet, ReconcileError};

/// Managed objects found in the cluster plus the types that could not be listed.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub managed: Vec<Semistructured>,
    pub failures: Vec<(ApiTarget, ClientError)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneResult {
    pub identifier: ResourceIdentifier,
    /// A delete was issued (or would be, in dry-run mode).
    pub deleted: bool,
    pub err: Option<ReconcileError>,
}

fn listed_identifier(target: &ApiTarget, object: &serde_json::Value) -> ResourceIdentifier {
    let meta = object.get("metadata");
    ResourceIdentifier {
        ordinal: 0,
        group: target.group.clone(),
        version: target.version.clone(),
        kind: target.kind.clone(),
        resource: Some(target.resource.clone()),
        namespace: meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).map(|s| s.to_string()),
        name: meta.and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
    }
}

/// List every discovered type at its highest-priority version and keep the
/// objects carrying the ownership annotation.
pub async fn scan_managed(index: &DiscoveryIndex, client: &dyn DynamicClient, ownership: &OwnershipTag) -> ScanReport {
    let mut report = ScanReport::default();
    for (group, resource, discovered) in index.iter() {
        let version = match discovered.versions.first() {
            Some(v) => v.clone(),
            None => continue,
        };
        let target = ApiTarget { group: group.to_string(), version, kind: discovered.kind.clone(), resource: resource.to_string() };
        match client.list(&target).await {
            Ok(items) => {
                for object in items.into_iter().filter(|o| ownership.is_managed(o)) {
                    let identifier = listed_identifier(&target, &object);
                    report.managed.push(Semistructured { identifier, object });
                }
            }
            Err(e) => {
                warn!(api = %target, error = %e, "listing resource type failed");
                report.failures.push((target, e));
            }
        }
    }
    debug!(managed = report.managed.len(), failures = report.failures.len(), "managed scan finished");
    report
}

async fn delete_one(client: &dyn DynamicClient, identifier: ResourceIdentifier, dry_run: bool) -> PruneResult {
    let target = match identifier.target() {
        Some(t) => t,
        None => {
            let err = ReconcileError::UnresolvableKind { group: identifier.group.clone(), kind: identifier.kind.clone() };
            return PruneResult { identifier, deleted: false, err: Some(err) };
        }
    };
    if dry_run {
        info!(resource = %identifier, "would delete (dry run)");
        return PruneResult { identifier, deleted: true, err: None };
    }
    match client.delete(&target, identifier.namespace.as_deref(), &identifier.name).await {
        Ok(()) => {
            counter!("gc_deleted_total", 1u64);
            info!(resource = %identifier, "deleted");
            PruneResult { identifier, deleted: true, err: None }
        }
        Err(e) if e.is_not_found() => PruneResult { identifier, deleted: false, err: None },
        Err(e) => {
            warn!(resource = %identifier, error = %e, "delete failed");
            PruneResult { identifier, deleted: true, err: Some(ReconcileError::DeleteFailed(e)) }
        }
    }
}

/// Delete managed resources absent from `desired`.
///
/// Desired documents that do not resolve are left out of the comparison;
/// an object of an unresolvable kind cannot be one of ours anyway.
pub async fn collect_garbage(
    desired: &DesiredSet,
    index: &DiscoveryIndex,
    client: &dyn DynamicClient,
    cfg: &EngineConfig,
    dry_run: bool,
) -> (Vec<PruneResult>, ScanReport) {
    let wanted: Vec<ResourceIdentifier> = desired.values().filter_map(|d| resolve_desired(d, index).ok()).collect();
    let scan = scan_managed(index, client, &cfg.ownership).await;
    let mut results = Vec::new();
    for candidate in scan.managed.iter() {
        if wanted.iter().any(|w| w.same_object(&candidate.identifier)) {
            continue;
        }
        results.push(delete_one(client, candidate.identifier.clone(), dry_run).await);
    }
    (results, scan)
}

/// Delete every managed resource named by `desired`; used when the owning
/// unit of work itself goes away. Objects lacking the ownership annotation
/// are left alone.
pub async fn remove_work_resources(
    desired: &DesiredSet,
    index: &DiscoveryIndex,
    client: &dyn DynamicClient,
    cfg: &EngineConfig,
) -> Vec<PruneResult> {
    let mut results = Vec::with_capacity(desired.len());
    for doc in desired.values() {
        let resolved = match resolve_desired(doc, index) {
            Ok(r) => r,
            Err(err) => {
                results.push(PruneResult { identifier: doc.identifier.clone(), deleted: false, err: Some(err) });
                continue;
            }
        };
        let target = match resolved.target() {
            Some(t) => t,
            None => {
                let err = ReconcileError::UnresolvableKind { group: resolved.group.clone(), kind: resolved.kind.clone() };
                results.push(PruneResult { identifier: resolved, deleted: false, err: Some(err) });
                continue;
            }
        };
        match client.get(&target, resolved.namespace.as_deref(), &resolved.name).await {
            Ok(live) if cfg.ownership.is_managed(&live) => results.push(delete_one(client, resolved, false).await),
            Ok(_) => {
                debug!(resource = %resolved, "not managed; leaving in place");
                results.push(PruneResult { identifier: resolved, deleted: false, err: None });
            }
            Err(e) if e.is_not_found() => results.push(PruneResult { identifier: resolved, deleted: false, err: None }),
            Err(e) => results.push(PruneResult { identifier: resolved, deleted: false, err: Some(ReconcileError::DeleteFailed(e)) }),
        }
    }
    results
}
