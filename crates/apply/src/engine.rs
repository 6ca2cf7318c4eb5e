//! Reconciliation Engine: fetch -> diff -> create/update, one result per
//! desired document.

use std::collections::BTreeMap;
use std::time::Instant;

use conflux_core::{document_to_identifier, EngineConfig, IdentityError, ResourceIdentifier, Semistructured};
use conflux_kubehub::{
    fetch_api_versions, resolve_address, ClientError, DiscoveryClient, DiscoveryError, DiscoveryIndex, DynamicClient,
    ResolveError,
};
use futures::{stream, StreamExt};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diff::same_intent;
use crate::fetch::{fetch_actual_state, ActualState};

/// Desired documents keyed by identifier.
pub type DesiredSet = BTreeMap<ResourceIdentifier, Semistructured>;

/// Supplies the target document set for one cycle.
pub trait DesiredState: Send + Sync {
    fn fetch_desired(&self) -> anyhow::Result<DesiredSet>;
}

impl<F> DesiredState for F
where
    F: Fn() -> anyhow::Result<DesiredSet> + Send + Sync,
{
    fn fetch_desired(&self) -> anyhow::Result<DesiredSet> {
        self()
    }
}

/// Failure scoped to one resource; never aborts the rest of the cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("no resource type for kind {kind:?} in group {group:?}")]
    UnresolvableKind { group: String, kind: String },
    #[error("create failed: {0}")]
    CreateFailed(#[source] ClientError),
    #[error("update failed: {0}")]
    UpdateFailed(#[source] ClientError),
    #[error("delete failed: {0}")]
    DeleteFailed(#[source] ClientError),
    #[error("{0} is already targeted by another desired document")]
    DuplicateTarget(String),
}

impl From<ResolveError> for ReconcileError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Identity(e) => ReconcileError::Identity(e),
            ResolveError::UnresolvableKind { group, kind } => ReconcileError::UnresolvableKind { group, kind },
        }
    }
}

/// Failure that ends the whole cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    DiscoveryUnavailable(#[from] DiscoveryError),
    #[error("desired state unavailable: {0}")]
    DesiredStateUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub identifier: ResourceIdentifier,
    /// A create or update was issued.
    pub updated: bool,
    pub err: Option<ReconcileError>,
}

impl ReconcileResult {
    fn ok(identifier: ResourceIdentifier, updated: bool) -> Self {
        Self { identifier, updated, err: None }
    }

    fn failed(identifier: ResourceIdentifier, updated: bool, err: ReconcileError) -> Self {
        Self { identifier, updated, err: Some(err) }
    }
}

/// Resolve a desired document's address. An incomplete identifier is
/// re-derived from the document first so the error names the real defect.
pub(crate) fn resolve_desired(doc: &Semistructured, index: &DiscoveryIndex) -> Result<ResourceIdentifier, ReconcileError> {
    if doc.identifier.is_complete() {
        return Ok(resolve_address(&doc.identifier, index)?);
    }
    let mut derived = document_to_identifier(&doc.object)?;
    derived.ordinal = doc.identifier.ordinal;
    Ok(resolve_address(&derived, index)?)
}

/// Rewrite `apiVersion`/`kind` to the resolved address. The live object
/// carries this header, so the diff must see it too.
fn pin_header(doc: &mut Json, resolved: &ResourceIdentifier) {
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("apiVersion".into(), Json::String(resolved.api_version()));
        obj.insert("kind".into(), Json::String(resolved.kind.clone()));
    }
}

/// Desired document as the server would hold it, for comparison.
fn comparable(desired: &Json, resolved: &ResourceIdentifier) -> Json {
    let mut doc = desired.clone();
    pin_header(&mut doc, resolved);
    doc
}

/// Copy of `desired` ready to send: ownership-tagged, pinned to the resolved
/// version and namespace, and carrying the live resourceVersion if any.
pub(crate) fn prepare_for_write(desired: &Json, resolved: &ResourceIdentifier, cfg: &EngineConfig, live: Option<&Json>) -> Json {
    let mut doc = cfg.ownership.stamp(desired);
    pin_header(&mut doc, resolved);
    if let Some(meta) = doc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        match &resolved.namespace {
            Some(ns) => {
                meta.insert("namespace".into(), Json::String(ns.clone()));
            }
            None => {
                meta.remove("namespace");
            }
        }
        let live_rv = live
            .and_then(|l| l.get("metadata"))
            .and_then(|m| m.get("resourceVersion"))
            .and_then(|v| v.as_str());
        if let Some(rv) = live_rv {
            meta.insert("resourceVersion".into(), Json::String(rv.to_string()));
        }
    }
    doc
}

async fn apply_one(
    client: &dyn DynamicClient,
    cfg: &EngineConfig,
    desired: &Semistructured,
    resolved: ResourceIdentifier,
    actual: Option<&Semistructured>,
) -> ReconcileResult {
    let target = match resolved.target() {
        Some(t) => t,
        None => {
            let err = ReconcileError::UnresolvableKind { group: resolved.group.clone(), kind: resolved.kind.clone() };
            return ReconcileResult::failed(resolved, false, err);
        }
    };
    let ns = resolved.namespace.clone();
    match actual {
        None => {
            let doc = prepare_for_write(&desired.object, &resolved, cfg, None);
            match client.create(&target, ns.as_deref(), &doc).await {
                Ok(_) => {
                    counter!("reconcile_created_total", 1u64);
                    info!(resource = %resolved, "created");
                    ReconcileResult::ok(resolved, true)
                }
                Err(e) => {
                    counter!("reconcile_failed_total", 1u64);
                    warn!(resource = %resolved, error = %e, "create failed");
                    ReconcileResult::failed(resolved, true, ReconcileError::CreateFailed(e))
                }
            }
        }
        Some(live) if !same_intent(&comparable(&desired.object, &resolved), &live.object, cfg.metadata_policy) => {
            let doc = prepare_for_write(&desired.object, &resolved, cfg, Some(&live.object));
            match client.update(&target, ns.as_deref(), &doc).await {
                Ok(_) => {
                    counter!("reconcile_updated_total", 1u64);
                    info!(resource = %resolved, "updated");
                    ReconcileResult::ok(resolved, true)
                }
                Err(e) => {
                    counter!("reconcile_failed_total", 1u64);
                    warn!(resource = %resolved, error = %e, "update failed");
                    ReconcileResult::failed(resolved, true, ReconcileError::UpdateFailed(e))
                }
            }
        }
        Some(_) => {
            counter!("reconcile_unchanged_total", 1u64);
            debug!(resource = %resolved, "already converged");
            ReconcileResult::ok(resolved, false)
        }
    }
}

/// Converge every desired document. Exactly one result per entry of
/// `desired`, in identifier order; per-resource failures are carried in the
/// result and never stop the others.
///
/// When two entries resolve to the same object only the first is applied;
/// the later one fails with `DuplicateTarget` under its own desired key, so
/// results stay distinct.
pub async fn reconcile(
    desired: &DesiredSet,
    index: &DiscoveryIndex,
    client: &dyn DynamicClient,
    cfg: &EngineConfig,
) -> Vec<ReconcileResult> {
    let mut claimed: Vec<ResourceIdentifier> = Vec::new();
    let resolutions: Vec<(&Semistructured, Result<ResourceIdentifier, ReconcileError>)> = desired
        .values()
        .map(|doc| {
            let resolution = resolve_desired(doc, index).and_then(|resolved| {
                if claimed.iter().any(|c| c.same_object(&resolved)) {
                    return Err(ReconcileError::DuplicateTarget(resolved.to_string()));
                }
                claimed.push(resolved.clone());
                Ok(resolved)
            });
            (doc, resolution)
        })
        .collect();

    let resolved_ids: Vec<ResourceIdentifier> =
        resolutions.iter().filter_map(|(_, r)| r.as_ref().ok().cloned()).collect();
    let actual: ActualState = fetch_actual_state(client, &resolved_ids, cfg.concurrency).await;

    stream::iter(resolutions.into_iter())
        .map(|(doc, resolution)| {
            let actual = &actual;
            async move {
                match resolution {
                    Ok(resolved) => {
                        let live = actual.get(&resolved);
                        apply_one(client, cfg, doc, resolved, live).await
                    }
                    Err(err) => {
                        counter!("reconcile_failed_total", 1u64);
                        warn!(resource = %doc.identifier, error = %err, "resource not applied");
                        ReconcileResult::failed(doc.identifier.clone(), false, err)
                    }
                }
            }
        })
        .buffered(cfg.concurrency.max(1))
        .collect()
        .await
}

/// One full cycle: desired state, discovery, reconcile.
pub async fn run_cycle(
    discovery: &dyn DiscoveryClient,
    dynamic: &dyn DynamicClient,
    provider: &dyn DesiredState,
    cfg: &EngineConfig,
) -> Result<Vec<ReconcileResult>, CycleError> {
    let t0 = Instant::now();
    counter!("reconcile_cycles_total", 1u64);
    let desired = provider
        .fetch_desired()
        .map_err(|e| CycleError::DesiredStateUnavailable(format!("{:#}", e)))?;
    let index = fetch_api_versions(discovery, &cfg.ignore).await?;
    let results = reconcile(&desired, &index, dynamic, cfg).await;
    histogram!("reconcile_cycle_ms", t0.elapsed().as_secs_f64() * 1000.0);
    let failed = results.iter().filter(|r| r.err.is_some()).count();
    let changed = results.iter().filter(|r| r.updated && r.err.is_none()).count();
    info!(desired = desired.len(), changed, failed, took_ms = %t0.elapsed().as_millis(), "reconcile cycle finished");
    Ok(results)
}
