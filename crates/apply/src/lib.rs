//! Conflux apply: the reconciliation engine.
//!
//! One cycle asks a desired-state provider for documents, resolves each
//! against the Discovery Index, fetches live state, and creates, replaces
//! or leaves alone every resource. Outcomes become conditions merged with
//! the prior status history.

#![forbid(unsafe_code)]

pub mod diff;
pub mod engine;
pub mod fetch;
pub mod gc;
pub mod manifest;
pub mod status;

pub use diff::same_intent;
pub use engine::{reconcile, run_cycle, CycleError, DesiredSet, DesiredState, ReconcileError, ReconcileResult};
pub use fetch::{fetch_actual_state, ActualState};
pub use gc::{collect_garbage, remove_work_resources, scan_managed, PruneResult, ScanReport};
pub use manifest::{decode_manifest, ManifestError, ManifestSet};
pub use status::{advance_status, aggregate_condition, applied_conditions, merge_manifest_conditions, merge_status_conditions};
