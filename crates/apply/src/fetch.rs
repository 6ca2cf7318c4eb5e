//! Actual-State Fetcher.

use std::collections::BTreeMap;

use conflux_core::{ResourceIdentifier, Semistructured};
use conflux_kubehub::{ClientError, DynamicClient};
use futures::{stream, StreamExt};
use metrics::counter;
use tracing::{debug, warn};

/// Live documents keyed by the identifier they were fetched for.
///
/// Objects that do not exist are simply absent. Retrieval failures are kept
/// apart in `errors`; they never appear in `objects`.
#[derive(Debug, Clone, Default)]
pub struct ActualState {
    pub objects: BTreeMap<ResourceIdentifier, Semistructured>,
    pub errors: BTreeMap<ResourceIdentifier, ClientError>,
}

impl ActualState {
    pub fn get(&self, id: &ResourceIdentifier) -> Option<&Semistructured> {
        self.objects.get(id)
    }
}

/// Get every identifier that has a resolved address. Unresolved identifiers
/// are skipped; reporting them is the caller's job.
pub async fn fetch_actual_state(
    client: &dyn DynamicClient,
    identifiers: &[ResourceIdentifier],
    concurrency: usize,
) -> ActualState {
    let fetched: Vec<(ResourceIdentifier, Result<serde_json::Value, ClientError>)> = stream::iter(
        identifiers.iter().filter_map(|id| id.target().map(|t| (id, t))),
    )
    .map(|(id, target)| async move {
        let res = client.get(&target, id.namespace.as_deref(), &id.name).await;
        (id.clone(), res)
    })
    .buffered(concurrency.max(1))
    .collect()
    .await;

    let mut out = ActualState::default();
    for (id, res) in fetched {
        match res {
            Ok(object) => {
                out.objects.insert(id.clone(), Semistructured { identifier: id, object });
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %id, "not found in cluster");
            }
            Err(e) => {
                counter!("fetch_errors_total", 1u64);
                warn!(resource = %id, error = %e, "fetching live state failed");
                out.errors.insert(id, e);
            }
        }
    }
    out
}
