//! Conflux kubehub: discovery catalog, identity resolution and the dynamic
//! resource client the engine drives.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::Client;
use tokio::sync::OnceCell;

pub mod catalog;
pub mod discovery;
pub mod dynamic;
pub mod resolve;

pub use catalog::{ApiResourceList, CatalogResource, DiscoveryClient};
pub use discovery::{fetch_api_versions, DiscoveredType, DiscoveryError, DiscoveryIndex};
pub use dynamic::{ClientError, DynamicClient};
pub use resolve::{resolve_address, ResolveError};

static KUBE_CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared client built from the ambient kubeconfig / in-cluster config.
pub async fn get_kube_client() -> Result<Client> {
    let client = KUBE_CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await
        .context("building kube client from default config")?;
    Ok(client.clone())
}
