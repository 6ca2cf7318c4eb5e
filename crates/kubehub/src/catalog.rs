//! Raw API catalog as returned by the cluster's discovery endpoints.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamic::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogResource {
    /// Plural resource name, or `plural/sub` for subresources.
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

/// All resources served under one `group/version` (or bare `v1` for core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceList {
    pub group_version: String,
    pub resources: Vec<CatalogResource>,
}

impl From<metav1::APIResourceList> for ApiResourceList {
    fn from(list: metav1::APIResourceList) -> Self {
        Self {
            group_version: list.group_version,
            resources: list
                .resources
                .into_iter()
                .map(|r| CatalogResource { name: r.name, kind: r.kind, namespaced: r.namespaced, verbs: r.verbs })
                .collect(),
        }
    }
}

/// Typed/discovery capability: enumerate every group, resource type and verb.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn server_groups_and_resources(&self) -> Result<Vec<ApiResourceList>, ClientError>;
}

#[async_trait]
impl DiscoveryClient for Client {
    async fn server_groups_and_resources(&self) -> Result<Vec<ApiResourceList>, ClientError> {
        let mut out = Vec::new();
        let core = self.list_core_api_versions().await?;
        for version in core.versions.iter() {
            let list = self.list_core_api_resources(version).await?;
            out.push(ApiResourceList::from(list));
        }
        let groups = self.list_api_groups().await?;
        for group in groups.groups.iter() {
            for gv in group.versions.iter() {
                let list = self.list_api_group_resources(&gv.group_version).await?;
                out.push(ApiResourceList::from(list));
            }
        }
        debug!(lists = out.len(), "api catalog fetched");
        Ok(out)
    }
}
