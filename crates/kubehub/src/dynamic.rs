//! Dynamic resource client: generic get/create/update/list/delete against a
//! resolved address.

use async_trait::async_trait;
use conflux_core::ApiTarget;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use serde_json::Value as Json;
use thiserror::Error;

/// Failure of a single client call. Cloneable so it can be stored in
/// per-resource results and rendered into conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("not found")]
    NotFound,
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decoding object: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound)
    }
}

impl From<kube::Error> for ClientError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => ClientError::NotFound,
            kube::Error::Api(resp) => ClientError::Api { code: resp.code, reason: resp.reason, message: resp.message },
            kube::Error::SerdeError(e) => ClientError::Decode(e.to_string()),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

/// Generic CRUD per resolved address. `namespace` is `None` for
/// cluster-scoped resources.
#[async_trait]
pub trait DynamicClient: Send + Sync {
    async fn get(&self, target: &ApiTarget, namespace: Option<&str>, name: &str) -> Result<Json, ClientError>;
    async fn create(&self, target: &ApiTarget, namespace: Option<&str>, doc: &Json) -> Result<Json, ClientError>;
    /// Whole-object replace.
    async fn update(&self, target: &ApiTarget, namespace: Option<&str>, doc: &Json) -> Result<Json, ClientError>;
    /// Every object of the type, across all namespaces.
    async fn list(&self, target: &ApiTarget) -> Result<Vec<Json>, ClientError>;
    async fn delete(&self, target: &ApiTarget, namespace: Option<&str>, name: &str) -> Result<(), ClientError>;
}

fn api_resource(target: &ApiTarget) -> ApiResource {
    ApiResource {
        group: target.group.clone(),
        version: target.version.clone(),
        api_version: target.api_version(),
        kind: target.kind.clone(),
        plural: target.resource.clone(),
    }
}

fn dynamic_api(client: &Client, target: &ApiTarget, namespace: Option<&str>) -> Api<DynamicObject> {
    let ar = api_resource(target);
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::all_with(client.clone(), &ar),
    }
}

pub(crate) fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_json(obj: &DynamicObject) -> Result<Json, ClientError> {
    let mut v = serde_json::to_value(obj)?;
    strip_managed_fields(&mut v);
    Ok(v)
}

fn object_name(doc: &Json) -> Result<String, ClientError> {
    doc.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ClientError::Decode("object missing metadata.name".into()))
}

#[async_trait]
impl DynamicClient for Client {
    async fn get(&self, target: &ApiTarget, namespace: Option<&str>, name: &str) -> Result<Json, ClientError> {
        let obj = dynamic_api(self, target, namespace).get(name).await?;
        to_json(&obj)
    }

    async fn create(&self, target: &ApiTarget, namespace: Option<&str>, doc: &Json) -> Result<Json, ClientError> {
        let obj: DynamicObject = serde_json::from_value(doc.clone())?;
        let created = dynamic_api(self, target, namespace).create(&PostParams::default(), &obj).await?;
        to_json(&created)
    }

    async fn update(&self, target: &ApiTarget, namespace: Option<&str>, doc: &Json) -> Result<Json, ClientError> {
        let name = object_name(doc)?;
        let obj: DynamicObject = serde_json::from_value(doc.clone())?;
        let replaced = dynamic_api(self, target, namespace).replace(&name, &PostParams::default(), &obj).await?;
        to_json(&replaced)
    }

    async fn list(&self, target: &ApiTarget) -> Result<Vec<Json>, ClientError> {
        let list = dynamic_api(self, target, None).list(&ListParams::default()).await?;
        list.items.iter().map(to_json).collect()
    }

    async fn delete(&self, target: &ApiTarget, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        dynamic_api(self, target, namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
