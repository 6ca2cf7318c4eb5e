#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use conflux_core::ApiTarget;
use conflux_kubehub::{ApiResourceList, CatalogResource, ClientError, DiscoveryClient, DynamicClient};
use serde_json::{json, Value as Json};

pub fn resource(name: &str, kind: &str, namespaced: bool) -> CatalogResource {
    CatalogResource { name: name.into(), kind: kind.into(), namespaced, verbs: vec!["get".into(), "list".into(), "create".into()] }
}

/// Static discovery catalog; `fail` makes every call error out.
pub struct FakeDiscovery {
    pub lists: Vec<ApiResourceList>,
    pub fail: bool,
}

impl FakeDiscovery {
    pub fn core() -> Self {
        Self {
            lists: vec![
                ApiResourceList {
                    group_version: "v1".into(),
                    resources: vec![
                        resource("configmaps", "ConfigMap", true),
                        resource("secrets", "Secret", true),
                        resource("namespaces", "Namespace", false),
                        resource("pods/log", "Pod", true),
                    ],
                },
                ApiResourceList { group_version: "apps/v1".into(), resources: vec![resource("deployments", "Deployment", true)] },
            ],
            fail: false,
        }
    }

    pub fn unavailable() -> Self {
        Self { lists: Vec::new(), fail: true }
    }
}

#[async_trait]
impl DiscoveryClient for FakeDiscovery {
    async fn server_groups_and_resources(&self) -> Result<Vec<ApiResourceList>, ClientError> {
        if self.fail {
            return Err(ClientError::Transport("connection refused".into()));
        }
        Ok(self.lists.clone())
    }
}

type Key = (String, String, Option<String>, String);

/// In-memory cluster keyed by group/resource/namespace/name.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<Key, Json>>,
    get_errors: Mutex<BTreeSet<String>>,
    write_errors: Mutex<BTreeSet<String>>,
    next_rv: AtomicUsize,
    pub gets: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

fn key(target: &ApiTarget, namespace: Option<&str>, name: &str) -> Key {
    (target.group.clone(), target.resource.clone(), namespace.map(|s| s.to_string()), name.to_string())
}

fn doc_name(doc: &Json) -> String {
    doc["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the counters.
    pub fn seed(&self, group: &str, resource: &str, namespace: Option<&str>, doc: Json) {
        let k = (group.to_string(), resource.to_string(), namespace.map(|s| s.to_string()), doc_name(&doc));
        self.objects.lock().unwrap().insert(k, doc);
    }

    pub fn object(&self, group: &str, resource: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        let k = (group.to_string(), resource.to_string(), namespace.map(|s| s.to_string()), name.to_string());
        self.objects.lock().unwrap().get(&k).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// `get` on this name fails with a transport error.
    pub fn fail_get(&self, name: &str) {
        self.get_errors.lock().unwrap().insert(name.to_string());
    }

    /// create/update/delete on this name fail with a server error.
    pub fn fail_write(&self, name: &str) {
        self.write_errors.lock().unwrap().insert(name.to_string());
    }

    pub fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }

    fn check_write(&self, name: &str) -> Result<(), ClientError> {
        if self.write_errors.lock().unwrap().contains(name) {
            return Err(ClientError::Api { code: 500, reason: "InternalError".into(), message: "etcd timeout".into() });
        }
        Ok(())
    }

    fn with_rv(&self, doc: &Json) -> Json {
        let mut doc = doc.clone();
        let rv = self.next_rv.fetch_add(1, Ordering::SeqCst) + 1;
        doc["metadata"]["resourceVersion"] = json!(rv.to_string());
        doc
    }
}

#[async_trait]
impl DynamicClient for FakeCluster {
    async fn get(&self, target: &ApiTarget, namespace: Option<&str>, name: &str) -> Result<Json, ClientError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.get_errors.lock().unwrap().contains(name) {
            return Err(ClientError::Transport("i/o timeout".into()));
        }
        self.objects.lock().unwrap().get(&key(target, namespace, name)).cloned().ok_or(ClientError::NotFound)
    }

    async fn create(&self, target: &ApiTarget, namespace: Option<&str>, doc: &Json) -> Result<Json, ClientError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let name = doc_name(doc);
        self.check_write(&name)?;
        let mut objects = self.objects.lock().unwrap();
        let k = key(target, namespace, &name);
        if objects.contains_key(&k) {
            return Err(ClientError::Api { code: 409, reason: "AlreadyExists".into(), message: format!("{} already exists", name) });
        }
        let stored = self.with_rv(doc);
        objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn update(&self, target: &ApiTarget, namespace: Option<&str>, doc: &Json) -> Result<Json, ClientError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let name = doc_name(doc);
        self.check_write(&name)?;
        let mut objects = self.objects.lock().unwrap();
        let k = key(target, namespace, &name);
        let current = objects.get(&k).ok_or(ClientError::NotFound)?;
        if current["metadata"]["resourceVersion"] != doc["metadata"]["resourceVersion"] {
            return Err(ClientError::Api { code: 409, reason: "Conflict".into(), message: "object has been modified".into() });
        }
        let stored = self.with_rv(doc);
        objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn list(&self, target: &ApiTarget) -> Result<Vec<Json>, ClientError> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((g, r, _, _), _)| *g == target.group && *r == target.resource)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn delete(&self, target: &ApiTarget, namespace: Option<&str>, name: &str) -> Result<(), ClientError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_write(name)?;
        self.objects.lock().unwrap().remove(&key(target, namespace, name)).map(|_| ()).ok_or(ClientError::NotFound)
    }
}

pub fn configmap(name: &str, namespace: Option<&str>, data: Json) -> Json {
    let mut meta = json!({ "name": name });
    if let Some(ns) = namespace {
        meta["namespace"] = json!(ns);
    }
    json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": meta, "data": data })
}
