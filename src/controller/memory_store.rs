//! In-memory [`ResourceStore`] for reconciler tests
//!
//! Objects are kept as JSON keyed by kind, namespace and name. Every write
//! bumps a global resource version and is counted, so tests can assert both
//! on the resulting state and on how many writes a pass issued. Failures are
//! injected per kind or per call.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::core::ErrorResponse;
use kube::Resource;
use serde_json::{json, Value};

use super::store::{ResourceStore, StoredObject, VersionToken};
use crate::crd::KubeNova;
use crate::error::{Error, Result};

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    version: u64,
    namespaces: HashSet<String>,
    nodes: Vec<Node>,
    fail_node_list: bool,
    status_conflicts: u32,
    status_attempts: u32,
    failing_creates: HashSet<String>,
    failing_deletes: HashSet<String>,
    writes: HashMap<(String, &'static str), usize>,
    log: Vec<String>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn record(&mut self, kind: &str, op: &'static str, name: &str) {
        *self.writes.entry((kind.to_string(), op)).or_default() += 1;
        self.log.push(format!("{op} {kind}/{name}"));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key<K: StoredObject>(namespace: &str, name: &str) -> Key {
    let namespace = if K::NAMESPACED { namespace } else { "" };
    (
        K::kind(&()).to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn conflict(kind: &str, name: &str) -> Error {
    Error::Conflict {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn stored_version(value: &Value) -> Option<&str> {
    value["metadata"]["resourceVersion"].as_str()
}

/// Objects marked for deletion disappear once their last finalizer is gone
fn is_collectable(value: &Value) -> bool {
    let deleting = !value["metadata"]["deletionTimestamp"].is_null();
    let finalizers = value["metadata"]["finalizers"]
        .as_array()
        .map_or(0, Vec::len);
    deleting && finalizers == 0
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: &str) -> Self {
        let store = Self::default();
        store.add_namespace(namespace);
        store
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.inner
            .lock()
            .unwrap()
            .namespaces
            .insert(namespace.to_string());
    }

    /// Seed an object without counting it as a write
    pub fn put<K: StoredObject>(&self, namespace: &str, obj: &K) -> K {
        let mut inner = self.inner.lock().unwrap();
        let mut value = serde_json::to_value(obj).unwrap();
        value["metadata"]["resourceVersion"] = json!(inner.next_version());
        if K::NAMESPACED {
            value["metadata"]["namespace"] = json!(namespace);
        }
        let name = value["metadata"]["name"].as_str().unwrap().to_string();
        inner
            .objects
            .insert(key::<K>(namespace, &name), value.clone());
        serde_json::from_value(value).unwrap()
    }

    pub fn object<K: StoredObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&key::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn count<K: StoredObject>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        let inner = self.inner.lock().unwrap();
        inner.objects.keys().filter(|(k, _, _)| *k == kind).count()
    }

    /// Mutate a stored object as another writer would, bumping its version
    pub fn modify<K: StoredObject>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Value)) {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        let value = inner
            .objects
            .get_mut(&key::<K>(namespace, name))
            .unwrap();
        f(value);
        value["metadata"]["resourceVersion"] = json!(version);
    }

    /// Report `ready` ready replicas on one Deployment
    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready: i32) {
        self.modify::<k8s_openapi::api::apps::v1::Deployment>(namespace, name, |value| {
            value["status"]["readyReplicas"] = json!(ready);
        });
    }

    /// Report every Deployment as fully rolled out
    pub fn mark_all_deployments_ready(&self) {
        let mut inner = self.inner.lock().unwrap();
        let version = inner.next_version();
        for ((kind, _, _), value) in inner.objects.iter_mut() {
            if kind == "Deployment" {
                let desired = value["spec"]["replicas"].as_i64().unwrap_or(1);
                value["status"]["readyReplicas"] = json!(desired);
                value["metadata"]["resourceVersion"] = json!(version);
            }
        }
    }

    /// Assign node ports the way the API server would for a NodePort Service
    pub fn allocate_node_ports(&self, namespace: &str, name: &str, ports: &[(&str, i32)]) {
        self.modify::<k8s_openapi::api::core::v1::Service>(namespace, name, |value| {
            if let Some(existing) = value["spec"]["ports"].as_array_mut() {
                for port in existing.iter_mut() {
                    let port_name = port["name"].as_str().unwrap_or_default().to_string();
                    if let Some((_, node_port)) = ports.iter().find(|(n, _)| *n == port_name) {
                        port["nodePort"] = json!(node_port);
                    }
                }
            }
        });
    }

    pub fn mark_for_deletion(&self, namespace: &str, name: &str) {
        self.modify::<KubeNova>(namespace, name, |value| {
            value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        });
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.inner.lock().unwrap().nodes = nodes;
    }

    pub fn fail_node_listing(&self) {
        self.inner.lock().unwrap().fail_node_list = true;
    }

    /// The next `n` status writes fail with a version conflict
    pub fn conflict_next_status_writes(&self, n: u32) {
        self.inner.lock().unwrap().status_conflicts = n;
    }

    pub fn status_attempts(&self) -> u32 {
        self.inner.lock().unwrap().status_attempts
    }

    pub fn fail_creates_of(&self, kind: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_creates
            .insert(kind.to_string());
    }

    pub fn fail_deletes_of(&self, kind: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_deletes
            .insert(kind.to_string());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_creates.clear();
        inner.failing_deletes.clear();
        inner.status_conflicts = 0;
        inner.fail_node_list = false;
    }

    /// Writes of `op` ("create", "replace", "delete", "status") on `kind`
    pub fn writes(&self, kind: &str, op: &'static str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .writes
            .get(&(kind.to_string(), op))
            .copied()
            .unwrap_or(0)
    }

    /// Writes to anything but the root's status
    pub fn dependent_writes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .writes
            .iter()
            .filter(|((kind, _), _)| kind != "KubeNova")
            .map(|(_, n)| n)
            .sum()
    }

    /// Ordered write log, e.g. `delete ClusterRoleBinding/name`
    pub fn ops(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.writes.clear();
        inner.log.clear();
        inner.status_attempts = 0;
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let value = {
            let inner = self.inner.lock().unwrap();
            inner.objects.get(&key::<K>(namespace, name)).cloned()
        };
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn list<K: StoredObject>(&self, namespace: &str) -> Result<Vec<K>> {
        let (kind, namespace, _) = key::<K>(namespace, "");
        let values: Vec<Value> = {
            let inner = self.inner.lock().unwrap();
            inner
                .objects
                .iter()
                .filter(|((k, ns, _), _)| *k == kind && *ns == namespace)
                .map(|(_, v)| v.clone())
                .collect()
        };
        values
            .into_iter()
            .map(|v| Ok(serde_json::from_value(v)?))
            .collect()
    }

    async fn create<K: StoredObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let mut value = serde_json::to_value(obj)?;
        let name = value["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let mut inner = self.inner.lock().unwrap();
        if inner.failing_creates.contains(&kind) {
            return Err(api_error(500, "InternalError", format!("create {kind} failed")));
        }
        let key = key::<K>(namespace, &name);
        if inner.objects.contains_key(&key) {
            return Err(conflict(&kind, &name));
        }
        value["metadata"]["resourceVersion"] = json!(inner.next_version());
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = json!(format!("uid-{kind}-{name}"));
        }
        if K::NAMESPACED {
            value["metadata"]["namespace"] = json!(namespace);
        }
        inner.objects.insert(key, value.clone());
        inner.record(&kind, "create", &name);
        drop(inner);

        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: StoredObject>(
        &self,
        namespace: &str,
        obj: &K,
        version: &VersionToken,
    ) -> Result<K> {
        let kind = K::kind(&()).to_string();
        let mut value = serde_json::to_value(obj)?;
        let name = value["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let mut inner = self.inner.lock().unwrap();
        let key = key::<K>(namespace, &name);
        let Some(stored) = inner.objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{kind} {name} not found")));
        };
        if stored_version(stored) != Some(version.as_str()) {
            return Err(conflict(&kind, &name));
        }

        // The main resource endpoint never writes status
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        value["metadata"]["resourceVersion"] = json!(inner.next_version());
        inner.record(&kind, "replace", &name);

        if is_collectable(&value) {
            inner.objects.remove(&key);
            inner.log.push(format!("collect {kind}/{name}"));
        } else {
            inner.objects.insert(key, value.clone());
        }
        drop(inner);

        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        let kind = K::kind(&()).to_string();
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_deletes.contains(&kind) {
            return Err(api_error(500, "InternalError", format!("delete {kind} failed")));
        }
        match inner.objects.remove(&key::<K>(namespace, name)) {
            Some(_) => {
                inner.record(&kind, "delete", name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_status(&self, obj: &KubeNova, version: &VersionToken) -> Result<KubeNova> {
        let status = serde_json::to_value(&obj.status)?;
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();

        let mut inner = self.inner.lock().unwrap();
        inner.status_attempts += 1;
        if inner.status_conflicts > 0 {
            inner.status_conflicts -= 1;
            return Err(conflict("KubeNova", &name));
        }

        let key = key::<KubeNova>(&namespace, &name);
        let next = inner.version + 1;
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(api_error(404, "NotFound", format!("KubeNova {name} not found")));
        };
        if stored_version(stored) != Some(version.as_str()) {
            return Err(conflict("KubeNova", &name));
        }
        stored["status"] = status;
        stored["metadata"]["resourceVersion"] = json!(next.to_string());
        let written = stored.clone();
        inner.version = next;
        inner.record("KubeNova", "status", &name);
        drop(inner);

        Ok(serde_json::from_value(written)?)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().namespaces.contains(name))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_node_list {
            return Err(api_error(503, "ServiceUnavailable", "nodes unavailable".to_string()));
        }
        Ok(inner.nodes.clone())
    }
}
