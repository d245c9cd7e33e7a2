//! Resource store seam
//!
//! Everything the reconciler reads or writes goes through [`ResourceStore`].
//! [`KubeStore`] is the kube-rs implementation used in the cluster; tests run
//! the same pipeline against an in-memory store.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    client::Client,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::crd::KubeNova;
use crate::error::{Error, Result};

/// Optimistic-concurrency stamp (`metadata.resourceVersion`)
///
/// Every replace carries the token the caller read; the store rejects the
/// write with [`Error::Conflict`] when the object moved on since.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(version: impl Into<String>) -> Self {
        VersionToken(version.into())
    }

    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        obj.meta().resource_version.clone().map(VersionToken)
    }

    /// Token of an object read back from the store
    pub fn require<K: Resource<DynamicType = ()>>(obj: &K) -> Result<Self> {
        Self::of(obj).ok_or_else(|| {
            Error::ConfigError(format!(
                "{} {} carries no resourceVersion",
                K::kind(&()),
                obj.meta().name.as_deref().unwrap_or_default()
            ))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A kind the reconciler manages through the store
pub trait StoredObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// False for cluster-scoped kinds; their namespace argument is ignored
    const NAMESPACED: bool = true;

    fn api(client: Client, namespace: &str) -> Api<Self>;
}

macro_rules! namespaced_object {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl StoredObject for $kind {
                fn api(client: Client, namespace: &str) -> Api<Self> {
                    Api::namespaced(client, namespace)
                }
            }
        )+
    };
}

namespaced_object!(
    KubeNova,
    Deployment,
    Service,
    ConfigMap,
    Secret,
    ServiceAccount,
    Ingress
);

impl StoredObject for ClusterRoleBinding {
    const NAMESPACED: bool = false;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }
}

/// Read and write access to the cluster, as seen by one reconcile pass
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// `None` when the object does not exist
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Every object of kind `K` in `namespace`
    async fn list<K: StoredObject>(&self, namespace: &str) -> Result<Vec<K>>;

    async fn create<K: StoredObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replace the whole object, guarded by `version`
    async fn replace<K: StoredObject>(
        &self,
        namespace: &str,
        obj: &K,
        version: &VersionToken,
    ) -> Result<K>;

    /// Returns false when the object was already absent
    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Write only the status subresource of the root, guarded by `version`
    async fn replace_status(&self, obj: &KubeNova, version: &VersionToken) -> Result<KubeNova>;

    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// [`ResourceStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Map 409 onto [`Error::Conflict`] so callers can match on it
fn write_error<K: StoredObject>(err: kube::Error, name: &str) -> Error {
    match err {
        kube::Error::Api(ref e) if e.code == 409 => Error::Conflict {
            kind: K::kind(&()).to_string(),
            name: name.to_string(),
        },
        e => Error::KubeError(e),
    }
}

fn with_version<K: StoredObject>(obj: &K, version: &VersionToken) -> K {
    let mut obj = obj.clone();
    obj.meta_mut().resource_version = Some(version.as_str().to_string());
    obj
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list<K: StoredObject>(&self, namespace: &str) -> Result<Vec<K>> {
        let api = K::api(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create<K: StoredObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let api = K::api(self.client.clone(), namespace);
        let name = obj.name_any();
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| write_error::<K>(e, &name))
    }

    async fn replace<K: StoredObject>(
        &self,
        namespace: &str,
        obj: &K,
        version: &VersionToken,
    ) -> Result<K> {
        let api = K::api(self.client.clone(), namespace);
        let name = obj.name_any();
        api.replace(&name, &PostParams::default(), &with_version(obj, version))
            .await
            .map_err(|e| write_error::<K>(e, &name))
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        let api = K::api(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} {} already absent", K::kind(&()), name);
                Ok(false)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn replace_status(&self, obj: &KubeNova, version: &VersionToken) -> Result<KubeNova> {
        let namespace = obj.namespace().unwrap_or_default();
        let api: Api<KubeNova> = Api::namespaced(self.client.clone(), &namespace);
        let name = obj.name_any();
        let body = serde_json::to_vec(&with_version(obj, version))?;
        api.replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| write_error::<KubeNova>(e, &name))
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
