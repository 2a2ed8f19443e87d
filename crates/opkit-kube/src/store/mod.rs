//! Object persistence used by the finalizer manager
//!
//! The finalizer manager only needs to read an object and write it back. Keeping
//! this behind a trait lets reconcilers plug in the kube client, a caching layer,
//! or the in-memory [`MockStore`] in tests.

mod mock;

pub use mock::{FailureMode, MockStore, OperationCounts};

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::error::StoreError;

/// Read and replace access to objects of type `K`
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ObjectStore<K: Send + Sync>: Send + Sync {
    /// Fetch the current state of an object
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError>;

    /// Replace an object, returning the persisted state
    ///
    /// Fails with [`StoreError::Conflict`] when the object carries a stale resource version.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;
}

/// Store for namespaced objects backed by the Kubernetes API
///
/// A request without a namespace, or an object without one, goes to the
/// client's default namespace. Use [`ClusterKubeStore`] for cluster-scoped kinds.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        let api: Api<K> = self.api(namespace);
        Ok(api.get(name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let namespace = obj.namespace();
        let api: Api<K> = self.api(namespace.as_deref());

        tracing::debug!(name = %name, namespace = ?namespace, "replacing object");
        Ok(api.replace(&name, &PostParams::default(), obj).await?)
    }
}

/// Store for cluster-scoped objects (namespaces, CRDs, cluster roles)
///
/// Namespaces are ignored.
#[derive(Clone)]
pub struct ClusterKubeStore {
    client: Client,
}

impl ClusterKubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for ClusterKubeStore
where
    K: Resource<Scope = ClusterResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, _namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let name = obj.name_any();
        let api: Api<K> = Api::all(self.client.clone());

        tracing::debug!(name = %name, "replacing cluster-scoped object");
        Ok(api.replace(&name, &PostParams::default(), obj).await?)
    }
}
