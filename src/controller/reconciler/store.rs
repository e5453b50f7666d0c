//! # Object Store
//!
//! The read/write surface the reconciler needs from the cluster.
//!
//! Every update is a full replace carrying the `resourceVersion` of the
//! object as last read, so the API server rejects it with 409 when the
//! object changed in between. That rejection surfaces as
//! [`StoreError::Conflict`] and is never retried here.

use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The object changed since it was read
    #[error("conflict updating {kind} {namespace}/{name}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Transport or API failure
    #[error("request for {kind} {namespace}/{name} failed: {source}")]
    Unavailable {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Any namespaced object the store can read and write
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Fetch and persist objects with optimistic concurrency
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object; `Ok(None)` when it does not exist
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// List the metadata of every object of a kind in a namespace
    ///
    /// Object bodies (ConfigMap data, Secret payloads) are not transferred.
    async fn list_metadata<K: StoreObject>(&self, namespace: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Replace an object, conditioned on its `resourceVersion`
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;
}

/// `ObjectStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| classify::<K>(namespace, name, e))
    }

    async fn list_metadata<K: StoreObject>(&self, namespace: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.list_metadata(&ListParams::default())
            .await
            .map(|list| list.items.into_iter().map(|item| item.metadata).collect())
            .map_err(|e| classify::<K>(namespace, "*", e))
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        api.replace(&name, &params, object)
            .await
            .map_err(|e| classify::<K>(&namespace, &name, e))
    }
}

fn classify<K: StoreObject>(namespace: &str, name: &str, error: kube::Error) -> StoreError {
    let kind = K::kind(&()).into_owned();
    match error {
        kube::Error::Api(e) if e.code == 409 => StoreError::Conflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => StoreError::Unavailable {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source: anyhow::Error::new(other),
        },
    }
}
