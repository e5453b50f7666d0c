//! Common test utilities for handler integration tests
//!
//! Provides an in-memory `ObjectStore` with resourceVersion checks and
//! failure injection, a capturing `EventRecorder`, and workload/dependency
//! fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use config_hash_controller::constants::{
    CONFIG_HASH_ANNOTATION, DEPENDENCY_FINALIZER, UPDATE_ON_CONFIG_CHANGE_ANNOTATION,
};
use config_hash_controller::prelude::*;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, EnvFromSource, ObjectReference,
    PodSpec, PodTemplateSpec, Secret, SecretEnvSource, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub const NAMESPACE: &str = "default";

type ObjectKey = (String, String, String);

fn object_key<K: StoreObject>(namespace: &str, name: &str) -> ObjectKey {
    (
        K::kind(&()).into_owned(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn write_key(kind: &str, name: &str) -> String {
    format!("{kind}/{name}")
}

/// In-memory `ObjectStore`
///
/// Objects are kept as JSON and every insert or update bumps a global
/// resourceVersion. Updates carrying a stale resourceVersion fail with
/// `StoreError::Conflict`, like the API server's 409.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ObjectKey, serde_json::Value>>,
    writes: Mutex<Vec<String>>,
    reads: Mutex<Vec<String>>,
    conflicts: Mutex<HashSet<String>>,
    failing: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    hang_reads: AtomicBool,
    version: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or overwrite an object, outside of the write log
    pub fn insert<K: StoreObject>(&self, mut object: K) {
        object.meta_mut().resource_version = Some(self.next_version());
        let key = object_key::<K>(&object.namespace().unwrap_or_default(), &object.name_any());
        let value = serde_json::to_value(&object).unwrap();
        self.objects.lock().unwrap().insert(key, value);
    }

    pub fn fetch<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_key::<K>(namespace, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Mutate a stored object as another client would
    pub fn modify<K: StoreObject>(&self, namespace: &str, name: &str, f: impl FnOnce(&mut K)) {
        let mut object = self.fetch::<K>(namespace, name).unwrap();
        f(&mut object);
        self.insert(object);
    }

    pub fn remove<K: StoreObject>(&self, namespace: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&object_key::<K>(namespace, name));
    }

    /// Successful writes, as `Kind/name`, in order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    /// Fail the next update of `kind/name` with a conflict
    pub fn conflict_once(&self, kind: &str, name: &str) {
        self.conflicts.lock().unwrap().insert(write_key(kind, name));
    }

    /// Fail every update of `kind/name` as unavailable
    pub fn fail_updates(&self, kind: &str, name: &str) {
        self.failing.lock().unwrap().insert(write_key(kind, name));
    }

    /// `Kind/name` of every full-object read, in order
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    /// Fail every read as unavailable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every read wait forever
    pub fn set_hang_reads(&self, hang: bool) {
        self.hang_reads.store(hang, Ordering::SeqCst);
    }

    async fn before_read<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        if self.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                kind: K::kind(&()).into_owned(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: anyhow::anyhow!("connection refused"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.before_read::<K>(namespace, name).await?;
        self.reads
            .lock()
            .unwrap()
            .push(write_key(&K::kind(&()), name));
        Ok(self.fetch(namespace, name))
    }

    async fn list_metadata<K: StoreObject>(&self, namespace: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        self.before_read::<K>(namespace, "*").await?;
        let kind = K::kind(&()).into_owned();
        let objects = self.objects.lock().unwrap();
        let mut items: Vec<(&ObjectKey, &serde_json::Value)> = objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .collect();
        items.sort_by(|a, b| a.0.cmp(b.0));
        Ok(items
            .into_iter()
            .map(|(_, value)| serde_json::from_value::<K>(value.clone()).unwrap().meta().clone())
            .collect())
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let kind = K::kind(&()).into_owned();
        let namespace = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let label = write_key(&kind, &name);

        if self.conflicts.lock().unwrap().remove(&label) {
            return Err(StoreError::Conflict { kind, namespace, name });
        }
        if self.failing.lock().unwrap().contains(&label) {
            return Err(StoreError::Unavailable {
                kind,
                namespace,
                name,
                source: anyhow::anyhow!("injected update failure"),
            });
        }

        let stored: Option<K> = self.fetch(&namespace, &name);
        let Some(stored) = stored else {
            return Err(StoreError::Unavailable {
                kind,
                namespace,
                name,
                source: anyhow::anyhow!("not found"),
            });
        };
        if stored.resource_version() != object.resource_version() {
            return Err(StoreError::Conflict { kind, namespace, name });
        }

        let mut updated = object.clone();
        updated.meta_mut().resource_version = Some(self.next_version());
        self.objects.lock().unwrap().insert(
            object_key::<K>(&namespace, &name),
            serde_json::to_value(&updated).unwrap(),
        );
        self.writes.lock().unwrap().push(label);
        Ok(updated)
    }
}

/// `EventRecorder` that keeps every event, keyed by owner name
#[derive(Debug, Default)]
pub struct CapturingRecorder {
    events: Mutex<Vec<(String, OutcomeEvent)>>,
}

impl CapturingRecorder {
    pub fn events(&self) -> Vec<(String, OutcomeEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, e)| e.reason).collect()
    }

    pub fn last(&self) -> Option<OutcomeEvent> {
        self.events().pop().map(|(_, e)| e)
    }
}

#[async_trait]
impl EventRecorder for CapturingRecorder {
    async fn record(&self, owner: &ObjectReference, event: OutcomeEvent) {
        self.events
            .lock()
            .unwrap()
            .push((owner.name.clone().unwrap_or_default(), event));
    }
}

pub type TestHandler = Handler<MemoryStore, CapturingRecorder>;

pub fn handler(require_opt_in: bool) -> TestHandler {
    Handler::new(MemoryStore::new(), CapturingRecorder::default(), require_opt_in)
}

// Fixtures

pub fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn secret(name: &str, data: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str) -> Volume {
    Volume {
        name: format!("{name}-volume"),
        config_map: Some(ConfigMapVolumeSource {
            name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map_env_from(name: &str) -> EnvFromSource {
    EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn secret_env_from(name: &str, optional: bool) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: name.to_string(),
            optional: optional.then_some(true),
        }),
        ..Default::default()
    }
}

/// Pod template with the given volumes and one container using `env_from`
pub fn pod_template(volumes: Vec<Volume>, env_from: Vec<EnvFromSource>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            volumes: (!volumes.is_empty()).then_some(volumes),
            containers: vec![Container {
                name: "app".to_string(),
                image: Some("nginx:1.27".to_string()),
                env_from: (!env_from.is_empty()).then_some(env_from),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn workload_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("uid-{name}")),
        ..Default::default()
    }
}

pub fn deployment(name: &str, template: PodTemplateSpec) -> Deployment {
    Deployment {
        metadata: workload_meta(name),
        spec: Some(DeploymentSpec {
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn stateful_set(name: &str, template: PodTemplateSpec) -> StatefulSet {
    StatefulSet {
        metadata: workload_meta(name),
        spec: Some(StatefulSetSpec {
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn opt_in<K: Resource>(object: &mut K) {
    object
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            UPDATE_ON_CONFIG_CHANGE_ANNOTATION.to_string(),
            "true".to_string(),
        );
}

// Assertions helpers

pub fn stored_hash<W: Workload>(store: &MemoryStore, name: &str) -> Option<String> {
    store
        .fetch::<W>(NAMESPACE, name)
        .and_then(|w| w.pod_template().cloned())
        .and_then(|t| t.metadata)
        .and_then(|m| m.annotations)
        .and_then(|a| a.get(CONFIG_HASH_ANNOTATION).cloned())
}

pub fn owner_edges<K: StoreObject>(store: &MemoryStore, name: &str) -> Vec<OwnerReference> {
    store
        .fetch::<K>(NAMESPACE, name)
        .and_then(|o| o.meta().owner_references.clone())
        .unwrap_or_default()
}

pub fn edge_names<K: StoreObject>(store: &MemoryStore, name: &str) -> Vec<String> {
    owner_edges::<K>(store, name)
        .into_iter()
        .map(|r| format!("{}/{}", r.kind, r.name))
        .collect()
}

pub fn has_finalizer<K: StoreObject>(store: &MemoryStore, name: &str) -> bool {
    store
        .fetch::<K>(NAMESPACE, name)
        .and_then(|o| o.meta().finalizers.clone())
        .unwrap_or_default()
        .iter()
        .any(|f| f == DEPENDENCY_FINALIZER)
}
