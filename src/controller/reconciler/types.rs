//! # Types
//!
//! Core types for the reconciler: the error taxonomy, the dependency model
//! and the runtime context shared by every controller loop.

use crate::config::SharedControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::events::KubeEventRecorder;
use crate::controller::reconciler::handler::Handler;
use crate::controller::reconciler::store::{KubeStore, StoreError};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// A required ConfigMap/Secret does not exist
    #[error("required {kind} {namespace}/{name} not found")]
    MissingDependency {
        kind: DependencyKind,
        namespace: String,
        name: String,
    },

    /// Optimistic-concurrency mismatch on an owner or dependency update
    #[error("write conflict on {kind} {namespace}/{name}")]
    WriteConflict {
        kind: String,
        namespace: String,
        name: String,
    },

    /// A pod template reference that cannot be resolved to a concrete (kind, name)
    #[error("unresolvable reference at {location}: {reason}")]
    ExtractionAmbiguity { location: String, reason: String },

    /// Transport or backing-store failure
    #[error("store unavailable for {kind} {namespace}/{name}: {source}")]
    StoreUnavailable {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The invocation's cancellation or deadline fired
    #[error("reconciliation cancelled before completion")]
    Cancelled,

    /// Some independent dependency updates failed
    #[error("{failed} of {attempted} dependency updates failed, first: {first}")]
    DependencySync {
        failed: usize,
        attempted: usize,
        #[source]
        first: Box<ReconcilerError>,
    },
}

impl ReconcilerError {
    /// Short machine-readable reason used for events and metric labels
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::MissingDependency { .. } => "MissingDependency",
            ReconcilerError::WriteConflict { .. } => "WriteConflict",
            ReconcilerError::ExtractionAmbiguity { .. } => "ExtractionAmbiguity",
            ReconcilerError::StoreUnavailable { .. } => "StoreUnavailable",
            ReconcilerError::Cancelled => "Cancelled",
            ReconcilerError::DependencySync { .. } => "DependencySyncFailed",
        }
    }

    /// Whether the failure is an optimistic-concurrency conflict
    ///
    /// A partial dependency sync counts as a conflict when its first failure was one.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcilerError::WriteConflict { .. } => true,
            ReconcilerError::DependencySync { first, .. } => first.is_conflict(),
            _ => false,
        }
    }
}

impl From<StoreError> for ReconcilerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict {
                kind,
                namespace,
                name,
            } => ReconcilerError::WriteConflict {
                kind,
                namespace,
                name,
            },
            StoreError::Unavailable {
                kind,
                namespace,
                name,
                source,
            } => ReconcilerError::StoreUnavailable {
                kind,
                namespace,
                name,
                source,
            },
        }
    }
}

/// Kind of configuration object a pod template can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKind {
    ConfigMap,
    Secret,
}

impl DependencyKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::ConfigMap => "ConfigMap",
            DependencyKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (kind, name) of a dependency within the owner's namespace
///
/// Ordering is lexicographic by kind then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyKey {
    pub kind: DependencyKind,
    pub name: String,
}

impl DependencyKey {
    pub fn new(kind: DependencyKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A dependency mention extracted from a pod template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: DependencyKind,
    pub name: String,
    /// Absence of the object blocks reconciliation
    pub required: bool,
}

impl Reference {
    pub fn required(kind: DependencyKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(kind: DependencyKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            required: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(self.kind, self.name.clone())
    }
}

/// A fetched ConfigMap or Secret
#[derive(Debug, Clone, PartialEq)]
pub enum Dependency {
    ConfigMap(ConfigMap),
    Secret(Secret),
}

impl Dependency {
    #[must_use]
    pub fn kind(&self) -> DependencyKind {
        match self {
            Dependency::ConfigMap(_) => DependencyKind::ConfigMap,
            Dependency::Secret(_) => DependencyKind::Secret,
        }
    }

    #[must_use]
    pub fn key(&self) -> DependencyKey {
        DependencyKey::new(self.kind(), self.meta().name.clone().unwrap_or_default())
    }

    #[must_use]
    pub fn namespace(&self) -> String {
        self.meta().namespace.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Dependency::ConfigMap(cm) => &cm.metadata,
            Dependency::Secret(secret) => &secret.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Dependency::ConfigMap(cm) => &mut cm.metadata,
            Dependency::Secret(secret) => &mut secret.metadata,
        }
    }

    /// Key to bytes content that feeds the fingerprint
    ///
    /// ConfigMaps merge `data` and `binaryData`. Secrets merge `data` and
    /// `stringData`, with `stringData` taking precedence as the API server does.
    #[must_use]
    pub fn content(&self) -> BTreeMap<String, Vec<u8>> {
        let mut content = BTreeMap::new();
        match self {
            Dependency::ConfigMap(cm) => {
                for (key, value) in cm.data.iter().flatten() {
                    content.insert(key.clone(), value.as_bytes().to_vec());
                }
                for (key, value) in cm.binary_data.iter().flatten() {
                    content.insert(key.clone(), value.0.clone());
                }
            }
            Dependency::Secret(secret) => {
                for (key, value) in secret.data.iter().flatten() {
                    content.insert(key.clone(), value.0.clone());
                }
                for (key, value) in secret.string_data.iter().flatten() {
                    content.insert(key.clone(), value.as_bytes().to_vec());
                }
            }
        }
        content
    }
}

impl From<ConfigMap> for Dependency {
    fn from(cm: ConfigMap) -> Self {
        Dependency::ConfigMap(cm)
    }
}

impl From<Secret> for Dependency {
    fn from(secret: Secret) -> Self {
        Dependency::Secret(secret)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dependency::ConfigMap(cm) => cm.name_any(),
            Dependency::Secret(secret) => secret.name_any(),
        };
        write!(f, "{} {}/{}", self.kind(), self.namespace(), name)
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Backoff state for every resource currently failing, keyed by
/// [`Reconciler::resource_key`]
///
/// Entries exist only while a resource keeps failing; success or the
/// resource disappearing removes them.
#[derive(Debug, Default)]
pub struct BackoffStates {
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BackoffState>> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record a failure and return the delay before the next attempt along
    /// with the resource's consecutive error count
    pub fn record_error(&self, key: &str, min_seconds: u64, max_seconds: u64) -> (Duration, u32) {
        let mut states = self.lock();
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| BackoffState::new(min_seconds, max_seconds));
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forget a resource's backoff; returns whether an entry existed
    pub fn clear(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Consecutive error count of a failing resource
    #[must_use]
    pub fn error_count(&self, key: &str) -> Option<u32> {
        self.lock().get(key).map(|state| state.error_count)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Runtime context handed to every controller loop
pub struct Reconciler {
    pub handler: Handler<KubeStore, KubeEventRecorder>,
    pub config: SharedControllerConfig,
    pub backoff_states: BackoffStates,
    // Cancelled on process shutdown; each reconciliation derives a child token
    pub shutdown: CancellationToken,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(client: Client, config: SharedControllerConfig, shutdown: CancellationToken) -> Self {
        let handler = Handler::new(
            KubeStore::new(client.clone()),
            KubeEventRecorder::new(client),
            config.require_opt_in,
        );

        Self {
            handler,
            config,
            backoff_states: BackoffStates::new(),
            shutdown,
        }
    }

    /// Key for per-resource backoff state
    pub fn resource_key(kind: &str, namespace: &str, name: &str) -> String {
        format!("{kind}/{namespace}/{name}")
    }

    /// Cancellation token for one handler run
    ///
    /// Child of the shutdown token; also fires once `RECONCILE_TIMEOUT_SECS`
    /// elapses. Abort the returned task when the run finishes.
    pub fn deadline_token(&self) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let cancel = self.shutdown.child_token();
        let deadline = {
            let cancel = cancel.clone();
            let timeout = self.config.reconcile_timeout();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };
        (cancel, deadline)
    }
}
