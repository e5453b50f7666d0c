//! # Ownership Tracking
//!
//! Keeps ConfigMap/Secret owner references in step with what each workload's
//! pod template references.
//!
//! An ownership edge is a non-controlling owner reference from a dependency
//! to a Deployment, StatefulSet or DaemonSet. The edge set is stored on the
//! dependencies themselves, so the watch on ConfigMaps and Secrets can map a
//! change back to every workload that mounts the object.
//!
//! Invariants maintained after a successful sync of owner `O`:
//! - a dependency has an edge to `O` exactly when `O`'s pod template references it
//! - a dependency carries [`DEPENDENCY_FINALIZER`] exactly when it has at least one edge
//!
//! Planning is pure and only returns dependencies whose metadata actually
//! changed, so a sync with nothing to do issues no writes.

use crate::constants::DEPENDENCY_FINALIZER;
use crate::controller::reconciler::handler::cancellable;
use crate::controller::reconciler::store::ObjectStore;
use crate::controller::reconciler::types::{
    Dependency, DependencyKey, DependencyKind, Reference, ReconcilerError,
};
use crate::controller::workload::{is_ownership_edge, OwnerIdentity};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Compute the dependency updates that bring ownership in line with `desired`
///
/// * `current` - dependencies that currently carry an edge naming `owner`
/// * `fetched` - dependencies fetched for `desired`
///
/// # Errors
///
/// Returns `MissingDependency` when a required reference was not fetched.
pub fn plan_sync(
    owner: &OwnerIdentity,
    desired: &[Reference],
    current: &[Dependency],
    fetched: &BTreeMap<DependencyKey, Dependency>,
) -> Result<Vec<Dependency>, ReconcilerError> {
    let mut updates = Vec::new();
    let mut wanted = BTreeSet::new();

    for reference in desired {
        let key = reference.key();
        let Some(dependency) = fetched.get(&key) else {
            if reference.required {
                return Err(ReconcilerError::MissingDependency {
                    kind: reference.kind,
                    namespace: owner.namespace.clone(),
                    name: reference.name.clone(),
                });
            }
            continue;
        };
        if !wanted.insert(key) {
            continue;
        }

        let mut dependency = dependency.clone();
        if attach(dependency.meta_mut(), owner) {
            updates.push(dependency);
        }
    }

    for dependency in current {
        if wanted.contains(&dependency.key()) {
            continue;
        }
        let mut dependency = dependency.clone();
        if detach(dependency.meta_mut(), owner) {
            updates.push(dependency);
        }
    }

    Ok(updates)
}

/// Add the owner's edge and the finalizer; drop edges from earlier incarnations
fn attach(meta: &mut ObjectMeta, owner: &OwnerIdentity) -> bool {
    let Some(edge) = owner.owner_reference() else {
        return false;
    };

    let references = meta.owner_references.get_or_insert_with(Vec::new);
    let before = references.len();
    references.retain(|r| !(is_ownership_edge(r) && owner.is_named_by(r) && r.uid != edge.uid));
    let mut changed = references.len() != before;

    if !references.iter().any(|r| owner.is_referenced_by(r)) {
        references.push(edge);
        changed = true;
    }

    set_finalizer(meta, true) || changed
}

/// Remove every edge naming the owner; drop the finalizer once no edges remain
fn detach(meta: &mut ObjectMeta, owner: &OwnerIdentity) -> bool {
    let mut changed = false;
    if let Some(references) = meta.owner_references.as_mut() {
        let before = references.len();
        references.retain(|r| !(is_ownership_edge(r) && owner.is_named_by(r)));
        changed = references.len() != before;
        if references.is_empty() {
            meta.owner_references = None;
        }
    }

    let still_owned = meta
        .owner_references
        .iter()
        .flatten()
        .any(is_ownership_edge);
    set_finalizer(meta, still_owned) || changed
}

fn set_finalizer(meta: &mut ObjectMeta, present: bool) -> bool {
    let has = has_finalizer(meta);
    if present && !has {
        meta.finalizers
            .get_or_insert_with(Vec::new)
            .push(DEPENDENCY_FINALIZER.to_string());
        true
    } else if !present && has {
        if let Some(finalizers) = meta.finalizers.as_mut() {
            finalizers.retain(|f| f != DEPENDENCY_FINALIZER);
            if finalizers.is_empty() {
                meta.finalizers = None;
            }
        }
        true
    } else {
        false
    }
}

/// Whether the object carries the dependency finalizer
pub fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers
        .iter()
        .flatten()
        .any(|f| f == DEPENDENCY_FINALIZER)
}

/// Whether the dependency has an edge naming the owner (any UID)
pub fn names_owner(meta: &ObjectMeta, owner: &OwnerIdentity) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .any(|r| is_ownership_edge(r) && owner.is_named_by(r))
}

/// ConfigMaps and Secrets in the owner's namespace with an edge naming the owner
///
/// Candidates are found from metadata-only lists; only the matching objects
/// are fetched in full. An object deleted between the list and the fetch is
/// skipped.
///
/// # Errors
///
/// Returns `StoreUnavailable` when a list or fetch fails.
pub async fn list_dependents<S: ObjectStore>(
    store: &S,
    owner: &OwnerIdentity,
) -> Result<Vec<Dependency>, ReconcilerError> {
    let namespace = owner.namespace.as_str();
    let (config_maps, secrets) = futures::try_join!(
        store.list_metadata::<ConfigMap>(namespace),
        store.list_metadata::<Secret>(namespace),
    )?;

    let candidates = config_maps
        .iter()
        .filter(|meta| names_owner(meta, owner))
        .map(|meta| DependencyKey::new(DependencyKind::ConfigMap, meta.name.clone().unwrap_or_default()))
        .chain(
            secrets
                .iter()
                .filter(|meta| names_owner(meta, owner))
                .map(|meta| DependencyKey::new(DependencyKind::Secret, meta.name.clone().unwrap_or_default())),
        );

    let fetches = candidates.map(|key| async move {
        let dependency = match key.kind {
            DependencyKind::ConfigMap => store
                .get::<ConfigMap>(namespace, &key.name)
                .await?
                .map(Dependency::from),
            DependencyKind::Secret => store
                .get::<Secret>(namespace, &key.name)
                .await?
                .map(Dependency::from),
        };
        Ok::<_, ReconcilerError>(dependency)
    });

    let fetched = futures::future::try_join_all(fetches).await?;
    debug!(
        owner = %owner,
        dependents = fetched.iter().flatten().count(),
        "Listed dependents"
    );
    Ok(fetched
        .into_iter()
        .flatten()
        .filter(|d| names_owner(d.meta(), owner))
        .collect())
}

/// Write planned dependency updates
///
/// Each update is independent: a failure is recorded and the remaining
/// updates still run. The token is checked before every write and no write
/// is issued once it has fired.
///
/// # Errors
///
/// Returns `Cancelled` if the token fired, otherwise `DependencySync` when
/// any update failed.
pub async fn apply_sync<S: ObjectStore>(
    store: &S,
    updates: Vec<Dependency>,
    cancel: &CancellationToken,
) -> Result<usize, ReconcilerError> {
    let attempted = updates.len();
    let mut failures = Vec::new();
    let mut written = 0;

    for dependency in updates {
        if cancel.is_cancelled() {
            return Err(ReconcilerError::Cancelled);
        }

        let result = match &dependency {
            Dependency::ConfigMap(cm) => store.update(cm).await.map(|_| ()),
            Dependency::Secret(secret) => store.update(secret).await.map(|_| ()),
        };
        match result {
            Ok(()) => {
                written += 1;
                metrics::increment_dependency_updates(dependency.kind().as_str());
                debug!(
                    dependency = %dependency,
                    finalizer = has_finalizer(dependency.meta()),
                    "Updated ownership"
                );
            }
            Err(e) => {
                warn!(dependency = %dependency, "Failed to update ownership: {}", e);
                failures.push(ReconcilerError::from(e));
            }
        }
    }

    let failed = failures.len();
    match failures.into_iter().next() {
        None => Ok(written),
        Some(first) => Err(ReconcilerError::DependencySync {
            failed,
            attempted,
            first: Box::new(first),
        }),
    }
}

/// Release every edge held by an owner that no longer exists
///
/// With no edges left to release this performs no writes.
///
/// # Errors
///
/// Propagates listing and update failures.
pub async fn release_owner<S: ObjectStore>(
    store: &S,
    owner: &OwnerIdentity,
    cancel: &CancellationToken,
) -> Result<usize, ReconcilerError> {
    let current = cancellable(cancel, list_dependents(store, owner)).await?;
    let updates = plan_sync(owner, &[], &current, &BTreeMap::new())?;
    if updates.is_empty() {
        return Ok(0);
    }

    let released = apply_sync(store, updates, cancel).await?;
    info!(owner = %owner, released, "Released dependencies of vanished owner");
    Ok(released)
}
