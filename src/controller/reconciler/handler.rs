//! # Handler
//!
//! Per-workload reconciliation, written once against the [`Workload`]
//! capability and shared by the Deployment, StatefulSet and DaemonSet loops.
//!
//! ## Flow
//!
//! 1. Fetch the owner. If it is gone, release any edges still naming it and succeed.
//! 2. Owner being deleted (or not opted in when opt-in is required): release
//!    every edge it holds and stop.
//! 3. Extract references from the pod template.
//! 4. Fetch every referenced ConfigMap/Secret and list current dependents.
//!    All reads finish before anything is written.
//! 5. Compute the fingerprint. A missing required dependency fails here.
//! 6. If the fingerprint changed, write it to the pod template. A conflict
//!    stops the invocation without touching dependencies.
//! 7. Sync ownership edges and finalizers, even when nothing rolled.
//! 8. Record one event describing the outcome.
//!
//! Each invocation performs a single read-compute-write attempt; retries are
//! left to the controller's requeue.

use crate::controller::reconciler::events::{EventRecorder, OutcomeEvent};
use crate::controller::reconciler::store::ObjectStore;
use crate::controller::reconciler::types::{
    Dependency, DependencyKey, DependencyKind, Reference, ReconcilerError,
};
use crate::controller::reconciler::{fingerprint, ownership, references};
use crate::controller::workload::{OwnerIdentity, Workload};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Terminal result of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The fingerprint changed and was written to the pod template
    Rolled { hash: String },
    /// The stored fingerprint was already current
    Unchanged { hash: String },
    /// The owner is being deleted; its edges were released
    Released { dependencies: usize },
    /// Opt-in is required and the owner has not opted in
    Unmanaged { dependencies: usize, cleared: bool },
    /// The owner no longer exists
    OwnerGone { released: usize },
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Rolled { .. } => "rolled",
            Outcome::Unchanged { .. } => "unchanged",
            Outcome::Released { .. } => "released",
            Outcome::Unmanaged { .. } => "unmanaged",
            Outcome::OwnerGone { .. } => "owner-gone",
        }
    }

    /// Event describing the outcome, if it warrants one
    fn event(&self) -> Option<OutcomeEvent> {
        match self {
            Outcome::Rolled { hash } => Some(OutcomeEvent::normal(
                "ConfigHashUpdated",
                "UpdateConfigHash",
                format!("Configuration hash updated to {}, pods will roll", short(hash)),
            )),
            Outcome::Unchanged { hash } => Some(OutcomeEvent::normal(
                "ConfigHashUnchanged",
                "Reconcile",
                format!("Configuration hash {} is current", short(hash)),
            )),
            Outcome::Released { dependencies } => Some(OutcomeEvent::normal(
                "DependenciesReleased",
                "ReleaseDependencies",
                format!("Released {dependencies} dependencies of deleting workload"),
            )),
            Outcome::Unmanaged {
                dependencies,
                cleared,
            } if *dependencies > 0 || *cleared => Some(OutcomeEvent::normal(
                "ConfigTrackingDisabled",
                "ReleaseDependencies",
                format!("Workload is not opted in, released {dependencies} dependencies"),
            )),
            Outcome::Unmanaged { .. } | Outcome::OwnerGone { .. } => None,
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Run a fallible future unless the token fires first
///
/// # Errors
///
/// Returns `Cancelled` when the token fires before the future completes.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, future: F) -> Result<T, ReconcilerError>
where
    F: Future<Output = Result<T, ReconcilerError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ReconcilerError::Cancelled),
        result = future => result,
    }
}

/// Reconciliation orchestrator
pub struct Handler<S, E> {
    store: S,
    events: E,
    require_opt_in: bool,
}

impl<S, E> fmt::Debug for Handler<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("require_opt_in", &self.require_opt_in)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore, E: EventRecorder> Handler<S, E> {
    pub fn new(store: S, events: E, require_opt_in: bool) -> Self {
        Self {
            store,
            events,
            require_opt_in,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    /// Reconcile one workload identity
    ///
    /// Writes at most one owner update and any number of independent
    /// dependency updates. Nothing is written once `cancel` has fired.
    ///
    /// # Errors
    ///
    /// Every failure other than a vanished owner is returned, after a warning
    /// event has been recorded on the owner.
    pub async fn handle<W: Workload>(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcilerError> {
        let fetched = cancellable(cancel, async {
            self.store
                .get::<W>(namespace, name)
                .await
                .map_err(ReconcilerError::from)
        })
        .await?;

        let Some(owner) = fetched else {
            debug!(
                resource.kind = %W::kind(&()),
                resource.namespace = namespace,
                resource.name = name,
                "Owner not found, releasing leftover dependencies"
            );
            let identity = OwnerIdentity::named::<W>(namespace, name);
            let released = ownership::release_owner(&self.store, &identity, cancel).await?;
            return Ok(Outcome::OwnerGone { released });
        };

        let object_ref = owner.object_ref(&());
        let result = self.reconcile_owner(owner, cancel).await;

        match &result {
            Ok(outcome) => {
                if let Some(event) = outcome.event() {
                    self.events.record(&object_ref, event).await;
                }
            }
            Err(e) => {
                let event = OutcomeEvent::warning(e.reason(), "Reconcile", e.to_string());
                self.events.record(&object_ref, event).await;
            }
        }
        result
    }

    async fn reconcile_owner<W: Workload>(
        &self,
        mut owner: W,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcilerError> {
        let identity = OwnerIdentity::of(&owner);

        if owner.is_deleting() {
            let dependencies = self.release(&identity, cancel).await?;
            info!(owner = %identity, dependencies, "Owner is being deleted, released dependencies");
            return Ok(Outcome::Released { dependencies });
        }

        if self.require_opt_in && !owner.opted_in() {
            return self.unmanage(owner, &identity, cancel).await;
        }

        let template = owner
            .pod_template()
            .ok_or_else(|| ReconcilerError::ExtractionAmbiguity {
                location: "spec.template".to_string(),
                reason: format!("{identity} has no pod template"),
            })?;
        let references = references::extract(template)?;

        let (fetched, current) = cancellable(cancel, async {
            futures::try_join!(
                self.fetch_dependencies(&identity.namespace, &references),
                ownership::list_dependents(&self.store, &identity),
            )
        })
        .await?;

        let hash = fingerprint::fingerprint(&identity.namespace, &references, &fetched)?;
        let updates = ownership::plan_sync(&identity, &references, &current, &fetched)?;

        let rolled = owner
            .pod_template_mut()
            .is_some_and(|template| fingerprint::apply_fingerprint(template, &hash));
        if rolled {
            if cancel.is_cancelled() {
                return Err(ReconcilerError::Cancelled);
            }
            self.store.update(&owner).await?;
            metrics::increment_hash_updates(&identity.kind);
            info!(
                owner = %identity,
                hash = %hash,
                references = references.len(),
                "Configuration hash updated"
            );
        } else {
            debug!(owner = %identity, hash = %hash, "Configuration hash unchanged");
        }

        ownership::apply_sync(&self.store, updates, cancel).await?;

        Ok(if rolled {
            Outcome::Rolled { hash }
        } else {
            Outcome::Unchanged { hash }
        })
    }

    /// Fetch every referenced object; absent objects are left out of the map
    async fn fetch_dependencies(
        &self,
        namespace: &str,
        references: &[Reference],
    ) -> Result<BTreeMap<DependencyKey, Dependency>, ReconcilerError> {
        let fetches = references.iter().map(|reference| async move {
            let dependency = match reference.kind {
                DependencyKind::ConfigMap => self
                    .store
                    .get::<ConfigMap>(namespace, &reference.name)
                    .await?
                    .map(Dependency::from),
                DependencyKind::Secret => self
                    .store
                    .get::<Secret>(namespace, &reference.name)
                    .await?
                    .map(Dependency::from),
            };
            Ok::<_, ReconcilerError>((reference.key(), dependency))
        });

        let results = futures::future::try_join_all(fetches).await?;
        Ok(results
            .into_iter()
            .filter_map(|(key, dependency)| dependency.map(|d| (key, d)))
            .collect())
    }

    /// Release every edge the owner holds
    async fn release(
        &self,
        identity: &OwnerIdentity,
        cancel: &CancellationToken,
    ) -> Result<usize, ReconcilerError> {
        let current = cancellable(cancel, ownership::list_dependents(&self.store, identity)).await?;
        let updates = ownership::plan_sync(identity, &[], &current, &BTreeMap::new())?;
        ownership::apply_sync(&self.store, updates, cancel).await
    }

    /// Stop managing an owner that has not opted in
    async fn unmanage<W: Workload>(
        &self,
        mut owner: W,
        identity: &OwnerIdentity,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcilerError> {
        let current = cancellable(cancel, ownership::list_dependents(&self.store, identity)).await?;

        let cleared = owner
            .pod_template_mut()
            .is_some_and(fingerprint::clear_fingerprint);
        if cleared {
            if cancel.is_cancelled() {
                return Err(ReconcilerError::Cancelled);
            }
            self.store.update(&owner).await?;
            info!(owner = %identity, "Removed configuration hash from unmanaged owner");
        }

        let updates = ownership::plan_sync(identity, &[], &current, &BTreeMap::new())?;
        let dependencies = ownership::apply_sync(&self.store, updates, cancel).await?;
        Ok(Outcome::Unmanaged {
            dependencies,
            cleared,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn test_unmanaged_without_changes_has_no_event() {
        let quiet = Outcome::Unmanaged {
            dependencies: 0,
            cleared: false,
        };
        assert!(quiet.event().is_none());

        let released = Outcome::Unmanaged {
            dependencies: 2,
            cleared: false,
        };
        assert_eq!(
            released.event().map(|e| e.reason),
            Some("ConfigTrackingDisabled".to_string())
        );
    }

    #[test]
    fn test_rolled_event_is_normal() {
        let event = Outcome::Rolled {
            hash: "d1".to_string(),
        }
        .event()
        .unwrap();
        assert_eq!(event.reason, "ConfigHashUpdated");
        assert_eq!(event.severity, crate::controller::reconciler::events::Severity::Normal);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = cancellable(&cancel, async { Ok::<_, ReconcilerError>(1) }).await;
        assert!(matches!(result, Err(ReconcilerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_through_result() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { Ok::<_, ReconcilerError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
