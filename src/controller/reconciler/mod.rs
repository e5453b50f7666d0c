//! # Reconciler
//!
//! Keeps each workload's pod template fingerprint in step with the content
//! of the ConfigMaps and Secrets it mounts.
//!
//! The reconciler:
//! - Extracts every ConfigMap/Secret reference from the pod template
//! - Hashes the referenced content into the `wave.pusher.com/config-hash`
//!   pod template annotation, so a content change rolls the workload
//! - Records each dependency's dependents as non-controlling owner
//!   references plus a finalizer, so a dependency change requeues them
//!
//! ## Modules
//!
//! - `references`: pod template scanning
//! - `fingerprint`: digest computation and the annotation
//! - `ownership`: owner references and finalizers on dependencies
//! - `handler`: per-workload orchestration
//! - `store` / `events`: cluster access seams
//! - `reconcile`: kube-runtime entry point

pub mod events;
pub mod fingerprint;
pub mod handler;
pub mod ownership;
pub mod reconcile;
pub mod references;
pub mod store;
pub mod types;

// Re-export public API
pub use events::{EventRecorder, KubeEventRecorder, OutcomeEvent, Severity};
pub use handler::{Handler, Outcome};
pub use reconcile::reconcile;
pub use store::{KubeStore, ObjectStore, StoreError, StoreObject};
pub use types::{
    BackoffState, BackoffStates, Dependency, DependencyKey, DependencyKind, Reconciler, ReconcilerError, Reference,
};
