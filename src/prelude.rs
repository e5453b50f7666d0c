//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use config_hash_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - Workload abstraction and owner identity
//! - Store and event seams (ObjectStore, EventRecorder) with their kube implementations
//! - Reconciler types (Handler, Outcome, Reconciler, ReconcilerError, etc.)
//! - Config types (ControllerConfig, ServerConfig)

// Workload kinds
pub use crate::controller::workload::{OwnerIdentity, Workload};

// Seams - needed for driving the handler outside a cluster
pub use crate::controller::reconciler::{
    EventRecorder, KubeEventRecorder, KubeStore, ObjectStore, OutcomeEvent, Severity,
    StoreError, StoreObject,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, BackoffState, BackoffStates, Dependency, DependencyKey, DependencyKind, Handler, Outcome,
    Reconciler, ReconcilerError, Reference,
};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig};
