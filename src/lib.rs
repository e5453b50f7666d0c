//! Config Hash Controller Library
//!
//! Rolls Deployments, StatefulSets and DaemonSets whenever a ConfigMap or
//! Secret referenced by their pod template changes, by stamping a content
//! fingerprint onto the pod template.
//!
//! ## Quick Start
//!
//! ```rust
//! use config_hash_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
