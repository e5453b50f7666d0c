//! # Controller
//!
//! Core controller modules for the config hash controller.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `workload`: the pod-template-bearing workload kinds

pub mod backoff;
pub mod reconciler;
pub mod server;
pub mod workload;
