//! # Runtime
//!
//! Process bootstrap and the per-kind controller loops.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server, client, shutdown
//! - `watch_loop`: one kube-runtime `Controller` per workload kind
//! - `error_policy`: requeue decisions and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
