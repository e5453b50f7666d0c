//! # Config Hash Controller
//!
//! A Kubernetes controller that rolls workloads when the ConfigMaps and
//! Secrets their pod templates reference change.
//!
//! ## Overview
//!
//! For every Deployment, StatefulSet and DaemonSet the controller:
//!
//! 1. **Extracts references** - Collects ConfigMap/Secret names from volumes, `envFrom` and `env`
//! 2. **Fingerprints content** - Hashes the referenced data into a deterministic SHA-256 digest
//! 3. **Stamps the pod template** - Writes the digest as a pod template annotation, triggering a rollout
//! 4. **Tracks dependents** - Adds non-controlling owner references and a finalizer on each dependency
//!    so that a change to the dependency wakes the workload up
//!
//! ## Features
//!
//! - **Opt-in mode**: With `REQUIRE_OPT_IN=true`, only annotated workloads are managed
//! - **Namespace scoping**: `WATCH_NAMESPACE` restricts the controller to one namespace
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::Result;
use config_hash_controller::runtime::initialization::initialize;
use config_hash_controller::runtime::watch_loop::run_watch_loop;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let (deployments, stateful_sets, daemon_sets) = tokio::join!(
        run_watch_loop::<Deployment>(
            init.client.clone(),
            init.reconciler.clone(),
            init.server_state.clone(),
        ),
        run_watch_loop::<StatefulSet>(
            init.client.clone(),
            init.reconciler.clone(),
            init.server_state.clone(),
        ),
        run_watch_loop::<DaemonSet>(
            init.client.clone(),
            init.reconciler.clone(),
            init.server_state.clone(),
        ),
    );

    // Stop the HTTP server once every watch loop has drained
    init.shutdown.cancel();
    if let Err(e) = init.server_handle.await {
        error!("HTTP server task failed: {}", e);
    }

    deployments?;
    stateful_sets?;
    daemon_sets?;

    info!("Config hash controller stopped");
    Ok(())
}
