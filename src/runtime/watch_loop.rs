//! # Watch Loop
//!
//! One controller watch loop per workload kind. Each loop watches the kind
//! itself plus ConfigMaps and Secrets, and maps a ConfigMap/Secret change to
//! every workload named in its owner references (controlling or not).
//!
//! A dependency change that names a workload no longer in the cache never
//! reaches `reconcile`; the controller reports it as `ObjectNotFound`. Those
//! are routed to the handler here so the vanished owner's edges and
//! finalizers are still released.

use crate::controller::reconciler::{
    reconcile, EventRecorder, Handler, ObjectStore, Outcome, Reconciler, ReconcilerError,
    StoreObject,
};
use crate::controller::server::ServerState;
use crate::controller::workload::Workload;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};
use kube_runtime::{controller, watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

fn scoped_api<K: StoreObject>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Release a workload the controller could not find in its cache
///
/// Returns `None` unless `error` is an `ObjectNotFound` for kind `W`.
/// Otherwise runs the handler for the named object, which re-reads it and
/// releases its leftover edges when it is really gone.
pub async fn release_vanished_owner<W, S, E, R, Q>(
    handler: &Handler<S, E>,
    error: &controller::Error<R, Q>,
    cancel: &CancellationToken,
) -> Option<Result<Outcome, ReconcilerError>>
where
    W: Workload,
    S: ObjectStore,
    E: EventRecorder,
    R: 'static,
    Q: 'static,
{
    let controller::Error::ObjectNotFound(object) = error else {
        return None;
    };
    if object.dyntype.kind != W::kind(&()) {
        return None;
    }
    let namespace = object.namespace.as_deref().unwrap_or_default();
    Some(handler.handle::<W>(namespace, &object.name, cancel).await)
}

async fn release_not_found<W: Workload, R: 'static, Q: 'static>(
    reconciler: &Reconciler,
    error: &controller::Error<R, Q>,
) {
    let controller::Error::ObjectNotFound(object) = error else {
        return;
    };
    let (cancel, deadline) = reconciler.deadline_token();
    let released = release_vanished_owner::<W, _, _, _, _>(&reconciler.handler, error, &cancel).await;
    deadline.abort();

    match released {
        Some(Ok(outcome)) => {
            let key = Reconciler::resource_key(
                &W::kind(&()),
                object.namespace.as_deref().unwrap_or_default(),
                &object.name,
            );
            reconciler.backoff_states.clear(&key);
            debug!(object = %object, outcome = outcome.as_str(), "watch.event.owner_released");
        }
        Some(Err(error)) => {
            warn!(object = %object, reason = error.reason(), "Failed to release vanished owner: {}", error);
        }
        None => {}
    }
}

/// Run the controller watch loop for workload kind `W`
///
/// Restarts the controller if its stream ends, until shutdown is requested.
pub async fn run_watch_loop<W: Workload>(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let kind = W::kind(&()).into_owned();
    let config = reconciler.config.clone();
    let shutdown = reconciler.shutdown.clone();
    let namespace = config.watch_namespace.as_deref();

    info!(
        resource.kind = kind.as_str(),
        namespace = namespace.unwrap_or("*"),
        "Starting controller watch loop..."
    );

    // Shared backoff state for watch stream errors
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    loop {
        if shutdown.is_cancelled() {
            info!(resource.kind = kind.as_str(), "Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            resource.kind = kind.as_str(),
            operation = "watch_loop"
        );

        let owners: Api<W> = scoped_api(&client, namespace);
        let config_maps: Api<ConfigMap> = scoped_api(&client, namespace);
        let secrets: Api<Secret> = scoped_api(&client, namespace);

        let trigger = shutdown.clone();
        let backoff = backoff_duration_ms.clone();
        let stream_config = config.clone();
        let stream_reconciler = reconciler.clone();

        Controller::new(owners, watcher::Config::default().any_semantic())
            .owns(config_maps, watcher::Config::default())
            .owns(secrets, watcher::Config::default())
            .graceful_shutdown_on(async move { trigger.cancelled().await })
            .run(
                reconcile::<W>,
                handle_reconciliation_error::<W>,
                reconciler.clone(),
            )
            .for_each(move |result| {
                let backoff = backoff.clone();
                let config = stream_config.clone();
                let reconciler = stream_reconciler.clone();
                async move {
                    match result {
                        Ok((object, _action)) => {
                            // Successful event, reset backoff on success
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(object = %object, "watch.event.reconciled");
                        }
                        Err(controller::Error::ReconcilerFailed(error, object)) => {
                            // Already handled by the error policy
                            debug!(object = %object, error = %error, "watch.event.reconciliation_failed");
                        }
                        Err(error @ controller::Error::ObjectNotFound(_)) => {
                            release_not_found::<W, _, _>(&reconciler, &error).await;
                        }
                        Err(error) => {
                            handle_watch_stream_error(
                                &format!("{error:?}"),
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await;
                        }
                    }
                }
            })
            .instrument(watch_span)
            .await;

        if shutdown.is_cancelled() {
            info!(resource.kind = kind.as_str(), "Shutdown requested, exiting watch loop");
            break;
        }

        // Controller stream ended - restart watch
        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            resource.kind = kind.as_str(),
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown.cancelled() => {}
        }
    }

    server_state.set_ready(false);
    info!(resource.kind = kind.as_str(), "Controller stopped gracefully");
    Ok(())
}
