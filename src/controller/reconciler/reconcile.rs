//! # Reconcile
//!
//! Entry point called by the kube-runtime `Controller` for every workload
//! kind. Wraps the handler with a per-invocation deadline, a tracing span and
//! metrics, and maps the outcome to an [`Action`].

use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::workload::Workload;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Instrument};

/// Reconcile one workload
///
/// The cancellation token handed to the handler fires on process shutdown or
/// when `RECONCILE_TIMEOUT_SECS` elapses, whichever comes first.
///
/// # Errors
///
/// Returns the handler's error; requeue timing is decided by the error policy.
pub async fn reconcile<W: Workload>(
    obj: Arc<W>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let kind = W::kind(&()).into_owned();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let span = tracing::info_span!(
        "controller.reconcile",
        resource.kind = kind.as_str(),
        resource.namespace = namespace.as_str(),
        resource.name = name.as_str(),
        resource.version = obj.resource_version().as_deref().unwrap_or("unknown"),
    );

    metrics::increment_reconciliations(&kind);
    let start = Instant::now();

    let (cancel, deadline) = ctx.deadline_token();

    let result = ctx
        .handler
        .handle::<W>(&namespace, &name, &cancel)
        .instrument(span.clone())
        .await;
    deadline.abort();

    metrics::observe_reconciliation_duration(&kind, start.elapsed().as_secs_f64());

    let outcome = result?;
    // Success, including a vanished owner, ends any error backoff
    ctx.backoff_states
        .clear(&Reconciler::resource_key(&kind, &namespace, &name));
    span.in_scope(|| {
        debug!(
            outcome = outcome.as_str(),
            elapsed_ms = start.elapsed().as_millis(),
            "reconciliation.success"
        );
    });

    // Changes to the workload or any owned ConfigMap/Secret retrigger
    Ok(Action::await_change())
}
