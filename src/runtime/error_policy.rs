//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loops.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::controller::workload::Workload;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Decide when to retry a failed reconciliation
///
/// Conflicts requeue after the short fixed `CONFLICT_REQUEUE_SECS` so the
/// next attempt reads fresh state. Everything else requeues on a per-resource
/// Fibonacci backoff whose state `reconcile` drops on success.
pub fn handle_reconciliation_error<W: Workload>(
    obj: Arc<W>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let kind = W::kind(&());
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = %kind,
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        reason = error.reason(),
    );
    let _error_guard = error_span.enter();

    metrics::increment_reconciliation_errors(&kind, error.reason());

    if error.is_conflict() {
        let delay = ctx.config.conflict_requeue_duration();
        info!(
            "Write conflict on {} {}/{}, requeueing in {}s: {}",
            kind,
            namespace,
            name,
            delay.as_secs(),
            error
        );
        metrics::increment_requeues_total("conflict");
        return Action::requeue(delay);
    }

    error!("Reconciliation error for {} {}/{}: {}", kind, namespace, name, error);

    // Backoff state is tracked per resource to avoid cross-resource interference
    let resource_key = Reconciler::resource_key(&kind, &namespace, &name);
    let (delay, error_count) = ctx.backoff_states.record_error(
        &resource_key,
        ctx.config.error_backoff_min_secs,
        ctx.config.error_backoff_max_secs,
    );
    let backoff_seconds = delay.as_secs();

    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {})",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Classification of a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old
    Expired,
    /// 429: API server storage reinitializing
    TooManyRequests,
    /// 404: watched kind or object missing
    NotFound,
    Other,
}

/// Classify a controller stream error from its debug representation
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    // 404 is checked before 401, as 404 errors may contain "WatchFailed" in the error chain
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");

    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::TooManyRequests
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a watch stream error with classification and backoff
///
/// The watchers behind the controller retry on their own; this paces the
/// stream and tells operators what went wrong.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    restart_delay: Duration,
) -> WatchErrorKind {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    let kind = classify_watch_error(error_string);
    match kind {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!("🔍 Verify the controller's ClusterRole still grants get/list/watch/update on deployments, statefulsets, daemonsets, configmaps and secrets");
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                restart_delay.as_secs()
            );
            tokio::time::sleep(restart_delay).await;
        }
        WatchErrorKind::Expired => {
            warn!(
                "Watch resource version expired (410) - this is normal during pod restarts, watch will restart"
            );
            warn!(error_type = "410", "watch.error.resource_version_expired");
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            // Exponential backoff, max configured value
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - this may be normal if the object was deleted. Error: {}",
                error_string
            );
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(restart_delay).await;
        }
    }
    kind
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found_before_unauthorized() {
        assert_eq!(
            classify_watch_error("WatchFailed: 404 page not found"),
            WatchErrorKind::NotFound
        );
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { code: 401, reason: \"Unauthorized\" })"),
            WatchErrorKind::Unauthorized
        );
    }

    #[test]
    fn test_classify_expired_and_throttled() {
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::TooManyRequests
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }

    #[tokio::test]
    async fn test_throttling_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(1);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::ZERO).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 2);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3, Duration::ZERO).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_unclassified_error_waits_restart_delay() {
        let backoff = AtomicU64::new(1);
        let delay = Duration::from_millis(20);
        let start = std::time::Instant::now();
        let kind = handle_watch_stream_error("connection reset", &backoff, 3, delay).await;
        assert_eq!(kind, WatchErrorKind::Other);
        assert!(start.elapsed() >= delay);
        assert_eq!(backoff.load(Ordering::Relaxed), 1);
    }
}
