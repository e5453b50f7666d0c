//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `config_hash_reconciliations_total{kind}` - Total number of reconciliations
//! - `config_hash_reconciliation_errors_total{kind,reason}` - Total number of reconciliation errors
//! - `config_hash_reconciliation_duration_seconds{kind}` - Duration of reconciliation operations
//! - `config_hash_owner_hash_updates_total{kind}` - Fingerprint writes to workload pod templates
//! - `config_hash_dependency_updates_total{kind}` - Ownership/finalizer writes to ConfigMaps and Secrets
//! - `config_hash_requeues_total{reason}` - Requeues scheduled by the error policy

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_hash_reconciliations_total",
            "Total number of reconciliations",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_hash_reconciliation_errors_total",
            "Total number of reconciliation errors by workload kind and reason",
        ),
        &["kind", "reason"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "config_hash_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OWNER_HASH_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_hash_owner_hash_updates_total",
            "Total number of configuration hash writes to workload pod templates",
        ),
        &["kind"],
    )
    .expect("Failed to create OWNER_HASH_UPDATES_TOTAL metric - this should never happen")
});

static DEPENDENCY_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_hash_dependency_updates_total",
            "Total number of owner reference and finalizer writes to ConfigMaps and Secrets",
        ),
        &["kind"],
    )
    .expect("Failed to create DEPENDENCY_UPDATES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "config_hash_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OWNER_HASH_UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DEPENDENCY_UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str, reason: &str) {
    RECONCILIATION_ERRORS_TOTAL
        .with_label_values(&[kind, reason])
        .inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_hash_updates(kind: &str) {
    OWNER_HASH_UPDATES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_dependency_updates(kind: &str) {
    DEPENDENCY_UPDATES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.with_label_values(&["TestKindA"]).get();
        increment_reconciliations("TestKindA");
        let after = RECONCILIATIONS_TOTAL.with_label_values(&["TestKindA"]).get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors_by_reason() {
        let before = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["TestKindB", "WriteConflict"])
            .get();
        increment_reconciliation_errors("TestKindB", "WriteConflict");
        let after = RECONCILIATION_ERRORS_TOTAL
            .with_label_values(&["TestKindB", "WriteConflict"])
            .get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration("TestKindC", 1.5);
        let count = RECONCILIATION_DURATION
            .with_label_values(&["TestKindC"])
            .get_sample_count();
        assert!(count >= 1);
    }

    #[test]
    fn test_increment_hash_and_dependency_updates() {
        let hash_before = OWNER_HASH_UPDATES_TOTAL.with_label_values(&["TestKindD"]).get();
        let dep_before = DEPENDENCY_UPDATES_TOTAL.with_label_values(&["TestKindD"]).get();
        increment_hash_updates("TestKindD");
        increment_dependency_updates("TestKindD");
        increment_dependency_updates("TestKindD");
        assert_eq!(
            OWNER_HASH_UPDATES_TOTAL.with_label_values(&["TestKindD"]).get(),
            hash_before + 1
        );
        assert_eq!(
            DEPENDENCY_UPDATES_TOTAL.with_label_values(&["TestKindD"]).get(),
            dep_before + 2
        );
    }

    #[test]
    fn test_increment_requeues_total() {
        let before = REQUEUES_TOTAL.with_label_values(&["test-reason"]).get();
        increment_requeues_total("test-reason");
        let after = REQUEUES_TOTAL.with_label_values(&["test-reason"]).get();
        assert_eq!(after, before + 1u64);
    }
}
