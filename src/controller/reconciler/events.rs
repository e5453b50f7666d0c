//! # Events
//!
//! One Kubernetes event per reconciliation outcome, recorded on the owner.
//!
//! The recorder is injected into the handler so tests can capture events
//! instead of publishing them. Publishing is best effort: a failure is logged
//! and never fails the reconciliation.

use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Severity of an outcome event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// A user-visible reconciliation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEvent {
    pub severity: Severity,
    /// CamelCase reason, e.g. `ConfigHashUpdated`
    pub reason: String,
    pub action: String,
    pub note: String,
}

impl OutcomeEvent {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: Severity::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }
}

/// Records outcome events against an owner
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, owner: &ObjectReference, event: OutcomeEvent);
}

/// `EventRecorder` that publishes through the Kubernetes events API
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventRecorder").finish_non_exhaustive()
    }
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, owner: &ObjectReference, event: OutcomeEvent) {
        let type_ = match event.severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        };
        let published = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason.clone(),
                    note: Some(event.note),
                    action: event.action,
                    secondary: None,
                },
                owner,
            )
            .await;

        if let Err(e) = published {
            warn!(
                reason = %event.reason,
                resource.name = owner.name.as_deref().unwrap_or("unknown"),
                resource.namespace = owner.namespace.as_deref().unwrap_or("unknown"),
                "Failed to publish event: {}",
                e
            );
        }
    }
}
