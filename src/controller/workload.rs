//! # Workloads
//!
//! The `Workload` capability: any namespaced object that carries exactly one
//! pod template. The orchestrator is written once against this trait, with a
//! thin adapter per concrete kind (`Deployment`, `StatefulSet`, `DaemonSet`).

use crate::constants::UPDATE_ON_CONFIG_CHANGE_ANNOTATION;
use crate::controller::reconciler::fingerprint;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// API version shared by every supported workload kind
pub const WORKLOAD_API_VERSION: &str = "apps/v1";

/// Kinds whose owner references on a ConfigMap/Secret count as ownership edges
pub const WORKLOAD_KINDS: [&str; 3] = ["Deployment", "StatefulSet", "DaemonSet"];

/// A pod-template-bearing owner
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The pod template, if the object has a spec
    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    /// Mutable access to the pod template, if the object has a spec
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;

    /// Fingerprint currently stored on the pod template
    fn config_hash(&self) -> Option<&str> {
        self.pod_template().and_then(fingerprint::stored_fingerprint)
    }

    /// Whether the workload carries the opt-in annotation with value `"true"`
    fn opted_in(&self) -> bool {
        self.annotations()
            .get(UPDATE_ON_CONFIG_CHANGE_ANNOTATION)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Whether the workload is being deleted
    fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}

impl Workload for Deployment {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl Workload for StatefulSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl Workload for DaemonSet {
    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

/// Identity of an owner: (namespace, name, kind), plus its UID once fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
}

impl OwnerIdentity {
    /// Identity of a fetched workload
    pub fn of<W: Workload>(workload: &W) -> Self {
        Self {
            api_version: W::api_version(&()).into_owned(),
            kind: W::kind(&()).into_owned(),
            namespace: workload.namespace().unwrap_or_default(),
            name: workload.name_any(),
            uid: workload.uid(),
        }
    }

    /// Identity of a workload known only by name (e.g. one that no longer exists)
    pub fn named<W: Workload>(namespace: &str, name: &str) -> Self {
        Self {
            api_version: W::api_version(&()).into_owned(),
            kind: W::kind(&()).into_owned(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: None,
        }
    }

    /// The non-controlling owner reference that records an ownership edge
    ///
    /// `None` when the UID is unknown; an owner reference without one is invalid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        self.uid.as_ref().map(|uid| OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: uid.clone(),
            controller: Some(false),
            block_owner_deletion: Some(true),
        })
    }

    /// Whether the reference names this owner, regardless of UID
    pub fn is_named_by(&self, reference: &OwnerReference) -> bool {
        reference.api_version == self.api_version
            && reference.kind == self.kind
            && reference.name == self.name
    }

    /// Whether the reference points at exactly this incarnation of the owner
    pub fn is_referenced_by(&self, reference: &OwnerReference) -> bool {
        self.is_named_by(reference) && self.uid.as_deref() == Some(reference.uid.as_str())
    }
}

impl fmt::Display for OwnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Whether an owner reference is an ownership edge maintained by this controller
pub fn is_ownership_edge(reference: &OwnerReference) -> bool {
    reference.api_version == WORKLOAD_API_VERSION
        && WORKLOAD_KINDS.contains(&reference.kind.as_str())
        && reference.controller != Some(true)
}
