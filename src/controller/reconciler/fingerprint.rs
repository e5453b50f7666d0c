//! # Fingerprint
//!
//! Deterministic SHA-256 digest over a workload's references and the content
//! of the objects they name, and the pod template annotation that carries it.
//!
//! The hashed stream is, for each reference in (kind, name) order:
//!
//! ```text
//! field(kind) field(name) u64(entry count) { field(key) field(value) }*
//! ```
//!
//! where `field(x)` is the big-endian `u64` length of `x` followed by its
//! bytes and entries are sorted by key. Length prefixes keep distinct inputs
//! from concatenating to the same stream. Whether a reference is optional is
//! not hashed; only identity and content are.

use crate::constants::CONFIG_HASH_ANNOTATION;
use crate::controller::reconciler::types::{Dependency, DependencyKey, Reference, ReconcilerError};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Compute the fingerprint of `references` over the fetched dependencies
///
/// A reference with no fetched object contributes empty content when optional.
///
/// # Errors
///
/// Returns `MissingDependency` for the first required reference with no
/// fetched object.
pub fn fingerprint(
    namespace: &str,
    references: &[Reference],
    fetched: &BTreeMap<DependencyKey, Dependency>,
) -> Result<String, ReconcilerError> {
    // Callers normally pass extractor output, which is already ordered
    let mut ordered: Vec<&Reference> = references.iter().collect();
    ordered.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
    ordered.dedup_by(|a, b| a.kind == b.kind && a.name == b.name);

    let mut hasher = Sha256::new();
    for reference in ordered {
        let content = match fetched.get(&reference.key()) {
            Some(dependency) => dependency.content(),
            None if is_required(references, reference) => {
                return Err(ReconcilerError::MissingDependency {
                    kind: reference.kind,
                    namespace: namespace.to_string(),
                    name: reference.name.clone(),
                });
            }
            None => BTreeMap::new(),
        };

        write_field(&mut hasher, reference.kind.as_str().as_bytes());
        write_field(&mut hasher, reference.name.as_bytes());
        hasher.update((content.len() as u64).to_be_bytes());
        for (key, value) in &content {
            write_field(&mut hasher, key.as_bytes());
            write_field(&mut hasher, value);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

// Required-ness is the OR across duplicate entries
fn is_required(references: &[Reference], reference: &Reference) -> bool {
    references
        .iter()
        .any(|r| r.kind == reference.kind && r.name == reference.name && r.required)
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

/// Fingerprint currently stored on the pod template, if any
pub fn stored_fingerprint(template: &PodTemplateSpec) -> Option<&str> {
    template
        .metadata
        .as_ref()
        .and_then(|meta| meta.annotations.as_ref())
        .and_then(|annotations| annotations.get(CONFIG_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Write the fingerprint annotation, leaving every other annotation untouched
///
/// Returns `false` when the template already carries `digest`.
pub fn apply_fingerprint(template: &mut PodTemplateSpec, digest: &str) -> bool {
    if stored_fingerprint(template) == Some(digest) {
        return false;
    }

    template
        .metadata
        .get_or_insert_with(Default::default)
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(CONFIG_HASH_ANNOTATION.to_string(), digest.to_string());
    true
}

/// Remove the fingerprint annotation
///
/// Returns `false` when there was nothing to remove.
pub fn clear_fingerprint(template: &mut PodTemplateSpec) -> bool {
    template
        .metadata
        .as_mut()
        .and_then(|meta| meta.annotations.as_mut())
        .is_some_and(|annotations| annotations.remove(CONFIG_HASH_ANNOTATION).is_some())
}
