//! # Reference Extraction
//!
//! Enumerates every ConfigMap and Secret a pod template refers to.
//!
//! Sources scanned:
//! - `volumes[].configMap`, `volumes[].secret`
//! - `volumes[].projected.sources[].configMap` / `.secret`
//! - `containers[]` and `initContainers[]`: `envFrom[].configMapRef` /
//!   `.secretRef` and `env[].valueFrom.configMapKeyRef` / `.secretKeyRef`
//!
//! References are deduplicated on (kind, name). A reference is required unless
//! every occurrence marks it `optional: true`. The result is ordered by kind,
//! then name. No store access happens here.

use crate::controller::reconciler::types::{DependencyKey, DependencyKind, Reference, ReconcilerError};
use k8s_openapi::api::core::v1::{Container, PodTemplateSpec, Volume};
use std::collections::BTreeMap;

/// Extract the ordered, deduplicated references of a pod template
///
/// # Errors
///
/// Returns `ExtractionAmbiguity` when a reference has no resolvable name.
pub fn extract(template: &PodTemplateSpec) -> Result<Vec<Reference>, ReconcilerError> {
    let mut collector = Collector::default();

    let Some(spec) = template.spec.as_ref() else {
        return Ok(Vec::new());
    };

    for volume in spec.volumes.iter().flatten() {
        collector.scan_volume(volume)?;
    }
    for container in spec.init_containers.iter().flatten() {
        collector.scan_container("initContainers", container)?;
    }
    for container in &spec.containers {
        collector.scan_container("containers", container)?;
    }

    Ok(collector.finish())
}

#[derive(Default)]
struct Collector {
    // key -> required
    found: BTreeMap<DependencyKey, bool>,
}

impl Collector {
    fn add(
        &mut self,
        kind: DependencyKind,
        name: Option<&str>,
        optional: Option<bool>,
        location: impl FnOnce() -> String,
    ) -> Result<(), ReconcilerError> {
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(ReconcilerError::ExtractionAmbiguity {
                    location: location(),
                    reason: format!("{kind} reference has no name"),
                })
            }
        };

        let required = !optional.unwrap_or(false);
        let entry = self
            .found
            .entry(DependencyKey::new(kind, name))
            .or_insert(false);
        *entry |= required;
        Ok(())
    }

    fn scan_volume(&mut self, volume: &Volume) -> Result<(), ReconcilerError> {
        if let Some(cm) = &volume.config_map {
            self.add(DependencyKind::ConfigMap, Some(&cm.name), cm.optional, || {
                format!("volumes[{}].configMap", volume.name)
            })?;
        }

        if let Some(secret) = &volume.secret {
            self.add(
                DependencyKind::Secret,
                secret.secret_name.as_deref(),
                secret.optional,
                || format!("volumes[{}].secret", volume.name),
            )?;
        }

        if let Some(projected) = &volume.projected {
            for (i, source) in projected.sources.iter().flatten().enumerate() {
                if let Some(cm) = &source.config_map {
                    self.add(DependencyKind::ConfigMap, Some(&cm.name), cm.optional, || {
                        format!("volumes[{}].projected.sources[{i}].configMap", volume.name)
                    })?;
                }
                if let Some(secret) = &source.secret {
                    self.add(DependencyKind::Secret, Some(&secret.name), secret.optional, || {
                        format!("volumes[{}].projected.sources[{i}].secret", volume.name)
                    })?;
                }
            }
        }

        Ok(())
    }

    fn scan_container(&mut self, section: &str, container: &Container) -> Result<(), ReconcilerError> {
        for (i, source) in container.env_from.iter().flatten().enumerate() {
            if let Some(cm) = &source.config_map_ref {
                self.add(DependencyKind::ConfigMap, Some(&cm.name), cm.optional, || {
                    format!("{section}[{}].envFrom[{i}].configMapRef", container.name)
                })?;
            }
            if let Some(secret) = &source.secret_ref {
                self.add(DependencyKind::Secret, Some(&secret.name), secret.optional, || {
                    format!("{section}[{}].envFrom[{i}].secretRef", container.name)
                })?;
            }
        }

        for var in container.env.iter().flatten() {
            let Some(value_from) = &var.value_from else {
                continue;
            };
            if let Some(selector) = &value_from.config_map_key_ref {
                self.add(
                    DependencyKind::ConfigMap,
                    Some(&selector.name),
                    selector.optional,
                    || format!("{section}[{}].env[{}].configMapKeyRef", container.name, var.name),
                )?;
            }
            if let Some(selector) = &value_from.secret_key_ref {
                self.add(
                    DependencyKind::Secret,
                    Some(&selector.name),
                    selector.optional,
                    || format!("{section}[{}].env[{}].secretKeyRef", container.name, var.name),
                )?;
            }
        }

        Ok(())
    }

    fn finish(self) -> Vec<Reference> {
        self.found
            .into_iter()
            .map(|(key, required)| Reference {
                kind: key.kind,
                name: key.name,
                required,
            })
            .collect()
    }
}
