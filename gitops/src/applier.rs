use std::collections::HashSet;

use log::debug;
use nopea_defs::{Error, Manifest};
use serde::Deserialize;
use serde_json::Value;

use crate::kube_api::KubeApi;

/// Parses a multi-document YAML file into manifests. Empty documents are
/// discarded; every kept document must carry `apiVersion`, `kind` and
/// `metadata.name`; duplicate resource-keys fail the whole parse.
pub fn parse_manifests(text: &str) -> Result<Vec<Manifest>, Error> {
    let mut manifests = vec![];
    let mut seen_keys = HashSet::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(document)
            .map_err(|e| Error::parse(format!("document {}: {}", index + 1, e)))?;
        if value.is_null() {
            continue;
        }

        let manifest = Manifest(value);
        for (field, present) in [
            ("apiVersion", !manifest.api_version().is_empty()),
            ("kind", !manifest.kind().is_empty()),
            ("metadata.name", !manifest.name().is_empty()),
        ] {
            if !present {
                return Err(Error::parse(format!(
                    "document {} is missing {}",
                    index + 1,
                    field
                )));
            }
        }

        let key = manifest.resource_key();
        if !seen_keys.insert(key.clone()) {
            return Err(Error::parse(format!("duplicate resource key: {}", key)));
        }
        manifests.push(manifest);
    }

    Ok(manifests)
}

pub fn resource_key(manifest: &Manifest) -> String {
    manifest.resource_key()
}

/// The manifest as it will actually be applied: namespaced resources are
/// moved into the target namespace when one is configured. Workers use the
/// same resolution when caching baselines and checking drift, so the cached
/// form always matches the cluster object.
pub fn resolved(manifest: &Manifest, target_namespace: Option<&str>) -> Manifest {
    let mut resolved = manifest.clone();
    if let Some(namespace) = target_namespace {
        if resolved.is_namespaced() {
            resolved.set_namespace(namespace);
        }
    }
    resolved
}

pub async fn apply_single(
    kube: &dyn KubeApi,
    manifest: &Manifest,
    target_namespace: Option<&str>,
) -> Result<(), Error> {
    let prepared = resolved(manifest, target_namespace);
    debug!("applying {}", prepared.resource_key());
    kube.apply(&prepared.0).await
}

/// Applies manifests in input order. The first failure aborts and reports
/// how many had already succeeded.
pub async fn apply_manifests(
    kube: &dyn KubeApi,
    manifests: &[Manifest],
    target_namespace: Option<&str>,
) -> Result<usize, Error> {
    let mut applied = 0;
    for manifest in manifests {
        if let Err(e) = apply_single(kube, manifest, target_namespace).await {
            return Err(Error::Apply {
                message: format!("{} failed: {}", manifest.resource_key(), e),
                applied,
            });
        }
        applied += 1;
    }
    Ok(applied)
}
