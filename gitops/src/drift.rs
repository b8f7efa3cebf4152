use nopea_defs::{Error, Manifest};
use nopea_store::Cache;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::kube_api::KubeApi;
use crate::SUSPEND_HEAL_ANNOTATION;

/// Server-populated metadata fields that never count toward drift.
const VOLATILE_METADATA: [&str; 6] = [
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "generation",
    "managedFields",
    "selfLink",
];

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Classification of one resource against its three reference points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Drift {
    NoDrift,
    /// Not present in the cluster (or never applied by us): establish it.
    NewResource,
    /// Present in the cluster but we hold no baseline yet: adopt it.
    NeedsApply,
    /// Git moved while the cluster still matches our baseline.
    GitChange { from: String, to: String },
    /// The cluster moved while git still matches our baseline.
    ManualDrift { expected: String, actual: String },
    /// Both git and the cluster moved away from the baseline.
    Conflict {
        last: String,
        desired: String,
        live: String,
    },
}

/// Strips everything the API server mutates so that two copies of the same
/// declared resource hash identically: `status`, volatile metadata, the
/// kubectl bookkeeping annotation, and an annotations map emptied by that
/// removal.
pub fn normalize(manifest: &Value) -> Value {
    let mut normalized = manifest.clone();

    if let Some(root) = normalized.as_object_mut() {
        root.remove("status");
    }
    if let Some(Value::Object(metadata)) = normalized.get_mut("metadata") {
        for field in VOLATILE_METADATA {
            metadata.remove(field);
        }
        let drop_annotations = match metadata.get_mut("annotations") {
            Some(Value::Object(annotations)) => {
                annotations.remove(LAST_APPLIED_ANNOTATION);
                annotations.is_empty()
            }
            _ => false,
        };
        if drop_annotations {
            metadata.remove("annotations");
        }
    }

    normalized
}

// serde_json maps are BTree-backed, so the compact string form already has
// lexicographically ordered keys; hashing it gives a canonical digest
// independent of YAML key order in the source file.
pub fn content_hash(manifest: &Value) -> String {
    let canonical = serde_json::to_string(&normalize(manifest)).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Three-way comparison by content hash. `last_applied` is the baseline we
/// wrote, `desired` is what git declares now, `live` is what the cluster
/// holds now.
pub fn three_way_diff(last_applied: &Value, desired: &Value, live: &Value) -> Drift {
    let last = content_hash(last_applied);
    let desired = content_hash(desired);
    let live = content_hash(live);

    match (desired == last, live == last) {
        (true, true) => Drift::NoDrift,
        (false, true) => Drift::GitChange {
            from: last,
            to: desired,
        },
        (true, false) => Drift::ManualDrift {
            expected: last,
            actual: live,
        },
        (false, false) => Drift::Conflict {
            last,
            desired,
            live,
        },
    }
}

/// Classifies one desired manifest against the cache baseline and the live
/// cluster object. Returns the classification together with the live object
/// so the caller can inspect break-glass annotations without a second GET.
pub async fn check_drift(
    repo: &str,
    desired: &Manifest,
    kube: &dyn KubeApi,
    cache: &Cache,
) -> Result<(Drift, Option<Value>), Error> {
    let key = desired.resource_key();
    let last = cache.get_last_applied(repo, &key);
    let live = kube
        .get(
            desired.api_version(),
            desired.kind(),
            desired.name(),
            desired.namespace().unwrap_or("default"),
        )
        .await?;

    let drift = match (&last, &live) {
        (None, None) => Drift::NewResource,
        (None, Some(_)) => Drift::NeedsApply,
        // Applied before but gone from the cluster: re-establish it.
        (Some(_), None) => Drift::NewResource,
        (Some(last), Some(live)) => three_way_diff(last, &desired.0, live),
    };

    Ok((drift, live))
}

/// True when the live object carries the break-glass annotation with one of
/// the accepted values. Absent object or annotation means healing proceeds.
pub fn healing_suspended(live: Option<&Value>) -> bool {
    let Some(live) = live else {
        return false;
    };
    match live["metadata"]["annotations"][SUSPEND_HEAL_ANNOTATION].as_str() {
        Some("true") | Some("1") | Some("yes") => true,
        _ => false,
    }
}
