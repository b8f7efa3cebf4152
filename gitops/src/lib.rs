mod applier;
mod drift;
mod git;
mod kube_api;

pub use applier::{apply_manifests, apply_single, parse_manifests, resolved, resource_key};
pub use drift::{check_drift, content_hash, healing_suspended, normalize, three_way_diff, Drift};
pub use git::{CliGit, GitSource, SyncedHead};
pub use kube_api::{DynamicKube, KubeApi};

/// Break-glass annotation honored on live objects.
pub const SUSPEND_HEAL_ANNOTATION: &str = "nopea.io/suspend-heal";

/// Field manager recorded by server-side applies.
pub const FIELD_MANAGER: &str = "nopea";
