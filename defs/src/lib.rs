mod config;
mod crd;
mod errors;
mod event;
mod manifest;
mod repo;

pub use config::Config;
pub use crd::{
    GitRepository, GitRepositoryCondition, GitRepositorySpec, GitRepositoryStatus, Phase,
    CONDITION_PROGRESSING, CONDITION_READY, NOPEA_API_GROUP, NOPEA_API_VERSION,
};
pub use errors::{Error, WebhookDenial};
pub use event::{
    CdEvent, EVENT_ENVIRONMENT_CREATED, EVENT_ENVIRONMENT_MODIFIED, EVENT_SERVICE_DEPLOYED,
    EVENT_SERVICE_REMOVED, EVENT_SERVICE_UPGRADED,
};
pub use manifest::{is_cluster_scoped, Manifest};
pub use repo::{HealPolicy, RepoSpec, SyncState, SyncStatus, DEFAULT_POLL_INTERVAL_MS};
