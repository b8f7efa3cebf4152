use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300_000;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealPolicy {
    Auto,
    Manual,
    Notify,
}

impl HealPolicy {
    /// Lenient parser used when reading the CRD spec; unknown values fall
    /// back to `Auto`.
    pub fn parse(s: &str) -> Self {
        match s {
            "manual" => HealPolicy::Manual,
            "notify" => HealPolicy::Notify,
            _ => HealPolicy::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealPolicy::Auto => "auto",
            HealPolicy::Manual => "manual",
            HealPolicy::Notify => "notify",
        }
    }
}

/// Worker configuration for one declared repository, produced by the
/// controller from a GitRepository resource.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RepoSpec {
    pub name: String,
    pub namespace: String,
    pub url: String,
    pub branch: String,
    pub subpath: Option<String>,
    pub target_namespace: String,
    pub poll_interval_ms: u64,
    pub heal_policy: HealPolicy,
    pub heal_grace_period_ms: Option<u64>,
    pub suspend: bool,
}

impl RepoSpec {
    pub fn new(name: &str, namespace: &str, url: &str) -> Self {
        RepoSpec {
            name: name.to_string(),
            namespace: namespace.to_string(),
            url: url.to_string(),
            branch: "main".to_string(),
            subpath: None,
            target_namespace: namespace.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            heal_policy: HealPolicy::Auto,
            heal_grace_period_ms: None,
            suspend: false,
        }
    }

    pub fn reconcile_interval_ms(&self) -> u64 {
        self.poll_interval_ms * 2
    }

    pub fn heal_grace_ms(&self) -> u64 {
        self.heal_grace_period_ms.unwrap_or(0)
    }

    /// True when the change between two specs requires the worker to be
    /// restarted. Every field except the identity (`name`, `namespace`) is
    /// significant: they all feed the worker's timers, clone layout or
    /// healing behavior.
    pub fn requires_restart(&self, other: &RepoSpec) -> bool {
        self.url != other.url
            || self.branch != other.branch
            || self.subpath != other.subpath
            || self.target_namespace != other.target_namespace
            || self.poll_interval_ms != other.poll_interval_ms
            || self.heal_policy != other.heal_policy
            || self.heal_grace_period_ms != other.heal_grace_period_ms
            || self.suspend != other.suspend
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Initializing,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Initializing => "initializing",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Cache record summarizing the last sync of a repository.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SyncState {
    pub last_sync: String,
    pub last_commit: String,
    pub status: SyncStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_heal_policy_parse() {
        assert_eq!(HealPolicy::parse("auto"), HealPolicy::Auto);
        assert_eq!(HealPolicy::parse("manual"), HealPolicy::Manual);
        assert_eq!(HealPolicy::parse("notify"), HealPolicy::Notify);
        assert_eq!(HealPolicy::parse("something-else"), HealPolicy::Auto);
    }

    #[test]
    fn test_spec_defaults() {
        let spec = RepoSpec::new("my-app", "team-a", "https://git.example.com/my-app.git");
        assert_eq!(spec.branch, "main");
        assert_eq!(spec.target_namespace, "team-a");
        assert_eq!(spec.poll_interval_ms, 300_000);
        assert_eq!(spec.reconcile_interval_ms(), 600_000);
        assert_eq!(spec.heal_grace_ms(), 0);
        assert!(!spec.suspend);
    }

    #[test]
    fn test_requires_restart() {
        let spec = RepoSpec::new("my-app", "team-a", "https://git.example.com/my-app.git");
        let same = spec.clone();
        assert!(!spec.requires_restart(&same));

        let mut changed = spec.clone();
        changed.branch = "develop".to_string();
        assert!(spec.requires_restart(&changed));

        let mut changed = spec.clone();
        changed.suspend = true;
        assert!(spec.requires_restart(&changed));
    }
}
