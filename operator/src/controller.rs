use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams, ResourceExt};
use kube::runtime::watcher;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use log::{error, info, warn};
use nopea_defs::{Config, Error, GitRepository, HealPolicy, RepoSpec, DEFAULT_POLL_INTERVAL_MS};
use nopea_utils::{parse_duration_ms, parse_interval_ms};
use serde_json::json;

use crate::fleet::Fleet;
use crate::metrics::Metrics;

const LEASE_NAME: &str = "nopea-controller-lock";
const LEASE_TTL: Duration = Duration::from_secs(25);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(10);
const FOLLOWER_RETRY: Duration = Duration::from_secs(15);

/// Turns one declared GitRepository into a worker configuration.
pub fn parse_repo_spec(resource: &GitRepository) -> Result<RepoSpec, Error> {
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());
    let spec = &resource.spec;

    if spec.url.is_empty() {
        return Err(Error::config(format!("{}: spec.url must not be empty", name)));
    }

    Ok(RepoSpec {
        name,
        namespace: namespace.clone(),
        url: spec.url.clone(),
        branch: spec
            .branch
            .clone()
            .filter(|branch| !branch.is_empty())
            .unwrap_or_else(|| "main".to_string()),
        subpath: spec.path.clone().filter(|path| !path.is_empty()),
        target_namespace: spec
            .target_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(namespace),
        poll_interval_ms: spec
            .interval
            .as_deref()
            .map(parse_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        heal_policy: spec
            .heal_policy
            .as_deref()
            .map(HealPolicy::parse)
            .unwrap_or(HealPolicy::Auto),
        heal_grace_period_ms: spec
            .heal_grace_period
            .as_deref()
            .and_then(parse_duration_ms),
        suspend: spec.suspend.unwrap_or(false),
    })
}

/// Watches the declared set and keeps the fleet congruent with it.
pub struct Controller {
    client: kube::Client,
    fleet: Arc<Fleet>,
    config: Config,
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        client: kube::Client,
        fleet: Arc<Fleet>,
        config: Config,
        metrics: Arc<Metrics>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Controller {
            client,
            fleet,
            config,
            metrics,
            ready,
        }
    }

    pub async fn run(&self) {
        if self.config.leader_election {
            self.run_with_lease().await;
        } else {
            self.watch_with_restarts().await;
        }
    }

    fn repository_api(&self) -> Api<GitRepository> {
        if self.config.watch_namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.config.watch_namespace)
        }
    }

    /// Self-healing watch: a dropped stream is re-established with capped
    /// exponential backoff.
    async fn watch_with_restarts(&self) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                info!("restarting GitRepository watch (attempt #{})", attempt);
            }
            match self.watch_once().await {
                Ok(()) => {
                    info!("GitRepository watch terminated");
                    break;
                }
                Err(e) => {
                    self.ready.store(false, Ordering::SeqCst);
                    let backoff = std::cmp::min(2u64.pow(attempt.min(6)), 60);
                    error!("GitRepository watch failed: {}; retrying in {}s", e, backoff);
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
            }
        }
    }

    async fn watch_once(&self) -> anyhow::Result<()> {
        let api = self.repository_api();
        let mut stream = watcher(api, watcher::Config::default()).boxed();
        let mut declared = HashSet::new();

        while let Some(event) = stream.next().await {
            match event? {
                watcher::Event::Init => {
                    declared.clear();
                }
                watcher::Event::InitApply(resource) => {
                    declared.insert(resource.name_any());
                    self.upsert(&resource).await;
                }
                watcher::Event::InitDone => {
                    // The watch is authoritative again: retire workers whose
                    // declaration disappeared while we were not looking.
                    for (name, _) in self.fleet.list_workers() {
                        if !declared.contains(&name) {
                            info!("retiring undeclared worker {}", name);
                            let _ = self.fleet.stop_worker(&name).await;
                        }
                    }
                    self.ready.store(true, Ordering::SeqCst);
                }
                watcher::Event::Apply(resource) => {
                    self.upsert(&resource).await;
                }
                watcher::Event::Delete(resource) => {
                    let name = resource.name_any();
                    info!("GitRepository {} deleted", name);
                    let _ = self.fleet.stop_worker(&name).await;
                }
            }
        }

        Ok(())
    }

    async fn upsert(&self, resource: &GitRepository) {
        let spec = match parse_repo_spec(resource) {
            Ok(spec) => spec,
            Err(e) => {
                error!("ignoring invalid GitRepository: {}", e);
                return;
            }
        };

        match self.fleet.get_worker(&spec.name) {
            None => {
                info!("starting worker {} for {}", spec.name, spec.url);
                if let Err(e) = self.fleet.start_worker(spec.clone()) {
                    error!("failed to start worker {}: {}", spec.name, e);
                    return;
                }
            }
            Some(running) if running.spec.requires_restart(&spec) => {
                info!("respawning worker {} after spec change", spec.name);
                let _ = self.fleet.stop_worker(&spec.name).await;
                if let Err(e) = self.fleet.start_worker(spec.clone()) {
                    error!("failed to restart worker {}: {}", spec.name, e);
                    return;
                }
            }
            Some(_) => {}
        }

        self.record_observed_generation(resource).await;
    }

    async fn record_observed_generation(&self, resource: &GitRepository) {
        let Some(generation) = resource.metadata.generation else {
            return;
        };
        let Some(namespace) = resource.namespace() else {
            return;
        };
        let api: Api<GitRepository> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({"status": crate::status::observed_generation_status(generation)});
        if let Err(e) = api
            .patch_status(
                &resource.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
        {
            warn!(
                "failed to record observedGeneration for {}: {}",
                resource.name_any(),
                e
            );
        }
    }

    /// With leader election on, only the lease holder watches and spawns
    /// workers. Acquisition performs a full resync (the watch replays the
    /// declared set); losing the lease stops every worker.
    async fn run_with_lease(&self) {
        let lease_namespace = if self.config.watch_namespace.is_empty() {
            "default".to_string()
        } else {
            self.config.watch_namespace.clone()
        };
        let leadership = LeaseLock::new(
            self.client.clone(),
            &lease_namespace,
            LeaseLockParams {
                holder_id: self.config.pod_name.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        );
        let pod = self.config.pod_name.clone();

        loop {
            let lease = match leadership.try_acquire_or_renew().await {
                Ok(lease) => lease,
                Err(e) => {
                    warn!("lease check failed: {}", e);
                    tokio::time::sleep(FOLLOWER_RETRY).await;
                    continue;
                }
            };

            if !lease.acquired_lease {
                self.ready.store(false, Ordering::SeqCst);
                self.metrics.leader_status.with_label_values(&[&pod]).set(0);
                tokio::time::sleep(FOLLOWER_RETRY).await;
                continue;
            }

            info!("leadership acquired by {}", pod);
            self.metrics
                .leader_transitions_total
                .with_label_values(&[&pod])
                .inc();
            self.metrics.leader_status.with_label_values(&[&pod]).set(1);

            tokio::select! {
                _ = self.watch_with_restarts() => {}
                _ = renew_until_lost(&leadership) => {}
            }

            warn!("leadership lost by {}; stopping all workers", pod);
            self.metrics.leader_status.with_label_values(&[&pod]).set(0);
            self.ready.store(false, Ordering::SeqCst);
            self.fleet.stop_all().await;
        }
    }
}

async fn renew_until_lost(leadership: &LeaseLock) {
    let mut interval = tokio::time::interval(LEASE_RENEW_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        match leadership.try_acquire_or_renew().await {
            Ok(lease) if lease.acquired_lease => {}
            Ok(_) => break,
            Err(e) => {
                error!("lost leadership due to error: {:?}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nopea_defs::GitRepositorySpec;
    use pretty_assertions::assert_eq;

    fn repository(spec: GitRepositorySpec) -> GitRepository {
        let mut resource = GitRepository::new("my-app", spec);
        resource.metadata.namespace = Some("team-a".to_string());
        resource
    }

    fn minimal_spec() -> GitRepositorySpec {
        GitRepositorySpec {
            url: "https://git.example.com/my-app.git".to_string(),
            branch: None,
            path: None,
            target_namespace: None,
            interval: None,
            heal_policy: None,
            heal_grace_period: None,
            suspend: None,
        }
    }

    #[test]
    fn test_parse_defaults() {
        let parsed = parse_repo_spec(&repository(minimal_spec())).unwrap();
        assert_eq!(parsed.name, "my-app");
        assert_eq!(parsed.namespace, "team-a");
        assert_eq!(parsed.branch, "main");
        assert_eq!(parsed.subpath, None);
        assert_eq!(parsed.target_namespace, "team-a");
        assert_eq!(parsed.poll_interval_ms, 300_000);
        assert_eq!(parsed.heal_policy, HealPolicy::Auto);
        assert_eq!(parsed.heal_grace_period_ms, None);
        assert!(!parsed.suspend);
    }

    #[test]
    fn test_parse_five_minute_interval() {
        let mut spec = minimal_spec();
        spec.interval = Some("5m".to_string());
        let parsed = parse_repo_spec(&repository(spec)).unwrap();
        assert_eq!(parsed.poll_interval_ms, 300_000);
        assert_eq!(parsed.reconcile_interval_ms(), 600_000);
    }

    #[test]
    fn test_parse_bad_interval_falls_back() {
        let mut spec = minimal_spec();
        spec.interval = Some("soon".to_string());
        let parsed = parse_repo_spec(&repository(spec)).unwrap();
        assert_eq!(parsed.poll_interval_ms, 300_000);
    }

    #[test]
    fn test_parse_full_spec() {
        let spec = GitRepositorySpec {
            url: "https://git.example.com/my-app.git".to_string(),
            branch: Some("develop".to_string()),
            path: Some("deploy/".to_string()),
            target_namespace: Some("prod".to_string()),
            interval: Some("30s".to_string()),
            heal_policy: Some("manual".to_string()),
            heal_grace_period: Some("1m".to_string()),
            suspend: Some(true),
        };
        let parsed = parse_repo_spec(&repository(spec)).unwrap();
        assert_eq!(parsed.branch, "develop");
        assert_eq!(parsed.subpath.as_deref(), Some("deploy/"));
        assert_eq!(parsed.target_namespace, "prod");
        assert_eq!(parsed.poll_interval_ms, 30_000);
        assert_eq!(parsed.heal_policy, HealPolicy::Manual);
        assert_eq!(parsed.heal_grace_period_ms, Some(60_000));
        assert!(parsed.suspend);
    }

    #[test]
    fn test_parse_rejects_empty_url() {
        let mut spec = minimal_spec();
        spec.url = String::new();
        let err = parse_repo_spec(&repository(spec)).unwrap_err();
        assert_eq!(err.wire_name(), "config_error");
    }
}
