use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, error, info, warn};
use nopea_defs::{
    CdEvent, Error, Manifest, RepoSpec, SyncState, SyncStatus, NOPEA_API_GROUP, NOPEA_API_VERSION,
};
use nopea_events::Emitter;
use nopea_gitops::{
    apply_manifests, apply_single, check_drift, content_hash, normalize, parse_manifests,
    resolved, Drift, GitSource, KubeApi,
};
use nopea_store::Cache;
use nopea_utils::{get_epoch_ms, get_timestamp, sanitize_repo_dir, UlidGen};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::heal::heal_action;
use crate::metrics::Metrics;
use crate::status;

pub const MAILBOX_CAPACITY: usize = 16;
pub const SYNC_NOW_TIMEOUT: Duration = Duration::from_secs(300);

/// Triggers delivered through a worker's mailbox. Processed strictly in
/// arrival order; timers feed the same handlers.
pub enum WorkerMsg {
    Poll,
    Reconcile,
    Webhook(String),
    SyncNow(oneshot::Sender<Result<String, Error>>),
    Stop,
}

/// Collaborators shared by every worker of the fleet.
#[derive(Clone)]
pub struct WorkerDeps {
    pub git: Arc<dyn GitSource>,
    pub kube: Arc<dyn KubeApi>,
    pub cache: Arc<Cache>,
    pub emitter: Emitter,
    pub metrics: Arc<Metrics>,
    pub ids: Arc<UlidGen>,
    pub repo_base: PathBuf,
}

/// One long-running task per declared repository. Owns its clone directory
/// and all of its own state; the outside world only talks to it through the
/// mailbox.
pub struct Worker {
    spec: RepoSpec,
    deps: WorkerDeps,
    clone_dir: PathBuf,
    last_commit: Option<String>,
    last_sync_time: Option<String>,
    status: SyncStatus,
    /// Resolved manifests from the last successfully parsed tree; what
    /// reconcile re-applies.
    desired: Vec<Manifest>,
    reconcile_armed: bool,
}

impl Worker {
    pub fn new(spec: RepoSpec, deps: WorkerDeps) -> Self {
        let clone_dir = deps.repo_base.join(sanitize_repo_dir(&spec.name));
        Worker {
            spec,
            deps,
            clone_dir,
            last_commit: None,
            last_sync_time: None,
            status: SyncStatus::Initializing,
            desired: vec![],
            reconcile_armed: false,
        }
    }

    pub async fn run(&mut self, rx: &mut mpsc::Receiver<WorkerMsg>) {
        info!("worker {} starting", self.spec.name);

        if self.spec.suspend {
            info!("worker {} is suspended; triggers are no-ops", self.spec.name);
        } else {
            // Startup sync. A failure arms poll only; reconcile starts after
            // the first success.
            let _ = self.sync().await;
        }

        let mut poll = tokio::time::interval(Duration::from_millis(self.spec.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;
        let mut reconcile =
            tokio::time::interval(Duration::from_millis(self.spec.reconcile_interval_ms()));
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reconcile.tick().await;

        loop {
            let proceed = tokio::select! {
                _ = poll.tick() => self.handle(WorkerMsg::Poll).await,
                _ = reconcile.tick(), if self.reconcile_armed => {
                    self.handle(WorkerMsg::Reconcile).await
                }
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => false,
                },
            };
            if !proceed {
                break;
            }
        }

        info!(
            "worker {} stopped (status {}, last sync {})",
            self.spec.name,
            self.status.as_str(),
            self.last_sync_time.as_deref().unwrap_or("never")
        );
    }

    /// Returns false when the worker should shut down.
    async fn handle(&mut self, msg: WorkerMsg) -> bool {
        match msg {
            WorkerMsg::Poll => {
                if !self.spec.suspend {
                    self.handle_poll().await;
                }
            }
            WorkerMsg::Reconcile => {
                if !self.spec.suspend {
                    self.handle_reconcile().await;
                }
            }
            WorkerMsg::Webhook(commit) => {
                if !self.spec.suspend {
                    info!("worker {} syncing on webhook for {}", self.spec.name, commit);
                    let _ = self.sync().await;
                }
            }
            WorkerMsg::SyncNow(reply) => {
                let result = if self.spec.suspend {
                    Err(Error::config("repository is suspended"))
                } else {
                    self.sync().await
                };
                let _ = reply.send(result);
            }
            WorkerMsg::Stop => return false,
        }
        true
    }

    async fn handle_poll(&mut self) {
        match self
            .deps
            .git
            .remote_head(&self.spec.url, &self.spec.branch)
            .await
        {
            Ok(Some(head)) if Some(&head) != self.last_commit.as_ref() => {
                info!(
                    "worker {} saw new head {} (was {:?})",
                    self.spec.name, head, self.last_commit
                );
                let _ = self.sync().await;
            }
            Ok(_) => debug!("worker {} poll: no change", self.spec.name),
            Err(e) => {
                warn!("worker {} poll failed: {}", self.spec.name, e);
                self.deps
                    .metrics
                    .sync_error_total
                    .with_label_values(&[&self.spec.name, e.wire_name()])
                    .inc();
            }
        }
    }

    /// One full sync: clone/fetch, parse, apply, record, report. Serialized
    /// with every other trigger by the mailbox loop.
    async fn sync(&mut self) -> Result<String, Error> {
        let started = get_epoch_ms();
        self.status = SyncStatus::Syncing;
        self.patch_status(status::syncing_status()).await;

        match self.run_sync().await {
            Ok((sha, manifest_count)) => {
                let now = get_timestamp();
                let duration_ms = get_epoch_ms().saturating_sub(started);
                let previous = self.last_commit.replace(sha.clone());
                self.last_sync_time = Some(now.clone());
                self.status = SyncStatus::Synced;
                self.reconcile_armed = true;

                self.deps.cache.put_commit(&self.spec.name, &sha);
                self.deps.cache.put_sync_state(
                    &self.spec.name,
                    SyncState {
                        last_sync: now.clone(),
                        last_commit: sha.clone(),
                        status: SyncStatus::Synced,
                    },
                );

                self.deps
                    .metrics
                    .sync_total
                    .with_label_values(&[&self.spec.name, "success"])
                    .inc();
                self.deps
                    .metrics
                    .sync_duration
                    .with_label_values(&[&self.spec.name])
                    .observe(duration_ms as f64 / 1000.0);

                let event = match &previous {
                    None => CdEvent::service_deployed(
                        self.deps.ids.next(),
                        now.clone(),
                        &self.spec.name,
                        &sha,
                        &self.spec.target_namespace,
                        manifest_count,
                        duration_ms,
                    ),
                    Some(previous_commit) => CdEvent::service_upgraded(
                        self.deps.ids.next(),
                        now.clone(),
                        &self.spec.name,
                        &sha,
                        &self.spec.target_namespace,
                        manifest_count,
                        duration_ms,
                        previous_commit,
                    ),
                };
                self.deps.emitter.emit(event);

                self.patch_status(status::synced_status(&sha, &now, manifest_count))
                    .await;
                info!(
                    "worker {} synced {} ({} manifests in {}ms)",
                    self.spec.name, sha, manifest_count, duration_ms
                );
                Ok(sha)
            }
            Err(e) => {
                let duration_ms = get_epoch_ms().saturating_sub(started);
                self.deps
                    .metrics
                    .sync_duration
                    .with_label_values(&[&self.spec.name])
                    .observe(duration_ms as f64 / 1000.0);
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    async fn run_sync(&mut self) -> Result<(String, usize), Error> {
        let head = self
            .deps
            .git
            .sync(&self.spec.url, &self.spec.branch, &self.clone_dir)
            .await?;
        let git_histogram = if head.fetched {
            &self.deps.metrics.git_fetch_duration
        } else {
            &self.deps.metrics.git_clone_duration
        };
        git_histogram
            .with_label_values(&[&self.spec.name])
            .observe(head.elapsed_ms as f64 / 1000.0);

        let files = self
            .deps
            .git
            .files(&self.clone_dir, self.spec.subpath.as_deref())
            .await?;

        // Parse every file before touching the cluster; any failure fails
        // the whole sync with all offending files named.
        let mut manifests = vec![];
        let mut seen_keys = HashSet::new();
        let mut failures: Vec<String> = vec![];
        for file in &files {
            let text = match self.read_file(file).await {
                Ok(text) => text,
                Err(e) => {
                    failures.push(format!("{}: {}", file.display(), e));
                    continue;
                }
            };
            match parse_manifests(&text) {
                Ok(parsed) => {
                    for manifest in parsed {
                        let prepared = resolved(&manifest, Some(&self.spec.target_namespace));
                        let key = prepared.resource_key();
                        if !seen_keys.insert(key.clone()) {
                            failures
                                .push(format!("{}: duplicate resource key {}", file.display(), key));
                        } else {
                            manifests.push(prepared);
                        }
                    }
                }
                Err(e) => failures.push(format!("{}: {}", file.display(), e)),
            }
        }
        if !failures.is_empty() {
            return Err(Error::parse(failures.join("; ")));
        }

        let count = apply_manifests(
            self.deps.kube.as_ref(),
            &manifests,
            Some(&self.spec.target_namespace),
        )
        .await?;

        for manifest in &manifests {
            let key = manifest.resource_key();
            self.deps
                .cache
                .put_last_applied(&self.spec.name, &key, normalize(&manifest.0));
            self.deps
                .cache
                .put_resource_hash(&self.spec.name, &key, &content_hash(&manifest.0));
        }
        self.desired = manifests;

        Ok((head.sha, count))
    }

    async fn read_file(&self, file: &std::path::Path) -> Result<String, Error> {
        let blob = self.deps.git.read_blob(&self.clone_dir, file).await?;
        let bytes = BASE64
            .decode(blob)
            .map_err(|e| Error::parse(format!("invalid base64 blob: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| Error::parse(format!("not utf-8: {}", e)))
    }

    /// Recoverable failure: record it, report it, keep running. The next
    /// poll or reconcile tick is the retry.
    async fn fail(&mut self, error: &Error) {
        self.status = SyncStatus::Failed;
        error!("sync failed for {}: {}", self.spec.name, error);

        self.deps
            .metrics
            .sync_total
            .with_label_values(&[&self.spec.name, "failure"])
            .inc();
        self.deps
            .metrics
            .sync_error_total
            .with_label_values(&[&self.spec.name, error.wire_name()])
            .inc();

        self.deps.cache.put_sync_state(
            &self.spec.name,
            SyncState {
                last_sync: get_timestamp(),
                last_commit: self.last_commit.clone().unwrap_or_default(),
                status: SyncStatus::Failed,
            },
        );

        let event = CdEvent::sync_failed(
            self.deps.ids.next(),
            get_timestamp(),
            &self.spec.name,
            self.last_commit.as_deref().unwrap_or("unknown"),
            &self.spec.target_namespace,
            error.to_event_value(),
        );
        self.deps.emitter.emit(event);

        self.patch_status(status::failed_status(error, self.last_commit.as_deref()))
            .await;
    }

    /// Re-applies the last cloned tree, gated per resource by the drift
    /// classification and the healing matrix.
    async fn handle_reconcile(&mut self) {
        if self.desired.is_empty() {
            debug!("worker {} reconcile: no tree yet", self.spec.name);
            return;
        }

        let desired = self.desired.clone();
        for manifest in &desired {
            let key = manifest.resource_key();
            let (drift, live) = match check_drift(
                &self.spec.name,
                manifest,
                self.deps.kube.as_ref(),
                &self.deps.cache,
            )
            .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!("drift check for {} failed: {}", key, e);
                    self.deps
                        .metrics
                        .sync_error_total
                        .with_label_values(&[&self.spec.name, e.wire_name()])
                        .inc();
                    continue;
                }
            };

            if matches!(
                drift,
                Drift::GitChange { .. } | Drift::ManualDrift { .. } | Drift::Conflict { .. }
            ) {
                self.deps
                    .metrics
                    .drift_detected_total
                    .with_label_values(&[&self.spec.name, &key])
                    .inc();
            }

            let should_apply = heal_action(
                &self.deps.cache,
                &self.spec.name,
                &key,
                self.spec.heal_policy,
                self.spec.heal_grace_ms(),
                &drift,
                live.as_ref(),
                get_epoch_ms(),
            );
            if !should_apply {
                continue;
            }

            match apply_single(self.deps.kube.as_ref(), manifest, None).await {
                Ok(()) => {
                    self.deps
                        .cache
                        .put_last_applied(&self.spec.name, &key, normalize(&manifest.0));
                    self.deps.cache.put_resource_hash(
                        &self.spec.name,
                        &key,
                        &content_hash(&manifest.0),
                    );
                    self.deps.cache.clear_drift_first_seen(&self.spec.name, &key);
                    if matches!(drift, Drift::ManualDrift { .. } | Drift::Conflict { .. }) {
                        info!("worker {} healed drift on {}", self.spec.name, key);
                        self.deps
                            .metrics
                            .drift_healed_total
                            .with_label_values(&[&self.spec.name, &key])
                            .inc();
                    }
                }
                Err(e) => {
                    warn!("reconcile apply of {} failed: {}", key, e);
                    self.deps
                        .metrics
                        .sync_error_total
                        .with_label_values(&[&self.spec.name, "apply_error"])
                        .inc();
                }
            }
        }
    }

    async fn patch_status(&self, patch: Value) {
        let api_version = format!("{}/{}", NOPEA_API_GROUP, NOPEA_API_VERSION);
        if let Err(e) = self
            .deps
            .kube
            .patch_status(
                &api_version,
                "GitRepository",
                &self.spec.name,
                &self.spec.namespace,
                patch,
            )
            .await
        {
            // The cluster state converges anyway; a stale status is not
            // worth failing a sync over.
            warn!("failed to patch status for {}: {}", self.spec.name, e);
        }
    }
}
