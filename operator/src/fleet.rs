use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use log::{error, info};
use nopea_defs::{Error, RepoSpec};
use thiserror::Error as ThisError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::worker::{Worker, WorkerDeps, WorkerMsg, MAILBOX_CAPACITY, SYNC_NOW_TIMEOUT};

#[derive(ThisError, Debug, PartialEq, Eq)]
pub enum FleetError {
    #[error("a worker with this name is already running")]
    AlreadyStarted,

    #[error("no worker with this name")]
    NotFound,
}

struct WorkerEntry {
    spec: RepoSpec,
    tx: mpsc::Sender<WorkerMsg>,
    task: JoinHandle<()>,
}

/// Lightweight handle to one running worker, safe to hand to the webhook
/// endpoint.
#[derive(Clone)]
pub struct WorkerRef {
    pub spec: RepoSpec,
    tx: mpsc::Sender<WorkerMsg>,
}

impl WorkerRef {
    /// Asynchronous out-of-band nudge; the HTTP response never waits for
    /// the sync itself.
    pub async fn notify_webhook(&self, commit: String) -> bool {
        self.tx.send(WorkerMsg::Webhook(commit)).await.is_ok()
    }

    /// Blocking sync. Observes every previously enqueued trigger; gives up
    /// after five minutes without aborting the in-flight sync. Entry point
    /// for operator tooling; nothing in-process calls it.
    #[allow(dead_code)]
    pub async fn sync_now(&self) -> Result<String, Error> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(WorkerMsg::SyncNow(reply))
            .await
            .map_err(|_| Error::config("worker is shutting down"))?;
        match tokio::time::timeout(SYNC_NOW_TIMEOUT, done).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::config("worker dropped the request")),
            Err(_) => Err(Error::config("sync_now timed out after 5 minutes")),
        }
    }
}

/// Owns the lifecycle of all repository workers: unique-name registry,
/// one-for-one restarts, retirement cleanup.
pub struct Fleet {
    deps: WorkerDeps,
    workers: Mutex<HashMap<String, WorkerEntry>>,
}

impl Fleet {
    pub fn new(deps: WorkerDeps) -> Arc<Self> {
        Arc::new(Fleet {
            deps,
            workers: Mutex::new(HashMap::new()),
        })
    }

    pub fn start_worker(&self, spec: RepoSpec) -> Result<(), FleetError> {
        let mut workers = self.workers.lock().unwrap();
        if workers.contains_key(&spec.name) {
            return Err(FleetError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let task = tokio::spawn(supervise(spec.clone(), self.deps.clone(), rx));
        workers.insert(
            spec.name.clone(),
            WorkerEntry {
                spec,
                tx,
                task,
            },
        );
        self.deps.metrics.workers_active.set(workers.len() as i64);
        Ok(())
    }

    pub async fn stop_worker(&self, name: &str) -> Result<(), FleetError> {
        let entry = {
            let mut workers = self.workers.lock().unwrap();
            let entry = workers.remove(name).ok_or(FleetError::NotFound)?;
            self.deps.metrics.workers_active.set(workers.len() as i64);
            entry
        };

        info!("stopping worker {}", name);
        if entry.tx.send(WorkerMsg::Stop).await.is_err() {
            // Mailbox already gone; make sure the task is too.
            entry.task.abort();
        }

        // Let any in-flight sync finish naturally, then release everything
        // the worker owned so a successor starts from a clean slate.
        let _ = entry.task.await;
        self.deps.cache.clear_repo(name);
        Ok(())
    }

    pub fn get_worker(&self, name: &str) -> Option<WorkerRef> {
        self.workers.lock().unwrap().get(name).map(|entry| WorkerRef {
            spec: entry.spec.clone(),
            tx: entry.tx.clone(),
        })
    }

    pub fn list_workers(&self) -> Vec<(String, RepoSpec)> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.spec.clone()))
            .collect()
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.workers.lock().unwrap().keys().cloned().collect();
        for name in names {
            let _ = self.stop_worker(&name).await;
        }
    }
}

/// One-for-one restart wrapper. A panic inside the worker is caught here,
/// counted, and answered with a fresh worker that re-runs its startup sync;
/// the mailbox survives the restart.
async fn supervise(spec: RepoSpec, deps: WorkerDeps, mut rx: mpsc::Receiver<WorkerMsg>) {
    loop {
        let mut worker = Worker::new(spec.clone(), deps.clone());
        match AssertUnwindSafe(worker.run(&mut rx)).catch_unwind().await {
            Ok(()) => break,
            Err(_) => {
                error!("worker {} crashed; restarting", spec.name);
                deps.metrics
                    .worker_restarts_total
                    .with_label_values(&[&spec.name])
                    .inc();
            }
        }
    }
}
