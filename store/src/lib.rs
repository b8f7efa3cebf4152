//! In-memory store shared by all workers. Five namespaces, each behind its
//! own read-write lock so a slow reader of one namespace never blocks
//! writers of another. All operations are total; lookups return `Option`.

use std::collections::HashMap;
use std::sync::RwLock;

use nopea_defs::SyncState;
use serde_json::Value;

#[derive(Default)]
pub struct Cache {
    commits: RwLock<HashMap<String, String>>,
    resource_hashes: RwLock<HashMap<(String, String), String>>,
    last_applied: RwLock<HashMap<(String, String), Value>>,
    sync_states: RwLock<HashMap<String, SyncState>>,
    drift_first_seen: RwLock<HashMap<(String, String), u64>>,
}

impl Cache {
    pub fn new() -> Self {
        Cache::default()
    }

    /// Startup-race probe: the tables exist as soon as the struct does.
    pub fn available(&self) -> bool {
        !self.commits.is_poisoned()
    }

    // Commits

    pub fn put_commit(&self, repo: &str, sha: &str) {
        self.commits
            .write()
            .unwrap()
            .insert(repo.to_string(), sha.to_string());
    }

    pub fn get_commit(&self, repo: &str) -> Option<String> {
        self.commits.read().unwrap().get(repo).cloned()
    }

    pub fn delete_commit(&self, repo: &str) {
        self.commits.write().unwrap().remove(repo);
    }

    // Resource content hashes

    pub fn put_resource_hash(&self, repo: &str, key: &str, hash: &str) {
        self.resource_hashes
            .write()
            .unwrap()
            .insert((repo.to_string(), key.to_string()), hash.to_string());
    }

    pub fn get_resource_hash(&self, repo: &str, key: &str) -> Option<String> {
        self.resource_hashes
            .read()
            .unwrap()
            .get(&(repo.to_string(), key.to_string()))
            .cloned()
    }

    pub fn list_resource_hashes(&self, repo: &str) -> Vec<(String, String)> {
        self.resource_hashes
            .read()
            .unwrap()
            .iter()
            .filter(|((r, _), _)| r == repo)
            .map(|((_, key), hash)| (key.clone(), hash.clone()))
            .collect()
    }

    pub fn clear_resource_hashes(&self, repo: &str) {
        self.resource_hashes
            .write()
            .unwrap()
            .retain(|(r, _), _| r != repo);
    }

    // Last-applied manifests

    pub fn put_last_applied(&self, repo: &str, key: &str, manifest: Value) {
        self.last_applied
            .write()
            .unwrap()
            .insert((repo.to_string(), key.to_string()), manifest);
    }

    pub fn get_last_applied(&self, repo: &str, key: &str) -> Option<Value> {
        self.last_applied
            .read()
            .unwrap()
            .get(&(repo.to_string(), key.to_string()))
            .cloned()
    }

    pub fn list_last_applied(&self, repo: &str) -> Vec<(String, Value)> {
        self.last_applied
            .read()
            .unwrap()
            .iter()
            .filter(|((r, _), _)| r == repo)
            .map(|((_, key), manifest)| (key.clone(), manifest.clone()))
            .collect()
    }

    pub fn delete_last_applied(&self, repo: &str, key: &str) {
        self.last_applied
            .write()
            .unwrap()
            .remove(&(repo.to_string(), key.to_string()));
    }

    pub fn clear_last_applied(&self, repo: &str) {
        self.last_applied
            .write()
            .unwrap()
            .retain(|(r, _), _| r != repo);
    }

    // Sync state

    pub fn put_sync_state(&self, repo: &str, state: SyncState) {
        self.sync_states
            .write()
            .unwrap()
            .insert(repo.to_string(), state);
    }

    pub fn get_sync_state(&self, repo: &str) -> Option<SyncState> {
        self.sync_states.read().unwrap().get(repo).cloned()
    }

    // Drift grace-period tracking

    /// Records when drift was first observed for a resource. Idempotent:
    /// a second call for the same key returns the original timestamp.
    pub fn record_drift_first_seen(&self, repo: &str, key: &str, now_ms: u64) -> u64 {
        *self
            .drift_first_seen
            .write()
            .unwrap()
            .entry((repo.to_string(), key.to_string()))
            .or_insert(now_ms)
    }

    pub fn get_drift_first_seen(&self, repo: &str, key: &str) -> Option<u64> {
        self.drift_first_seen
            .read()
            .unwrap()
            .get(&(repo.to_string(), key.to_string()))
            .copied()
    }

    pub fn clear_drift_first_seen(&self, repo: &str, key: &str) {
        self.drift_first_seen
            .write()
            .unwrap()
            .remove(&(repo.to_string(), key.to_string()));
    }

    /// Drops everything a retired worker owned.
    pub fn clear_repo(&self, repo: &str) {
        self.delete_commit(repo);
        self.clear_resource_hashes(repo);
        self.clear_last_applied(repo);
        self.sync_states.write().unwrap().remove(repo);
        self.drift_first_seen
            .write()
            .unwrap()
            .retain(|(r, _), _| r != repo);
    }
}
