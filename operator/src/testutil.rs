//! Inert collaborator doubles shared by the unit tests of this crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use nopea_defs::Error;
use nopea_events::Emitter;
use nopea_gitops::{GitSource, KubeApi, SyncedHead};
use nopea_store::Cache;
use nopea_utils::UlidGen;
use serde_json::Value;

use crate::metrics::Metrics;
use crate::worker::WorkerDeps;

pub struct NullGit;

#[async_trait]
impl GitSource for NullGit {
    async fn sync(&self, _url: &str, _branch: &str, _dir: &Path) -> Result<SyncedHead, Error> {
        Err(Error::git("offline"))
    }

    async fn remote_head(&self, _url: &str, _branch: &str) -> Result<Option<String>, Error> {
        Ok(None)
    }

    async fn files(&self, _dir: &Path, _subpath: Option<&str>) -> Result<Vec<PathBuf>, Error> {
        Ok(vec![])
    }

    async fn read_blob(&self, _dir: &Path, _path: &Path) -> Result<String, Error> {
        Err(Error::git("offline"))
    }
}

pub struct NullKube;

#[async_trait]
impl KubeApi for NullKube {
    async fn get(
        &self,
        _api_version: &str,
        _kind: &str,
        _name: &str,
        _namespace: &str,
    ) -> Result<Option<Value>, Error> {
        Ok(None)
    }

    async fn apply(&self, _manifest: &Value) -> Result<(), Error> {
        Ok(())
    }

    async fn delete(
        &self,
        _api_version: &str,
        _kind: &str,
        _name: &str,
        _namespace: &str,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn patch_status(
        &self,
        _api_version: &str,
        _kind: &str,
        _name: &str,
        _namespace: &str,
        _status: Value,
    ) -> Result<(), Error> {
        Ok(())
    }
}

pub fn null_deps() -> WorkerDeps {
    WorkerDeps {
        git: Arc::new(NullGit),
        kube: Arc::new(NullKube),
        cache: Arc::new(Cache::new()),
        emitter: Emitter::disabled(),
        metrics: Arc::new(Metrics::new()),
        ids: Arc::new(UlidGen::new()),
        repo_base: PathBuf::from("/tmp/nopea-test"),
    }
}
