use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info};
use nopea_defs::Error;
use nopea_utils::get_epoch_ms;
use tokio::process::Command;
use walkdir::WalkDir;

/// Result of bringing a clone up to date with its remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncedHead {
    pub sha: String,
    /// False when this sync had to create the clone from scratch.
    pub fetched: bool,
    pub elapsed_ms: u64,
}

/// The Git collaborator. One implementation shells out to the `git` binary;
/// tests substitute their own.
#[async_trait]
pub trait GitSource: Send + Sync {
    /// Clone or fetch `url`/`branch` into `dir` and return the new HEAD.
    async fn sync(&self, url: &str, branch: &str, dir: &Path) -> Result<SyncedHead, Error>;

    /// HEAD of `branch` on the remote, without touching the clone.
    async fn remote_head(&self, url: &str, branch: &str) -> Result<Option<String>, Error>;

    /// YAML files under `dir` (optionally restricted to `subpath`),
    /// relative to `dir`.
    async fn files(&self, dir: &Path, subpath: Option<&str>) -> Result<Vec<PathBuf>, Error>;

    /// File content as base64.
    async fn read_blob(&self, dir: &Path, path: &Path) -> Result<String, Error>;
}

/// Runs `git` as a subprocess.
pub struct CliGit;

async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String, Error> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!("running git {}", args.join(" "));

    let output = cmd
        .output()
        .await
        .map_err(|e| Error::git(format!("failed to spawn git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::git(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl GitSource for CliGit {
    async fn sync(&self, url: &str, branch: &str, dir: &Path) -> Result<SyncedHead, Error> {
        let started = get_epoch_ms();
        let fetched = dir.join(".git").is_dir();

        if fetched {
            run_git(&["fetch", "origin", branch], Some(dir)).await?;
            run_git(
                &["reset", "--hard", &format!("origin/{}", branch)],
                Some(dir),
            )
            .await?;
        } else {
            if let Some(parent) = dir.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::git(format!("failed to create clone dir: {}", e)))?;
            }
            let dir_str = dir.to_string_lossy().to_string();
            run_git(&["clone", "--branch", branch, url, &dir_str], None).await?;
            info!("cloned {} ({}) into {}", url, branch, dir_str);
        }

        let sha = run_git(&["rev-parse", "HEAD"], Some(dir)).await?;
        Ok(SyncedHead {
            sha,
            fetched,
            elapsed_ms: get_epoch_ms().saturating_sub(started),
        })
    }

    async fn remote_head(&self, url: &str, branch: &str) -> Result<Option<String>, Error> {
        let listing = run_git(&["ls-remote", url, &format!("refs/heads/{}", branch)], None).await?;
        Ok(listing
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .map(|sha| sha.to_string()))
    }

    async fn files(&self, dir: &Path, subpath: Option<&str>) -> Result<Vec<PathBuf>, Error> {
        let root = match subpath {
            Some(sub) => dir.join(sub),
            None => dir.to_path_buf(),
        };
        if !root.is_dir() {
            return Err(Error::git(format!(
                "path {} does not exist in the clone",
                root.display()
            )));
        }

        let mut found = vec![];
        for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
        {
            let entry =
                entry.map_err(|e| Error::git(format!("failed to walk clone: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match entry.path().extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => {
                    // Paths are reported relative to the clone root.
                    let relative = entry
                        .path()
                        .strip_prefix(dir)
                        .unwrap_or(entry.path())
                        .to_path_buf();
                    found.push(relative);
                }
                _ => {}
            }
        }
        found.sort();
        Ok(found)
    }

    async fn read_blob(&self, dir: &Path, path: &Path) -> Result<String, Error> {
        let bytes = tokio::fs::read(dir.join(path))
            .await
            .map_err(|e| Error::git(format!("failed to read {}: {}", path.display(), e)))?;
        Ok(BASE64.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_files_lists_yaml_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::create_dir_all(dir.join("deploy/nested")).unwrap();
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        std::fs::write(dir.join("deploy/app.yaml"), "kind: Deployment").unwrap();
        std::fs::write(dir.join("deploy/nested/svc.yml"), "kind: Service").unwrap();
        std::fs::write(dir.join("deploy/README.md"), "docs").unwrap();
        std::fs::write(dir.join(".git/config.yaml"), "not a manifest").unwrap();

        let listed = CliGit.files(dir, None).await.unwrap();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("deploy/app.yaml"),
                PathBuf::from("deploy/nested/svc.yml"),
            ]
        );
    }

    #[tokio::test]
    async fn test_files_honors_subpath() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::create_dir_all(dir.join("deploy")).unwrap();
        std::fs::create_dir_all(dir.join("docs")).unwrap();
        std::fs::write(dir.join("deploy/app.yaml"), "kind: Deployment").unwrap();
        std::fs::write(dir.join("docs/other.yaml"), "kind: Other").unwrap();

        let listed = CliGit.files(dir, Some("deploy")).await.unwrap();
        assert_eq!(listed, vec![PathBuf::from("deploy/app.yaml")]);
    }

    #[tokio::test]
    async fn test_files_missing_subpath_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = CliGit.files(tmp.path(), Some("missing")).await;
        assert!(matches!(result, Err(Error::Git { .. })));
    }

    #[tokio::test]
    async fn test_read_blob_returns_base64() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.yaml"), "kind: ConfigMap").unwrap();

        let blob = CliGit
            .read_blob(tmp.path(), Path::new("app.yaml"))
            .await
            .unwrap();
        assert_eq!(BASE64.decode(blob).unwrap(), b"kind: ConfigMap");
    }
}
