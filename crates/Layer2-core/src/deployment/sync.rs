//! Code sync collaborator
//!
//! Populates a deployment's code directory from its repository.

use async_trait::async_trait;
use berth_foundation::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

#[async_trait]
pub trait CodeSync: Send + Sync {
    fn name(&self) -> &str;

    /// Bring `dest` to the tip of `branch`
    async fn sync(&self, repository: &str, branch: &str, dest: &Path) -> Result<()>;
}

/// Shallow git checkout through the `git` CLI
#[derive(Debug, Default)]
pub struct GitSync;

impl GitSync {
    pub fn new() -> Self {
        Self
    }

    fn clone_args(repository: &str, branch: &str, dest: &Path) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--branch".to_string(),
            branch.to_string(),
            repository.to_string(),
            dest.to_string_lossy().to_string(),
        ]
    }

    fn fetch_args(branch: &str) -> Vec<String> {
        vec![
            "fetch".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "origin".to_string(),
            format!("{}:refs/remotes/origin/{}", branch, branch),
        ]
    }

    fn reset_args(branch: &str) -> Vec<String> {
        vec![
            "reset".to_string(),
            "--hard".to_string(),
            format!("origin/{}", branch),
        ]
    }

    /// Run a git command
    async fn run_git(args: &[String], cwd: Option<&Path>) -> Result<()> {
        debug!(?args, "Running git");
        let mut command = tokio::process::Command::new("git");
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = command
            .output()
            .await
            .map_err(|e| Error::Sync(format!("Failed to run git: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Sync(format!(
                "git {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl CodeSync for GitSync {
    fn name(&self) -> &str {
        "git"
    }

    async fn sync(&self, repository: &str, branch: &str, dest: &Path) -> Result<()> {
        if dest.join(".git").exists() {
            info!(repository, branch, dest = %dest.display(), "Updating checkout");
            Self::run_git(&Self::fetch_args(branch), Some(dest)).await?;
            Self::run_git(&Self::reset_args(branch), Some(dest)).await
        } else {
            info!(repository, branch, dest = %dest.display(), "Cloning repository");
            // git refuses to clone into a non-empty directory
            if dest.exists() {
                tokio::fs::remove_dir_all(dest).await?;
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Self::run_git(&Self::clone_args(repository, branch, dest), None).await
        }
    }
}

/// Leaves the code directory as it is
#[derive(Debug, Default)]
pub struct NoopSync;

#[async_trait]
impl CodeSync for NoopSync {
    fn name(&self) -> &str {
        "noop"
    }

    async fn sync(&self, repository: &str, branch: &str, dest: &Path) -> Result<()> {
        debug!(repository, branch, dest = %dest.display(), "Skipping code sync");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_args() {
        let clone = GitSync::clone_args("https://example.com/a.git", "main", Path::new("/tmp/code"));
        assert_eq!(
            clone,
            vec![
                "clone",
                "--depth",
                "1",
                "--branch",
                "main",
                "https://example.com/a.git",
                "/tmp/code"
            ]
        );
        assert_eq!(
            GitSync::fetch_args("dev"),
            vec!["fetch", "--depth", "1", "origin", "dev:refs/remotes/origin/dev"]
        );
        assert_eq!(GitSync::reset_args("dev"), vec!["reset", "--hard", "origin/dev"]);
    }

    #[tokio::test]
    async fn test_noop_sync() {
        let sync = NoopSync;
        sync.sync("repo", "main", Path::new("/nonexistent"))
            .await
            .unwrap();
        assert_eq!(sync.name(), "noop");
    }
}
