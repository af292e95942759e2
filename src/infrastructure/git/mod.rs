//! Git adapter for the version control port.
//!
//! Workspaces are git worktrees sharing the trunk repository's refs, so a
//! workspace rebase sees the current trunk tip without fetching.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::RepositoryConfig;
use crate::domain::ports::{RebaseOutcome, VersionControl};

/// Identity for commits and merges the engine creates itself.
const IDENTITY: [&str; 4] = [
    "-c",
    "user.name=evochamber",
    "-c",
    "user.email=evochamber@localhost",
];

/// `VersionControl` backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    trunk: String,
}

impl GitCli {
    pub fn new(root: impl Into<PathBuf>, trunk: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            trunk: trunk.into(),
        }
    }

    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(&config.root, &config.trunk_branch)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> DomainResult<String> {
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::VersionControl(format!("Failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::VersionControl(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Best-effort command whose failure is only logged.
    async fn git_quiet(&self, dir: &Path, args: &[&str]) {
        if let Err(e) = self.git(dir, args).await {
            debug!(error = %e, "ignored git failure");
        }
    }

    async fn ensure_parent(path: &Path) -> DomainResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Absolute form of `path`; git runs with the repository root as cwd.
fn path_arg(path: &Path) -> DomainResult<String> {
    let absolute = std::path::absolute(path)?;
    absolute.to_str().map(str::to_string).ok_or_else(|| {
        DomainError::VersionControl(format!("path is not valid UTF-8: {}", path.display()))
    })
}

fn lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl VersionControl for GitCli {
    async fn trunk_tip(&self) -> DomainResult<String> {
        self.git(&self.root, &["rev-parse", &format!("refs/heads/{}", self.trunk)])
            .await
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_branch(&self, branch: &str, path: &Path, base: &str) -> DomainResult<()> {
        Self::ensure_parent(path).await?;
        self.git(
            &self.root,
            &["worktree", "add", "-b", branch, &path_arg(path)?, base],
        )
        .await?;
        Ok(())
    }

    async fn commit_all(&self, path: &Path, message: &str) -> DomainResult<String> {
        self.git(path, &["add", "-A"]).await?;
        let pending = self.git(path, &["status", "--porcelain"]).await?;
        if !pending.is_empty() {
            let mut args: Vec<&str> = IDENTITY.to_vec();
            args.extend(["commit", "-q", "-m", message]);
            self.git(path, &args).await?;
        }
        self.git(path, &["rev-parse", "HEAD"]).await
    }

    async fn diff(&self, path: &Path, base: &str) -> DomainResult<Vec<String>> {
        let out = self.git(path, &["diff", "--name-only", base, "HEAD"]).await?;
        Ok(lines(&out))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn rebase(&self, path: &Path) -> DomainResult<RebaseOutcome> {
        let mut args: Vec<&str> = IDENTITY.to_vec();
        args.extend(["rebase", self.trunk.as_str()]);

        match self.git(path, &args).await {
            Ok(_) => Ok(RebaseOutcome::Clean {
                new_base: self.trunk_tip().await?,
            }),
            Err(e) => {
                let conflicted = self
                    .git(path, &["diff", "--name-only", "--diff-filter=U"])
                    .await
                    .map(|out| lines(&out))
                    .unwrap_or_default();
                self.git_quiet(path, &["rebase", "--abort"]).await;
                warn!(error = %e, conflicts = conflicted.len(), "rebase aborted");
                Ok(RebaseOutcome::Conflict { files: conflicted })
            }
        }
    }

    #[instrument(skip(self, message))]
    async fn merge(&self, branch: &str, message: &str) -> DomainResult<String> {
        self.git(&self.root, &["checkout", "-q", self.trunk.as_str()])
            .await?;

        let mut args: Vec<&str> = IDENTITY.to_vec();
        args.extend(["merge", "--no-ff", "-m", message, "--", branch]);
        if let Err(e) = self.git(&self.root, &args).await {
            self.git_quiet(&self.root, &["merge", "--abort"]).await;
            return Err(e);
        }

        self.git(&self.root, &["rev-parse", "HEAD"]).await
    }

    async fn delete_branch(&self, branch: &str, path: &Path) -> DomainResult<()> {
        if path.exists() {
            self.git(&self.root, &["worktree", "remove", "--force", &path_arg(path)?])
                .await?;
        }
        self.git_quiet(&self.root, &["worktree", "prune"]).await;
        self.git(&self.root, &["branch", "-D", branch]).await?;
        Ok(())
    }

    async fn checkout_snapshot(&self, commit: &str, path: &Path) -> DomainResult<()> {
        Self::ensure_parent(path).await?;
        self.git(
            &self.root,
            &["worktree", "add", "--detach", &path_arg(path)?, commit],
        )
        .await?;
        Ok(())
    }

    async fn remove_snapshot(&self, path: &Path) -> DomainResult<()> {
        if path.exists() {
            self.git(&self.root, &["worktree", "remove", "--force", &path_arg(path)?])
                .await?;
        }
        self.git_quiet(&self.root, &["worktree", "prune"]).await;
        Ok(())
    }
}
