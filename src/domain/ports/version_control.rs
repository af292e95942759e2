//! Version control port.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::errors::DomainResult;

/// Result of rebasing a workspace onto the current trunk tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Rebased cleanly; carries the new base commit.
    Clean { new_base: String },
    /// Rebase stopped on conflicts and was aborted.
    Conflict { files: Vec<String> },
}

/// The primitives the workspace allocator and merge coordinator need.
///
/// Any backend exposing these suffices.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Current trunk tip commit. A snapshot read.
    async fn trunk_tip(&self) -> DomainResult<String>;

    /// Create `branch` at `base` with a working copy at `path`.
    async fn create_branch(&self, branch: &str, path: &Path, base: &str) -> DomainResult<()>;

    /// Commit everything in the working copy. Returns the head commit.
    async fn commit_all(&self, path: &Path, message: &str) -> DomainResult<String>;

    /// Files changed in the working copy relative to `base`.
    async fn diff(&self, path: &Path, base: &str) -> DomainResult<Vec<String>>;

    /// Rebase the working copy's branch onto the trunk tip.
    async fn rebase(&self, path: &Path) -> DomainResult<RebaseOutcome>;

    /// Merge `branch` into trunk. Returns the new trunk tip.
    async fn merge(&self, branch: &str, message: &str) -> DomainResult<String>;

    /// Remove the working copy at `path` and delete `branch`.
    async fn delete_branch(&self, branch: &str, path: &Path) -> DomainResult<()>;

    /// Check out `commit` detached at `path` for read-only use.
    async fn checkout_snapshot(&self, commit: &str, path: &Path) -> DomainResult<()>;

    /// Remove a snapshot checkout.
    async fn remove_snapshot(&self, path: &Path) -> DomainResult<()>;
}
