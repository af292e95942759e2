//! Workspace Allocator
//!
//! Creates and tears down isolated workspaces (branch plus working copy) per
//! work item attempt. At most one workspace per item is Active at a time.
//!
//! # Naming Convention
//!
//! - Branch: `<prefix>/<slug>-<short_id>` (e.g., `evo/user-auth-a1b2c3d4`)
//! - Path: `<workspace_root>/<slug>-<short_id>`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RepositoryConfig, WorkItemId, Workspace, WorkspaceDisposition};
use crate::domain::ports::VersionControl;

/// Workspace layout settings.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub workspace_root: PathBuf,
    pub branch_prefix: String,
}

impl From<&RepositoryConfig> for AllocatorConfig {
    fn from(repo: &RepositoryConfig) -> Self {
        Self {
            workspace_root: repo.workspace_root(),
            branch_prefix: repo.branch_prefix.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    active: HashMap<WorkItemId, Workspace>,
    released: Vec<Workspace>,
}

/// Hands out workspaces branched from the trunk tip at acquisition time.
pub struct WorkspaceAllocator {
    vcs: Arc<dyn VersionControl>,
    config: AllocatorConfig,
    // Held across creation and teardown: both touch the shared VCS root.
    state: Mutex<AllocatorState>,
}

impl WorkspaceAllocator {
    pub fn new(vcs: Arc<dyn VersionControl>, config: AllocatorConfig) -> Self {
        Self {
            vcs,
            config,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Acquire an Active workspace for `item_id`.
    ///
    /// Fails with `WorkspaceConflict` if the item already has one.
    #[instrument(skip(self), fields(item = %item_id))]
    pub async fn acquire(&self, item_id: &WorkItemId) -> DomainResult<Workspace> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.active.get(item_id) {
            warn!(workspace = %existing.id, "refusing second active workspace");
            return Err(DomainError::WorkspaceConflict {
                item: item_id.clone(),
                workspace: existing.id,
            });
        }

        let slug = sanitize_name(item_id.as_str())?;
        let base = self.vcs.trunk_tip().await?;

        let mut workspace = Workspace::new(item_id.clone(), PathBuf::new(), String::new(), base);
        let name = format!("{}-{}", slug, workspace.short_id());
        workspace.branch = format!("{}/{}", self.config.branch_prefix, name);
        workspace.path = self.config.workspace_root.join(&name);
        validate_branch_name(&workspace.branch)?;

        self.vcs
            .create_branch(&workspace.branch, &workspace.path, &workspace.base_commit)
            .await?;
        workspace.activate();

        info!(
            workspace = %workspace.id,
            branch = %workspace.branch,
            base = %workspace.base_commit,
            "workspace acquired"
        );

        state.active.insert(item_id.clone(), workspace.clone());
        Ok(workspace)
    }

    /// Tear down a workspace and record how it ended.
    #[instrument(skip(self, workspace), fields(item = %workspace.item_id, workspace = %workspace.id, ?disposition))]
    pub async fn release(
        &self,
        workspace: &Workspace,
        disposition: WorkspaceDisposition,
    ) -> DomainResult<Workspace> {
        let mut state = self.state.lock().await;

        let mut current = match state.active.get(&workspace.item_id) {
            Some(active) if active.id == workspace.id => active.clone(),
            _ => return Err(DomainError::UnknownWorkspace(workspace.id)),
        };

        let teardown = self.vcs.delete_branch(&current.branch, &current.path).await;
        // The slot is freed even if teardown fails so the item can be retried.
        state.active.remove(&workspace.item_id);
        current.finish(disposition);
        state.released.push(current.clone());

        match teardown {
            Ok(()) => info!("workspace released"),
            Err(ref e) => warn!(error = %e, "workspace teardown failed"),
        }
        teardown.map(|()| current)
    }

    /// Record a rebase performed by the merge coordinator.
    pub async fn update_base(&self, workspace_id: Uuid, new_base: &str) -> DomainResult<()> {
        let mut state = self.state.lock().await;
        let ws = state
            .active
            .values_mut()
            .find(|w| w.id == workspace_id)
            .ok_or(DomainError::UnknownWorkspace(workspace_id))?;
        ws.rebased(new_base);
        Ok(())
    }

    pub async fn active_for(&self, item_id: &WorkItemId) -> Option<Workspace> {
        self.state.lock().await.active.get(item_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    /// Released workspaces, oldest first.
    pub async fn history(&self) -> Vec<Workspace> {
        self.state.lock().await.released.clone()
    }
}

/// Turn an item id into a filesystem- and ref-safe slug.
///
/// Characters outside `[A-Za-z0-9_-]` become `-`, runs of `-` collapse,
/// leading and trailing `-` are trimmed.
pub fn sanitize_name(raw: &str) -> DomainResult<String> {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            ch
        } else {
            '-'
        };
        if mapped == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(mapped);
    }

    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        return Err(DomainError::ValidationFailed(format!(
            "work item id '{raw}' has no usable characters for a workspace name"
        )));
    }
    Ok(slug)
}

/// Validates a git branch name to prevent command injection.
///
/// Rejects names that could be interpreted as git flags or otherwise subvert
/// git command execution. Follows `git check-ref-format` rules.
pub fn validate_branch_name(name: &str) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::ValidationFailed(
            "Branch name cannot be empty".to_string(),
        ));
    }
    if name.starts_with('-') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': must not start with '-'"
        )));
    }
    if name.contains("..") {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': must not contain '..'"
        )));
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': contains disallowed character '{ch}'"
        )));
    }
    if name.ends_with(".lock") || name.ends_with('/') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': bad suffix"
        )));
    }
    Ok(())
}
