//! Workspace domain model.
//!
//! A workspace is an isolated mutation context (branch plus working copy)
//! for one work item attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::work_item::WorkItemId;

/// Lifecycle of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    /// Being created
    Created,
    /// Checked out and in use
    Active,
    /// Diff landed on trunk, context torn down
    Merged,
    /// Torn down without merging
    Discarded,
}

impl Default for WorkspaceStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Discarded => "discarded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Discarded)
    }
}

/// How a workspace leaves the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceDisposition {
    Merged,
    Discarded,
}

/// An isolated mutation context tied to one work item attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub item_id: WorkItemId,
    pub path: PathBuf,
    pub branch: String,
    /// Trunk tip at acquisition time
    pub base_commit: String,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(
        item_id: WorkItemId,
        path: impl Into<PathBuf>,
        branch: impl Into<String>,
        base_commit: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            item_id,
            path: path.into(),
            branch: branch.into(),
            base_commit: base_commit.into(),
            status: WorkspaceStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// First eight hex characters of the id, used in names.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    pub fn activate(&mut self) {
        self.status = WorkspaceStatus::Active;
        self.updated_at = Utc::now();
    }

    /// Record a successful rebase onto a newer trunk tip.
    pub fn rebased(&mut self, new_base: impl Into<String>) {
        self.base_commit = new_base.into();
        self.updated_at = Utc::now();
    }

    pub fn finish(&mut self, disposition: WorkspaceDisposition) {
        self.status = match disposition {
            WorkspaceDisposition::Merged => WorkspaceStatus::Merged,
            WorkspaceDisposition::Discarded => WorkspaceStatus::Discarded,
        };
        self.updated_at = Utc::now();
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkspaceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_lifecycle() {
        let mut ws = Workspace::new(WorkItemId::from("auth"), "/tmp/ws", "evo/auth", "abc123");
        assert_eq!(ws.status, WorkspaceStatus::Created);

        ws.activate();
        assert!(ws.is_active());

        ws.rebased("def456");
        assert_eq!(ws.base_commit, "def456");

        ws.finish(WorkspaceDisposition::Discarded);
        assert_eq!(ws.status, WorkspaceStatus::Discarded);
        assert!(ws.status.is_terminal());
    }

    #[test]
    fn test_short_id_is_eight_hex_chars() {
        let ws = Workspace::new(WorkItemId::from("x"), "/p", "b", "c");
        let short = ws.short_id();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
