//! Run-level models: phases, status snapshots, events, merge records and the delivery report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::build_attempt::BuildAttempt;
use super::lease::ResourceUtilization;
use super::verification::{Issue, TierKind};
use super::work_item::{WorkItemId, WorkItemStatus};

/// Batch-level phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Building,
    Verifying,
    Hardening,
    Delivering,
    Complete,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Planning
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Verifying => "verifying",
            Self::Hardening => "hardening",
            Self::Delivering => "delivering",
            Self::Complete => "complete",
        }
    }

    pub fn next(&self) -> Option<Phase> {
        match self {
            Self::Planning => Some(Self::Building),
            Self::Building => Some(Self::Verifying),
            Self::Verifying => Some(Self::Hardening),
            Self::Hardening => Some(Self::Delivering),
            Self::Delivering => Some(Self::Complete),
            Self::Complete => None,
        }
    }
}

/// Read-only view of engine progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub counts: BTreeMap<String, usize>,
    pub total_items: usize,
    pub resources: Vec<ResourceUtilization>,
    pub merges: u64,
    pub queued_issues: usize,
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn count(&self, status: WorkItemStatus) -> usize {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// A completed merge, in trunk order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub sequence: u64,
    pub item_id: WorkItemId,
    pub workspace_id: Uuid,
    pub commit: String,
    pub previous_tip: String,
    pub rebased: bool,
    pub merged_at: DateTime<Utc>,
}

/// Progress notifications published while a run proceeds.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PhaseChanged { from: Phase, to: Phase },
    ItemReady { item_id: WorkItemId },
    AttemptRecorded { item_id: WorkItemId, attempt: BuildAttempt },
    Merged { record: MergeRecord },
    TierFinished { item_id: WorkItemId, tier: TierKind, passed: bool, issues: usize },
    ItemDone { item_id: WorkItemId },
    ItemFailed { item_id: WorkItemId, reason: String },
    ItemsBlocked { cause: WorkItemId, blocked: Vec<WorkItemId> },
}

/// Per-item section of the delivery report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredItem {
    pub id: WorkItemId,
    pub title: String,
    pub status: WorkItemStatus,
    pub attempts: Vec<BuildAttempt>,
}

/// Final, machine-readable account of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub run_id: Uuid,
    pub delivered: Vec<WorkItemId>,
    pub failed: Vec<WorkItemId>,
    pub blocked: Vec<WorkItemId>,
    pub items: Vec<DeliveredItem>,
    pub merges: Vec<MergeRecord>,
    pub queued_issues: Vec<Issue>,
    pub recorded_issues: Vec<Issue>,
    pub hardening_issues: Vec<Issue>,
    pub trunk_commit: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Item progress persisted after every item settles, read back by `run --resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub items: Vec<DeliveredItem>,
    pub merges: Vec<MergeRecord>,
    pub saved_at: DateTime<Utc>,
}

impl EngineState {
    /// Ids of items that were delivered.
    pub fn done_items(&self) -> impl Iterator<Item = &DeliveredItem> + '_ {
        self.items
            .iter()
            .filter(|item| item.status == WorkItemStatus::Done)
    }
}

impl DeliveryReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}
