//! Work item domain model.
//!
//! Work items are schedulable units of feature work. They form a DAG
//! through their dependency sets, which are fixed at creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::build_attempt::BuildAttempt;

/// Identifier of a work item, as given by the parsed feature list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Feature priority. P0 = must-have, P1 = should-have, P2 = nice-to-have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Default for Priority {
    fn default() -> Self {
        Self::P1
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        }
    }
}

/// Estimated implementation complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Medium
    }
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Status of a work item in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Defined, dependencies not yet done
    Pending,
    /// Eligible for a build ladder
    Ready,
    /// A build ladder or merge is running
    InProgress,
    /// Merged into trunk, verification tiers running
    Verifying,
    /// Merged and verified
    Done,
    /// Ladder or fix cycles exhausted
    Failed,
    /// A dependency failed unrecoverably
    Blocked,
}

impl Default for WorkItemStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkItemStatus {
    pub const ALL: [WorkItemStatus; 7] = [
        Self::Pending,
        Self::Ready,
        Self::InProgress,
        Self::Verifying,
        Self::Done,
        Self::Failed,
        Self::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "in_progress" | "inprogress" => Some(Self::InProgress),
            "verifying" => Some(Self::Verifying),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Terminal for the current run. Failed can still be re-readied on retry approval.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Blocked)
    }

    /// Valid transitions from this status.
    ///
    /// Blocked is reachable from every other status.
    pub fn valid_transitions(&self) -> Vec<WorkItemStatus> {
        match self {
            Self::Pending => vec![Self::Ready, Self::Blocked],
            Self::Ready => vec![Self::InProgress, Self::Blocked],
            Self::InProgress => vec![Self::Verifying, Self::Failed, Self::Ready, Self::Blocked],
            Self::Verifying => vec![Self::Done, Self::Failed, Self::Blocked],
            Self::Done => vec![Self::Blocked],
            Self::Failed => vec![Self::Ready, Self::Blocked],
            Self::Blocked => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// A work item as it arrives from the parsed feature list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemSpec {
    pub id: WorkItemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub dependencies: Vec<WorkItemId>,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Paths, relative to the workspace root, a build must leave behind
    #[serde(default)]
    pub expected_files: Vec<String>,
}

impl WorkItemSpec {
    pub fn new(id: impl Into<WorkItemId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            dependencies: Vec::new(),
            complexity: Complexity::default(),
            acceptance_criteria: Vec::new(),
            expected_files: Vec::new(),
        }
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<WorkItemId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expected_files<I, T>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.expected_files = files.into_iter().map(Into::into).collect();
        self
    }
}

/// A schedulable unit of feature work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    dependencies: BTreeSet<WorkItemId>,
    pub status: WorkItemStatus,
    pub complexity: Complexity,
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub expected_files: Vec<String>,
    /// Every attempt recorded across build and fix ladders
    pub attempts: Vec<BuildAttempt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn from_spec(spec: WorkItemSpec) -> Self {
        let now = Utc::now();
        Self {
            id: spec.id,
            title: spec.title,
            description: spec.description,
            priority: spec.priority,
            dependencies: spec.dependencies.into_iter().collect(),
            status: WorkItemStatus::Pending,
            complexity: spec.complexity,
            acceptance_criteria: spec.acceptance_criteria,
            expected_files: spec.expected_files,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Dependency ids. Fixed at creation.
    pub fn dependencies(&self) -> &BTreeSet<WorkItemId> {
        &self.dependencies
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Render the feature text handed to a build agent.
    pub fn spec_text(&self) -> String {
        let mut lines = vec![format!("# {} ({})", self.title, self.id)];
        lines.push(format!(
            "Priority: {}  Complexity: {}",
            self.priority.as_str(),
            self.complexity.as_str()
        ));
        if !self.description.is_empty() {
            lines.push(String::new());
            lines.push(self.description.clone());
        }
        if !self.dependencies.is_empty() {
            lines.push(String::new());
            lines.push(format!(
                "Builds on: {}",
                self.dependencies
                    .iter()
                    .map(WorkItemId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !self.acceptance_criteria.is_empty() {
            lines.push(String::new());
            lines.push("Acceptance criteria:".to_string());
            for criterion in &self.acceptance_criteria {
                lines.push(format!("- {criterion}"));
            }
        }
        if !self.expected_files.is_empty() {
            lines.push(String::new());
            lines.push(format!("Expected files: {}", self.expected_files.join(", ")));
        }
        lines.join("\n")
    }

    pub(crate) fn set_status(&mut self, status: WorkItemStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
