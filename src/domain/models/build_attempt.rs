//! Build attempt records and the agent report they are classified from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which agent tier ran an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    Primary,
    Fallback,
}

impl AgentTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Fixed escalation ladder: primary, primary with failure context, fallback.
pub const LADDER: [AgentTier; 3] = [AgentTier::Primary, AgentTier::Primary, AgentTier::Fallback];

/// Terminal classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Partial,
    Failed,
    TimedOut,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Status an agent declares in its machine-readable summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Partial,
    Failed,
}

impl AgentStatus {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "success" | "succeeded" | "ok" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" | "failure" | "error" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn outcome(self) -> AttemptOutcome {
        match self {
            Self::Success => AttemptOutcome::Success,
            Self::Partial => AttemptOutcome::Partial,
            Self::Failed => AttemptOutcome::Failed,
        }
    }
}

/// Pass/fail counts from a test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
}

impl TestCounts {
    pub fn total(&self) -> u32 {
        self.passed + self.failed
    }
}

/// Machine-readable summary produced by a build agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub status: AgentStatus,
    pub files_touched: Vec<String>,
    pub tests: Option<TestCounts>,
    pub summary: String,
}

/// Reference to the diff an attempt produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRef {
    pub base: String,
    pub head: String,
    pub files_changed: Vec<String>,
}

/// One recorded build attempt. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildAttempt {
    pub workspace_id: Uuid,
    pub tier: AgentTier,
    /// 1-based position within its ladder run
    pub number: u32,
    /// 0 for the initial build, n for fix cycle n
    pub cycle: u32,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub diff: Option<DiffRef>,
    pub summary: String,
    pub local_tests: Option<TestCounts>,
    /// Files the agent says it touched
    #[serde(default)]
    pub reported_files: Vec<String>,
    /// Test counts the agent says it observed
    #[serde(default)]
    pub reported_tests: Option<TestCounts>,
    /// Post-build review findings that downgraded the attempt
    #[serde(default)]
    pub review_findings: Vec<String>,
}

impl BuildAttempt {
    pub fn duration_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}
