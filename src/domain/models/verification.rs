//! Verification tiers, issues and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::work_item::WorkItemId;

/// Verification tiers in gate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Unit,
    Integration,
    Visual,
    Sweep,
}

impl TierKind {
    pub const ORDER: [TierKind; 4] = [Self::Unit, Self::Integration, Self::Visual, Self::Sweep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::Visual => "visual",
            Self::Sweep => "sweep",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity. Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Some(Self::Critical),
            "high" | "major" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" | "minor" => Some(Self::Low),
            _ => None,
        }
    }

    /// Critical and High issues go back to the builder.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

/// A problem found by a verification tier or hardening check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub description: String,
    /// Originating tier or check name
    pub tier: String,
    pub retry_count: u32,
}

impl Issue {
    pub fn new(severity: Severity, tier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            tier: tier.into(),
            retry_count: 0,
        }
    }
}

/// Opaque pointer to supporting material (screenshot, log).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub kind: String,
    pub location: String,
}

impl EvidenceRef {
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location: location.into(),
        }
    }
}

/// What a tier reports back to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierReport {
    pub issues: Vec<Issue>,
    pub evidence: Vec<EvidenceRef>,
}

impl TierReport {
    pub fn passed() -> Self {
        Self::default()
    }

    /// A tier passes iff it raised nothing blocking.
    pub fn is_passing(&self) -> bool {
        !self.issues.iter().any(|i| i.severity.is_blocking())
    }
}

/// One tier's result for one work item in one verification cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub id: Uuid,
    pub item_id: WorkItemId,
    pub tier: TierKind,
    pub passed: bool,
    pub issues: Vec<Issue>,
    pub evidence: Vec<EvidenceRef>,
    pub cycle: u32,
    pub trunk_commit: String,
    pub recorded_at: DateTime<Utc>,
}

/// Three-way split of the visual fast pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualDecision {
    Accept,
    Reject,
    Escalate,
}

/// Confidence bounds for the visual fast pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualThresholds {
    /// Scores strictly above this are accepted
    pub accept_above: f64,
    /// Scores strictly below this are rejected
    pub reject_below: f64,
}

impl Default for VisualThresholds {
    fn default() -> Self {
        Self {
            accept_above: 0.8,
            reject_below: 0.5,
        }
    }
}

impl VisualThresholds {
    pub fn decide(&self, confidence: f64) -> VisualDecision {
        if confidence > self.accept_above {
            VisualDecision::Accept
        } else if confidence < self.reject_below {
            VisualDecision::Reject
        } else {
            VisualDecision::Escalate
        }
    }
}

/// Fast classifier output for one screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub confidence: f64,
    pub issues: Vec<String>,
}

/// Judge output for one escalated screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub passed: bool,
    pub issues: Vec<String>,
}
