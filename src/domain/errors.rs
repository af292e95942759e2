//! Domain errors for the build-verify engine.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::WorkItemId;

/// Format a cycle path as a human-readable string: `A -> B -> A`.
fn format_cycle_path(path: &[WorkItemId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Domain-level errors raised by the engine and its collaborators.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Unknown work item: {0}")]
    UnknownItem(WorkItemId),

    #[error("Duplicate work item id: {0}")]
    DuplicateItem(WorkItemId),

    #[error("Invalid transition for {item} from {from} to {to}: {reason}")]
    InvalidTransition {
        item: WorkItemId,
        from: String,
        to: String,
        reason: String,
    },

    #[error("Cyclic dependency detected: {}", format_cycle_path(.0))]
    CyclicDependency(Vec<WorkItemId>),

    #[error("Work item {item} already has active workspace {workspace}")]
    WorkspaceConflict { item: WorkItemId, workspace: Uuid },

    #[error("Unknown workspace: {0}")]
    UnknownWorkspace(Uuid),

    #[error("Stale base for {item}: workspace base {base} behind trunk {tip} ({reason})")]
    StaleBase {
        item: WorkItemId,
        base: String,
        tip: String,
        reason: String,
    },

    #[error("Unknown resource class: {0}")]
    UnknownResourceClass(String),

    #[error("Lease of {units} units exceeds capacity {capacity} of class {class}")]
    LeaseExceedsCapacity {
        class: String,
        units: u32,
        capacity: u32,
    },

    #[error("Resource class {class} could not grant {units} units within {waited_ms}ms")]
    ResourceUnavailableTimeout {
        class: String,
        units: u32,
        waited_ms: u64,
    },

    #[error("Unknown lease: {0}")]
    UnknownLease(Uuid),

    #[error("Agent on {tier} tier timed out after {timeout_secs}s")]
    AgentTimeout { tier: String, timeout_secs: u64 },

    #[error("Agent protocol error: {0}")]
    AgentProtocol(String),

    #[error("Version control error: {0}")]
    VersionControl(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}
