pub mod build_attempt;
pub mod config;
pub mod lease;
pub mod orchestration;
pub mod verification;
pub mod work_item;
pub mod workspace;

pub use build_attempt::{
    AgentReport, AgentStatus, AgentTier, AttemptOutcome, BuildAttempt, DiffRef, TestCounts, LADDER,
};
pub use config::{
    AgentTierConfig, BuilderConfig, CommandTierConfig, Config, HardeningCheckConfig,
    HardeningConfig, InferenceConfig, LoggingConfig, OrchestratorConfig, RepositoryConfig,
    ResourceClassConfig, ResourcesConfig, VerificationConfig, VisualTierConfig,
};
pub use lease::{ResourceLease, ResourceNeed, ResourceUtilization};
pub use orchestration::{
    DeliveredItem, DeliveryReport, EngineEvent, EngineState, MergeRecord, Phase, StatusSnapshot,
};
pub use verification::{
    ClassifierVerdict, EvidenceRef, Issue, JudgeVerdict, Severity, TierKind, TierReport,
    VerificationResult, VisualDecision, VisualThresholds,
};
pub use work_item::{
    Complexity, Priority, WorkItem, WorkItemId, WorkItemSpec, WorkItemStatus,
};
pub use workspace::{Workspace, WorkspaceDisposition, WorkspaceStatus};
