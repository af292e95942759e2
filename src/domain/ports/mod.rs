//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that infrastructure adapters implement:
//! - VersionControl: branch/worktree, merge and rebase primitives
//! - BuildAgent: external code-generation processes
//! - TestRunner: shell-level test commands
//! - InferenceClient / ModelResidency: local inference service
//! - VerificationTier / VisualClassifier / VisualJudge: verification stages

pub mod build_agent;
pub mod inference;
pub mod test_runner;
pub mod verification;
pub mod version_control;

pub use build_agent::{AgentExit, AgentProcess, AgentRequest, BuildAgent};
pub use inference::{InferenceClient, InferenceRequest, InferenceResponse, ModelResidency};
pub use test_runner::{TestRun, TestRunner};
pub use verification::{VerificationContext, VerificationTier, VisualClassifier, VisualJudge};
pub use version_control::{RebaseOutcome, VersionControl};
