pub mod agent_output;
pub mod build_review;
pub mod builder_supervisor;
pub mod hardening;
pub mod merge_coordinator;
pub mod orchestrator;
pub mod resource_scheduler;
pub mod verification_pipeline;
pub mod verification_tiers;
pub mod work_item_graph;
pub mod workspace_allocator;

pub use agent_output::{extract_json_object, parse_agent_output};
pub use build_review::{review_workspace, BuildReview};
pub use builder_supervisor::{AttemptPlan, BuilderSupervisor, LadderOutcome, SupervisorConfig};
pub use hardening::HardeningService;
pub use merge_coordinator::MergeCoordinator;
pub use orchestrator::{EngineComponents, EngineSettings, Orchestrator};
pub use resource_scheduler::ResourceScheduler;
pub use verification_pipeline::{VerificationOutcome, VerificationPipeline};
pub use verification_tiers::{CommandTier, VisualTier};
pub use work_item_graph::WorkItemGraph;
pub use workspace_allocator::{AllocatorConfig, WorkspaceAllocator};
