//! Engine assembly: turns a `Config` plus port adapters into a ready-to-run
//! `Orchestrator`.

use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Config, TierKind, WorkItemSpec};
use crate::domain::ports::{
    BuildAgent, ModelResidency, TestRunner, VerificationTier, VersionControl, VisualClassifier,
    VisualJudge,
};
use crate::infrastructure::agents::ProcessAgent;
use crate::infrastructure::git::GitCli;
use crate::infrastructure::inference::{
    InferenceVisualClassifier, InferenceVisualJudge, OllamaClient,
};
use crate::infrastructure::test_runner::ShellTestRunner;
use crate::services::{
    AllocatorConfig, BuilderSupervisor, CommandTier, EngineComponents, EngineSettings,
    HardeningService, MergeCoordinator, Orchestrator, ResourceScheduler, SupervisorConfig,
    VerificationPipeline, VisualTier, WorkItemGraph, WorkspaceAllocator,
};

const SNAPSHOT_DIR: &str = "snapshots";

/// Port implementations the engine runs against.
#[derive(Clone)]
pub struct EngineAdapters {
    pub vcs: Arc<dyn VersionControl>,
    pub primary: Arc<dyn BuildAgent>,
    pub fallback: Arc<dyn BuildAgent>,
    pub tests: Arc<dyn TestRunner>,
    pub classifier: Arc<dyn VisualClassifier>,
    pub judge: Arc<dyn VisualJudge>,
    /// Warms and unloads models as their resource classes become busy or idle
    pub residency: Option<Arc<dyn ModelResidency>>,
}

impl EngineAdapters {
    /// Production adapters: git CLI, agent processes, shell tests and the
    /// HTTP inference service.
    pub fn from_config(config: &Config) -> DomainResult<Self> {
        let inference = Arc::new(OllamaClient::new(&config.inference)?);
        let visual = &config.verification.visual;

        Ok(Self {
            vcs: Arc::new(GitCli::from_config(&config.repository)),
            primary: Arc::new(ProcessAgent::new("primary", config.builder.primary.clone())),
            fallback: Arc::new(ProcessAgent::new("fallback", config.builder.fallback.clone())),
            tests: Arc::new(ShellTestRunner::new()),
            classifier: Arc::new(InferenceVisualClassifier::new(
                inference.clone(),
                &visual.classifier_model,
            )),
            judge: Arc::new(InferenceVisualJudge::new(
                inference.clone(),
                &visual.judge_model,
            )),
            residency: Some(inference),
        })
    }
}

/// Wire every service for one run over `specs`.
///
/// Fails on a malformed dependency graph before anything touches the repository.
pub fn build_engine(
    config: &Config,
    specs: Vec<WorkItemSpec>,
    adapters: EngineAdapters,
) -> DomainResult<Orchestrator> {
    let graph = WorkItemGraph::new(specs)?;
    let state_root = config.repository.state_root();
    let snapshot_root = state_root.join(SNAPSHOT_DIR);

    let mut scheduler = ResourceScheduler::from_config(&config.resources);
    if let Some(residency) = adapters.residency.clone() {
        scheduler = scheduler.with_residency(residency);
    }
    let scheduler = Arc::new(scheduler);

    let allocator = Arc::new(WorkspaceAllocator::new(
        Arc::clone(&adapters.vcs),
        AllocatorConfig::from(&config.repository),
    ));

    let supervisor = Arc::new(BuilderSupervisor::new(
        Arc::clone(&allocator),
        Arc::clone(&scheduler),
        Arc::clone(&adapters.vcs),
        adapters.primary,
        adapters.fallback,
        Arc::clone(&adapters.tests),
        SupervisorConfig::from(&config.builder),
    ));

    let merger = Arc::new(MergeCoordinator::new(
        Arc::clone(&adapters.vcs),
        Arc::clone(&adapters.tests),
        Arc::clone(&allocator),
        config.builder.test_command.clone(),
    ));

    let verification = &config.verification;
    let tiers: Vec<Arc<dyn VerificationTier>> = vec![
        Arc::new(CommandTier::new(
            TierKind::Unit,
            Arc::clone(&adapters.tests),
            verification.unit.clone(),
        )),
        Arc::new(CommandTier::new(
            TierKind::Integration,
            Arc::clone(&adapters.tests),
            verification.integration.clone(),
        )),
        Arc::new(VisualTier::new(
            adapters.classifier,
            adapters.judge,
            Arc::clone(&scheduler),
            verification.visual.clone(),
        )),
        Arc::new(CommandTier::new(
            TierKind::Sweep,
            Arc::clone(&adapters.tests),
            verification.sweep.clone(),
        )),
    ];
    let pipeline = Arc::new(VerificationPipeline::new(
        Arc::clone(&adapters.vcs),
        tiers,
        snapshot_root.clone(),
    ));

    let hardening = Arc::new(HardeningService::new(
        Arc::clone(&adapters.vcs),
        Arc::clone(&adapters.tests),
        config.hardening.checks.clone(),
        snapshot_root,
    ));

    debug!(
        classes = config.resources.classes.len(),
        checks = config.hardening.checks.len(),
        "engine services wired"
    );
    info!(
        items = graph.len(),
        max_parallel_builders = config.orchestrator.max_parallel_builders,
        state_dir = %state_root.display(),
        "engine assembled"
    );

    Ok(Orchestrator::new(
        graph,
        EngineComponents {
            vcs: adapters.vcs,
            allocator,
            scheduler,
            supervisor,
            merger,
            pipeline,
            hardening,
        },
        EngineSettings::new(&config.orchestrator, state_root),
    ))
}
