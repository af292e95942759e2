//! Orchestrator
//!
//! Drives a batch of work items through Planning, Building, Verifying,
//! Hardening and Delivering. Building and Verifying interleave per item: an
//! item is built, merged and verified inside one task while independent
//! items proceed in parallel, bounded by `max_parallel_builders`.
//!
//! The graph is the single owned store of item state; everything else reads
//! snapshots of it.
//!
//! A build that cannot be merged because trunk moved on does not restart
//! the ladder: the next build continues from the following rung, so one
//! build phase (or one fix cycle) spends at most `LADDER.len()` attempts.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BuildAttempt, DeliveredItem, DeliveryReport, EngineEvent, EngineState, Issue, MergeRecord,
    OrchestratorConfig, Phase, Severity, StatusSnapshot, WorkItem, WorkItemId, WorkItemStatus,
    WorkspaceDisposition, LADDER,
};
use crate::domain::ports::VersionControl;
use crate::services::builder_supervisor::{BuilderSupervisor, LadderOutcome};
use crate::services::hardening::HardeningService;
use crate::services::merge_coordinator::MergeCoordinator;
use crate::services::resource_scheduler::ResourceScheduler;
use crate::services::verification_pipeline::VerificationPipeline;
use crate::services::work_item_graph::WorkItemGraph;
use crate::services::workspace_allocator::WorkspaceAllocator;

pub const STATUS_FILE: &str = "status.json";
pub const REPORT_FILE: &str = "delivery-report.json";
pub const STATE_FILE: &str = "engine-state.json";

/// Read the engine state a previous run left in `state_dir`, if any.
pub async fn load_engine_state(state_dir: &Path) -> DomainResult<Option<EngineState>> {
    let path = state_dir.join(STATE_FILE);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let bytes = tokio::fs::read(&path).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Run-level limits and locations.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_parallel_builders: usize,
    pub max_fix_cycles: u32,
    pub max_stale_retries: u32,
    pub state_dir: PathBuf,
}

impl EngineSettings {
    pub fn new(config: &OrchestratorConfig, state_dir: PathBuf) -> Self {
        Self {
            max_parallel_builders: config.max_parallel_builders,
            max_fix_cycles: config.max_fix_cycles,
            max_stale_retries: config.max_stale_retries,
            state_dir,
        }
    }
}

/// The services an orchestrator coordinates.
#[derive(Clone)]
pub struct EngineComponents {
    pub vcs: Arc<dyn VersionControl>,
    pub allocator: Arc<WorkspaceAllocator>,
    pub scheduler: Arc<ResourceScheduler>,
    pub supervisor: Arc<BuilderSupervisor>,
    pub merger: Arc<MergeCoordinator>,
    pub pipeline: Arc<VerificationPipeline>,
    pub hardening: Arc<HardeningService>,
}

/// How one build-and-merge round ended.
enum Delivery {
    Merged(MergeRecord),
    Exhausted,
    /// Built, but trunk moved on; `rungs_used` ladder rungs were spent
    Stale { reason: String, rungs_used: usize },
}

/// Where a ladder stands across stale-base returns.
#[derive(Debug, Default)]
struct LadderProgress {
    next_rung: usize,
    stale_returns: u32,
}

impl LadderProgress {
    /// Account for a stale build. Returns why the ladder is over, if it is.
    fn stale(&mut self, rungs_used: usize, max_stale_retries: u32) -> Option<String> {
        self.stale_returns += 1;
        self.next_rung += rungs_used.max(1);
        if self.stale_returns > max_stale_retries {
            Some(format!("stale base after {} merges", self.stale_returns))
        } else if self.next_rung >= LADDER.len() {
            Some(format!("build ladder exhausted after {} stale merges", self.stale_returns))
        } else {
            None
        }
    }
}

fn stale_context(reason: &str) -> String {
    format!("The previous build could not be merged: {reason}. Rebuild it against the current trunk.")
}

/// State shared by the per-item tasks.
#[derive(Clone)]
struct Shared {
    graph: Arc<RwLock<WorkItemGraph>>,
    phase: Arc<RwLock<Phase>>,
    components: EngineComponents,
    settings: EngineSettings,
    events: Option<mpsc::Sender<EngineEvent>>,
}

pub struct Orchestrator {
    shared: Shared,
}

impl Orchestrator {
    pub fn new(graph: WorkItemGraph, components: EngineComponents, settings: EngineSettings) -> Self {
        Self {
            shared: Shared {
                graph: Arc::new(RwLock::new(graph)),
                phase: Arc::new(RwLock::new(Phase::Planning)),
                components,
                settings,
                events: None,
            },
        }
    }

    /// Publish engine events on `tx`. Sends never block the run on a closed receiver.
    pub fn with_events(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.shared.events = Some(tx);
        self
    }

    /// Aggregate counts per status plus resource utilization.
    pub async fn status(&self) -> StatusSnapshot {
        self.shared.snapshot().await
    }

    pub async fn phase(&self) -> Phase {
        *self.shared.phase.read().await
    }

    /// Shared handle to the graph, for read access after a run.
    pub fn graph(&self) -> Arc<RwLock<WorkItemGraph>> {
        Arc::clone(&self.shared.graph)
    }

    /// Carry over the delivered items of an earlier run.
    ///
    /// Items that were Done keep their status and attempts and are not
    /// rebuilt; every other item starts over. Items no longer in the graph,
    /// or whose dependencies were not delivered, are skipped. Returns the
    /// number of items restored.
    #[instrument(skip(self, state), fields(saved_at = %state.saved_at))]
    pub async fn resume_from(&self, state: EngineState) -> DomainResult<usize> {
        let mut done: Vec<DeliveredItem> = state.done_items().cloned().collect();
        let restored = {
            let mut graph = self.shared.graph.write().await;
            let order = graph.topological_order().to_vec();
            let mut restored = 0;
            for id in &order {
                let Some(pos) = done.iter().position(|item| item.id == *id) else {
                    continue;
                };
                let item = done.swap_remove(pos);
                match graph.restore_done(id, item.attempts) {
                    Ok(()) => restored += 1,
                    Err(e) => warn!(item = %id, error = %e, "not restoring item"),
                }
            }
            for item in &done {
                warn!(item = %item.id, "saved item is not in this run");
            }
            restored
        };

        self.shared.components.merger.restore(state.merges).await;
        info!(restored, "resumed from saved engine state");
        Ok(restored)
    }

    /// Run every phase to completion and return the delivery report.
    #[instrument(skip(self))]
    pub async fn run(&self) -> DomainResult<DeliveryReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let shared = &self.shared;

        {
            let graph = shared.graph.read().await;
            let plan: Vec<&str> = graph
                .topological_order()
                .iter()
                .map(WorkItemId::as_str)
                .collect();
            info!(%run_id, items = graph.len(), plan = ?plan, "planning complete");
        }

        shared.advance(Phase::Building).await;
        self.build_all().await?;
        if *shared.phase.read().await == Phase::Building {
            shared.advance(Phase::Verifying).await;
        }

        shared.advance(Phase::Hardening).await;
        let trunk_commit = shared.components.vcs.trunk_tip().await?;
        let hardening_issues = match shared.components.hardening.run(&trunk_commit).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "hardening could not run");
                vec![Issue::new(Severity::Medium, "hardening", format!("hardening could not run: {e}"))]
            }
        };

        shared.advance(Phase::Delivering).await;
        let report = self
            .delivery_report(run_id, trunk_commit, hardening_issues, started_at)
            .await;
        shared
            .write_state_file(REPORT_FILE, &serde_json::to_vec_pretty(&report)?)
            .await?;
        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            blocked = report.blocked.len(),
            merges = report.merges.len(),
            "delivery report written"
        );

        shared.advance(Phase::Complete).await;
        shared.persist_status().await;
        Ok(report)
    }

    /// Keep up to `max_parallel_builders` items in flight until nothing is
    /// running and nothing is ready.
    async fn build_all(&self) -> DomainResult<()> {
        let shared = &self.shared;
        let permits = Arc::new(Semaphore::new(shared.settings.max_parallel_builders.max(1)));
        let mut running = JoinSet::new();

        loop {
            for item_id in shared.promote_ready().await? {
                let task = shared.clone();
                let permits = Arc::clone(&permits);
                running.spawn(async move {
                    let _permit = permits.acquire_owned().await.map_err(|_| {
                        DomainError::ExecutionFailed("builder pool closed".to_string())
                    })?;
                    task.process_item(&item_id).await;
                    Ok::<_, DomainError>(())
                });
            }

            match running.join_next().await {
                None => break,
                Some(Ok(result)) => result?,
                Some(Err(e)) => {
                    error!(error = %e, "item task aborted");
                    return Err(DomainError::ExecutionFailed(format!("item task aborted: {e}")));
                }
            }

            shared.persist_status().await;
            shared.persist_engine_state().await;
            if *shared.phase.read().await == Phase::Building && shared.build_side_settled().await {
                shared.advance(Phase::Verifying).await;
            }
        }

        Ok(())
    }

    async fn delivery_report(
        &self,
        run_id: Uuid,
        trunk_commit: String,
        hardening_issues: Vec<Issue>,
        started_at: chrono::DateTime<Utc>,
    ) -> DeliveryReport {
        let components = &self.shared.components;
        let graph = self.shared.graph.read().await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        let mut blocked = Vec::new();
        let mut items = Vec::with_capacity(graph.len());
        for item in graph.items() {
            match item.status {
                WorkItemStatus::Done => delivered.push(item.id.clone()),
                WorkItemStatus::Blocked => blocked.push(item.id.clone()),
                _ => failed.push(item.id.clone()),
            }
            items.push(DeliveredItem {
                id: item.id.clone(),
                title: item.title.clone(),
                status: item.status,
                attempts: item.attempts.clone(),
            });
        }

        DeliveryReport {
            run_id,
            delivered,
            failed,
            blocked,
            items,
            merges: components.merger.history().await,
            queued_issues: components.pipeline.queued_issues().await,
            recorded_issues: components.pipeline.recorded_issues().await,
            hardening_issues,
            trunk_commit,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Shared {
    async fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    async fn advance(&self, to: Phase) {
        let from = {
            let mut phase = self.phase.write().await;
            std::mem::replace(&mut *phase, to)
        };
        info!(%from, %to, "phase changed");
        self.emit(EngineEvent::PhaseChanged { from, to }).await;
    }

    /// Mark every Pending item with all dependencies Done as Ready.
    async fn promote_ready(&self) -> DomainResult<Vec<WorkItemId>> {
        let ids = {
            let mut graph = self.graph.write().await;
            let ids: Vec<WorkItemId> = graph.ready_items().map(|i| i.id.clone()).collect();
            for id in &ids {
                graph.mark(id, WorkItemStatus::Ready)?;
            }
            ids
        };
        for id in &ids {
            self.emit(EngineEvent::ItemReady { item_id: id.clone() }).await;
        }
        Ok(ids)
    }

    async fn build_side_settled(&self) -> bool {
        let graph = self.graph.read().await;
        [
            WorkItemStatus::Pending,
            WorkItemStatus::Ready,
            WorkItemStatus::InProgress,
        ]
        .iter()
        .all(|s| graph.count(*s) == 0)
    }

    /// Build, merge and verify one item. Never returns an error: anything
    /// unexpected fails the item and blocks its dependents.
    #[instrument(skip(self), fields(item = %id))]
    async fn process_item(&self, id: &WorkItemId) {
        if let Err(e) = self.drive_item(id).await {
            warn!(error = %e, "item failed on error");
            if let Err(fail_err) = self.fail_item(id, e.to_string()).await {
                error!(error = %fail_err, "could not mark item failed");
            }
        }
    }

    async fn drive_item(&self, id: &WorkItemId) -> DomainResult<()> {
        let mut progress = LadderProgress::default();
        let mut context = None;
        let record = loop {
            self.mark(id, WorkItemStatus::InProgress).await?;
            match self.build_and_merge(id, 0, context.take(), progress.next_rung).await? {
                Delivery::Merged(record) => break record,
                Delivery::Exhausted => return self.fail_item(id, "build ladder exhausted".to_string()).await,
                Delivery::Stale { reason, rungs_used } => {
                    if let Some(why) = progress.stale(rungs_used, self.settings.max_stale_retries) {
                        return self.fail_item(id, format!("{why}: {reason}")).await;
                    }
                    info!(
                        stale_returns = progress.stale_returns,
                        next_rung = progress.next_rung,
                        "stale base, returning item to ready"
                    );
                    self.mark(id, WorkItemStatus::Ready).await?;
                    self.emit(EngineEvent::ItemReady { item_id: id.clone() }).await;
                    context = Some(stale_context(&reason));
                }
            }
        };

        self.mark(id, WorkItemStatus::Verifying).await?;
        self.verify_item(id, record.commit).await
    }

    /// Verify, running bounded fix cycles while blocking issues remain.
    async fn verify_item(&self, id: &WorkItemId, mut commit: String) -> DomainResult<()> {
        let mut cycle = 0;
        loop {
            let item = self.item(id).await?;
            let outcome = self.components.pipeline.verify(&item, &commit, cycle).await?;
            for result in &outcome.results {
                self.emit(EngineEvent::TierFinished {
                    item_id: id.clone(),
                    tier: result.tier,
                    passed: result.passed,
                    issues: result.issues.len(),
                })
                .await;
            }

            if outcome.passed() {
                self.mark(id, WorkItemStatus::Done).await?;
                info!(cycles = cycle, "item done");
                self.emit(EngineEvent::ItemDone { item_id: id.clone() }).await;
                return Ok(());
            }

            if cycle >= self.settings.max_fix_cycles {
                return self
                    .fail_item(
                        id,
                        format!(
                            "{} blocking issues remain after {cycle} fix cycles",
                            outcome.blocking.len()
                        ),
                    )
                    .await;
            }

            cycle += 1;
            info!(cycle, blocking = outcome.blocking.len(), "starting fix cycle");
            match self.fix(id, cycle, outcome.fix_context()).await? {
                Some(record) => commit = record.commit,
                None => {
                    return self
                        .fail_item(id, format!("fix cycle {cycle} could not be merged"))
                        .await;
                }
            }
        }
    }

    /// One fix cycle on a ladder of its own. The item stays Verifying;
    /// stale merges continue that ladder within the same stale budget.
    async fn fix(&self, id: &WorkItemId, cycle: u32, context: String) -> DomainResult<Option<MergeRecord>> {
        let mut progress = LadderProgress::default();
        let mut next_context = context.clone();
        loop {
            match self
                .build_and_merge(id, cycle, Some(next_context.clone()), progress.next_rung)
                .await?
            {
                Delivery::Merged(record) => return Ok(Some(record)),
                Delivery::Exhausted => return Ok(None),
                Delivery::Stale { reason, rungs_used } => {
                    if let Some(why) = progress.stale(rungs_used, self.settings.max_stale_retries) {
                        warn!(%reason, %why, "fix cycle over");
                        return Ok(None);
                    }
                    next_context = format!("{context}\n\n{}", stale_context(&reason));
                }
            }
        }
    }

    async fn build_and_merge(
        &self,
        id: &WorkItemId,
        cycle: u32,
        context: Option<String>,
        first_rung: usize,
    ) -> DomainResult<Delivery> {
        let item = self.item(id).await?;
        let outcome = self
            .components
            .supervisor
            .build_from(&item, cycle, context, first_rung)
            .await?;
        self.record_attempts(id, outcome.attempts()).await?;
        let rungs_used = outcome.attempts().len();

        let LadderOutcome::Built { workspace, .. } = outcome else {
            return Ok(Delivery::Exhausted);
        };

        let merged = self.components.merger.merge(&workspace).await;
        let disposition = if merged.is_ok() {
            WorkspaceDisposition::Merged
        } else {
            WorkspaceDisposition::Discarded
        };
        if let Err(e) = self.components.allocator.release(&workspace, disposition).await {
            warn!(workspace = %workspace.id, error = %e, "workspace release failed");
        }

        match merged {
            Ok(record) => {
                self.emit(EngineEvent::Merged { record: record.clone() }).await;
                Ok(Delivery::Merged(record))
            }
            Err(e @ DomainError::StaleBase { .. }) => Ok(Delivery::Stale {
                reason: e.to_string(),
                rungs_used,
            }),
            Err(e) => Err(e),
        }
    }

    async fn record_attempts(&self, id: &WorkItemId, attempts: &[BuildAttempt]) -> DomainResult<()> {
        {
            let mut graph = self.graph.write().await;
            for attempt in attempts {
                graph.record_attempt(id, attempt.clone())?;
            }
        }
        for attempt in attempts {
            self.emit(EngineEvent::AttemptRecorded {
                item_id: id.clone(),
                attempt: attempt.clone(),
            })
            .await;
        }
        Ok(())
    }

    async fn fail_item(&self, id: &WorkItemId, reason: String) -> DomainResult<()> {
        let blocked = {
            let mut graph = self.graph.write().await;
            graph.mark(id, WorkItemStatus::Failed)?;
            graph.block_dependents(id)?
        };

        warn!(item = %id, %reason, blocked = blocked.len(), "item failed");
        self.emit(EngineEvent::ItemFailed {
            item_id: id.clone(),
            reason,
        })
        .await;
        if !blocked.is_empty() {
            self.emit(EngineEvent::ItemsBlocked {
                cause: id.clone(),
                blocked,
            })
            .await;
        }
        Ok(())
    }

    async fn mark(&self, id: &WorkItemId, status: WorkItemStatus) -> DomainResult<()> {
        self.graph.write().await.mark(id, status)
    }

    async fn item(&self, id: &WorkItemId) -> DomainResult<WorkItem> {
        self.graph
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::UnknownItem(id.clone()))
    }

    async fn snapshot(&self) -> StatusSnapshot {
        let phase = *self.phase.read().await;
        let (counts, total_items) = {
            let graph = self.graph.read().await;
            (graph.status_counts(), graph.len())
        };
        StatusSnapshot {
            phase,
            counts,
            total_items,
            resources: self.components.scheduler.utilization(),
            merges: self.components.merger.merge_count(),
            queued_issues: self.components.pipeline.queued_count().await,
            taken_at: Utc::now(),
        }
    }

    async fn persist_status(&self) {
        let snapshot = self.snapshot().await;
        let result = match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => self.write_state_file(STATUS_FILE, &bytes).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => debug!("status snapshot persisted"),
            Err(e) => warn!(error = %e, "failed to persist status snapshot"),
        }
    }

    /// Write item progress for `run --resume`. Failures are logged, not fatal.
    async fn persist_engine_state(&self) {
        let items: Vec<DeliveredItem> = {
            let graph = self.graph.read().await;
            graph
                .items()
                .map(|item| DeliveredItem {
                    id: item.id.clone(),
                    title: item.title.clone(),
                    status: item.status,
                    attempts: item.attempts.clone(),
                })
                .collect()
        };
        let state = EngineState {
            items,
            merges: self.components.merger.history().await,
            saved_at: Utc::now(),
        };
        let result = match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => self.write_state_file(STATE_FILE, &bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist engine state");
        }
    }

    async fn write_state_file(&self, name: &str, bytes: &[u8]) -> DomainResult<()> {
        tokio::fs::create_dir_all(&self.settings.state_dir).await?;
        tokio::fs::write(self.settings.state_dir.join(name), bytes).await?;
        Ok(())
    }
}
