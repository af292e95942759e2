//! Builder Supervisor
//!
//! Runs build agents inside a workspace under a fixed three-rung escalation
//! ladder and classifies each run into an immutable `BuildAttempt`.
//!
//! Timeouts are enforced here, not by the agent: an overrunning process is
//! killed, then its lease is released, then its workspace is discarded.
//!
//! A declared success still has to earn it: the agent's own test counts, a
//! review of the changed files and the local test command can each
//! downgrade it to Partial.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentTier, AttemptOutcome, BuildAttempt, BuilderConfig, DiffRef, ResourceLease, ResourceNeed,
    TestCounts, WorkItem, Workspace, WorkspaceDisposition, LADDER,
};
use crate::domain::ports::{AgentExit, AgentRequest, BuildAgent, TestRunner, VersionControl};
use crate::services::agent_output::parse_agent_output;
use crate::services::build_review::review_workspace;
use crate::services::resource_scheduler::ResourceScheduler;
use crate::services::workspace_allocator::WorkspaceAllocator;

/// How much stderr to keep in an attempt summary.
const STDERR_TAIL_CHARS: usize = 2000;

/// Supervisor settings derived from `BuilderConfig`.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub test_command: Option<String>,
    pub resource: Option<ResourceNeed>,
    /// Review changed files before accepting a success
    pub review: bool,
}

impl SupervisorConfig {
    pub fn timeout_for(&self, tier: AgentTier) -> Duration {
        match tier {
            AgentTier::Primary => self.primary_timeout,
            AgentTier::Fallback => self.fallback_timeout,
        }
    }
}

impl From<&BuilderConfig> for SupervisorConfig {
    fn from(config: &BuilderConfig) -> Self {
        Self {
            primary_timeout: Duration::from_secs(config.primary.timeout_secs),
            fallback_timeout: Duration::from_secs(config.fallback.timeout_secs),
            test_command: config.test_command.clone(),
            resource: config.resource.clone(),
            review: config.review,
        }
    }
}

/// Position of one attempt within a ladder run.
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub tier: AgentTier,
    pub number: u32,
    pub cycle: u32,
    pub failure_context: Option<String>,
    /// Files the review expects the attempt to leave behind
    pub expected_files: Vec<String>,
}

/// What an agent's exit says about the attempt.
#[derive(Debug, Clone, PartialEq)]
struct ExitClassification {
    outcome: AttemptOutcome,
    summary: String,
    files: Vec<String>,
    tests: Option<TestCounts>,
}

/// Result of a full ladder run.
#[derive(Debug)]
pub enum LadderOutcome {
    /// An attempt succeeded; the workspace is still Active and holds the diff.
    Built {
        workspace: Workspace,
        attempts: Vec<BuildAttempt>,
    },
    /// Every rung failed; any remaining workspace was discarded.
    Exhausted { attempts: Vec<BuildAttempt> },
}

impl LadderOutcome {
    pub fn attempts(&self) -> &[BuildAttempt] {
        match self {
            Self::Built { attempts, .. } | Self::Exhausted { attempts } => attempts,
        }
    }
}

pub struct BuilderSupervisor {
    allocator: Arc<WorkspaceAllocator>,
    scheduler: Arc<ResourceScheduler>,
    vcs: Arc<dyn VersionControl>,
    primary: Arc<dyn BuildAgent>,
    fallback: Arc<dyn BuildAgent>,
    tests: Arc<dyn TestRunner>,
    config: SupervisorConfig,
}

impl BuilderSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        allocator: Arc<WorkspaceAllocator>,
        scheduler: Arc<ResourceScheduler>,
        vcs: Arc<dyn VersionControl>,
        primary: Arc<dyn BuildAgent>,
        fallback: Arc<dyn BuildAgent>,
        tests: Arc<dyn TestRunner>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            allocator,
            scheduler,
            vcs,
            primary,
            fallback,
            tests,
            config,
        }
    }

    /// Walk the ladder for `item` until an attempt succeeds or all rungs fail.
    ///
    /// Rungs after a Failed or Partial attempt reuse the same workspace and
    /// receive the previous failure as context. A timed-out rung loses its
    /// workspace, so the next rung starts from a fresh one.
    pub async fn build(
        &self,
        item: &WorkItem,
        cycle: u32,
        initial_context: Option<String>,
    ) -> DomainResult<LadderOutcome> {
        self.build_from(item, cycle, initial_context, 0).await
    }

    /// Like `build`, but start at rung `first_rung` on a fresh workspace.
    ///
    /// Used when an earlier run of the same ladder produced a build that
    /// could not be merged: the ladder continues instead of restarting, so
    /// one ladder never spends more than `LADDER.len()` attempts. Starting
    /// past the last rung returns `Exhausted` with no attempts.
    #[instrument(skip(self, item, initial_context), fields(item = %item.id, cycle, first_rung))]
    pub async fn build_from(
        &self,
        item: &WorkItem,
        cycle: u32,
        initial_context: Option<String>,
        first_rung: usize,
    ) -> DomainResult<LadderOutcome> {
        let spec = item.spec_text();
        let mut workspace = None;
        let mut context = initial_context;
        let mut attempts: Vec<BuildAttempt> = Vec::with_capacity(LADDER.len());

        for (index, tier) in LADDER.iter().copied().enumerate().skip(first_rung) {
            let ws = match workspace.take() {
                Some(ws) => ws,
                None => self.allocator.acquire(&item.id).await?,
            };

            let plan = AttemptPlan {
                tier,
                number: u32::try_from(index + 1).unwrap_or(u32::MAX),
                cycle,
                failure_context: context.take(),
                expected_files: item.expected_files.clone(),
            };

            let attempt = match self.attempt(&ws, &spec, plan).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    self.discard_quietly(&ws).await;
                    return Err(e);
                }
            };

            info!(
                tier = tier.as_str(),
                number = attempt.number,
                outcome = attempt.outcome.as_str(),
                "build attempt finished"
            );

            let outcome = attempt.outcome;
            context = Some(failure_context(&attempt));
            attempts.push(attempt);

            match outcome {
                AttemptOutcome::Success => {
                    return Ok(LadderOutcome::Built {
                        workspace: ws,
                        attempts,
                    });
                }
                AttemptOutcome::TimedOut => {}
                AttemptOutcome::Partial | AttemptOutcome::Failed => workspace = Some(ws),
            }
        }

        if let Some(ws) = workspace {
            self.discard_quietly(&ws).await;
        }
        warn!(attempts = attempts.len(), "build ladder exhausted");
        Ok(LadderOutcome::Exhausted { attempts })
    }

    /// Run a single agent attempt inside `workspace`.
    ///
    /// Agent-side failures become attempt outcomes; only infrastructure
    /// failures (lease, allocator) are returned as errors.
    #[instrument(skip(self, workspace, spec, plan), fields(workspace = %workspace.id, tier = plan.tier.as_str(), number = plan.number))]
    pub async fn attempt(
        &self,
        workspace: &Workspace,
        spec: &str,
        plan: AttemptPlan,
    ) -> DomainResult<BuildAttempt> {
        let started_at = Utc::now();
        let lease = match &self.config.resource {
            Some(need) => Some(
                self.scheduler
                    .acquire(need, &workspace.id.to_string())
                    .await?,
            ),
            None => None,
        };

        let agent = match plan.tier {
            AgentTier::Primary => &self.primary,
            AgentTier::Fallback => &self.fallback,
        };
        let request = AgentRequest {
            workspace_path: workspace.path.clone(),
            spec: spec.to_string(),
            failure_context: plan.failure_context.clone(),
            tier: plan.tier,
        };

        let mut record = BuildAttempt {
            workspace_id: workspace.id,
            tier: plan.tier,
            number: plan.number,
            cycle: plan.cycle,
            outcome: AttemptOutcome::Failed,
            started_at,
            finished_at: started_at,
            diff: None,
            summary: String::new(),
            local_tests: None,
            reported_files: Vec::new(),
            reported_tests: None,
            review_findings: Vec::new(),
        };

        let mut process = match agent.spawn(request).await {
            Ok(process) => process,
            Err(e) => {
                warn!(agent = agent.name(), error = %e, "agent failed to start");
                self.release_lease(lease).await?;
                record.summary = format!("agent '{}' failed to start: {e}", agent.name());
                record.finished_at = Utc::now();
                return Ok(record);
            }
        };

        let limit = self.config.timeout_for(plan.tier);
        let exit = match tokio::time::timeout(limit, process.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                let err = DomainError::AgentTimeout {
                    tier: plan.tier.as_str().to_string(),
                    timeout_secs: limit.as_secs(),
                };
                warn!(timeout_secs = limit.as_secs(), "agent timed out, cancelling");

                if let Err(e) = process.kill().await {
                    warn!(error = %e, "failed to kill timed-out agent");
                }
                drop(process);
                self.release_lease(lease).await?;
                if let Err(e) = self
                    .allocator
                    .release(workspace, WorkspaceDisposition::Discarded)
                    .await
                {
                    warn!(error = %e, "failed to discard workspace of timed-out agent");
                }

                record.outcome = AttemptOutcome::TimedOut;
                record.summary = err.to_string();
                record.finished_at = Utc::now();
                return Ok(record);
            }
        };
        drop(process);
        self.release_lease(lease).await?;

        let classified = match exit {
            Ok(exit) => classify_exit(&exit),
            Err(e) => ExitClassification {
                outcome: AttemptOutcome::Failed,
                summary: format!("agent wait failed: {e}"),
                files: Vec::new(),
                tests: None,
            },
        };
        record.outcome = classified.outcome;
        record.summary = classified.summary;
        record.reported_files = classified.files;
        record.reported_tests = classified.tests;
        record.diff = self.capture_diff(workspace, &plan).await;

        if record.outcome == AttemptOutcome::Success && self.config.review {
            let changed = record
                .diff
                .as_ref()
                .map(|diff| diff.files_changed.as_slice())
                .unwrap_or_default();
            let review = review_workspace(&workspace.path, changed, &plan.expected_files).await;
            if !review.passed() {
                warn!(findings = review.findings.len(), "build review failed");
                downgrade(&mut record, review.summary());
                record.review_findings = review.findings;
            }
        }

        if record.outcome == AttemptOutcome::Success {
            if let Some(command) = &self.config.test_command {
                let (passed, counts, note) = self.run_local_tests(workspace, command).await;
                record.local_tests = counts;
                if !passed {
                    downgrade(&mut record, note);
                }
            }
        }

        record.finished_at = Utc::now();
        Ok(record)
    }

    async fn release_lease(&self, lease: Option<ResourceLease>) -> DomainResult<()> {
        match lease {
            Some(lease) => self.scheduler.release(lease).await,
            None => Ok(()),
        }
    }

    async fn capture_diff(&self, workspace: &Workspace, plan: &AttemptPlan) -> Option<DiffRef> {
        let message = format!(
            "{}: attempt {} ({}, cycle {})",
            workspace.item_id,
            plan.number,
            plan.tier.as_str(),
            plan.cycle
        );
        let head = match self.vcs.commit_all(&workspace.path, &message).await {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "failed to commit attempt output");
                return None;
            }
        };
        match self.vcs.diff(&workspace.path, &workspace.base_commit).await {
            Ok(files_changed) => {
                debug!(files = files_changed.len(), head = %head, "attempt diff captured");
                Some(DiffRef {
                    base: workspace.base_commit.clone(),
                    head,
                    files_changed,
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to compute attempt diff");
                None
            }
        }
    }

    async fn run_local_tests(
        &self,
        workspace: &Workspace,
        command: &str,
    ) -> (bool, Option<TestCounts>, String) {
        match self.tests.run(&workspace.path, command).await {
            Ok(run) if run.passed && run.counts.is_some() => (true, run.counts, String::new()),
            Ok(run) if run.passed => (
                false,
                None,
                "local tests printed no recognizable summary".to_string(),
            ),
            Ok(run) => {
                let note = match run.counts {
                    Some(counts) => format!(
                        "local tests failed ({} passed, {} failed)",
                        counts.passed, counts.failed
                    ),
                    None => "local tests failed".to_string(),
                };
                (false, run.counts, note)
            }
            Err(e) => (false, None, format!("local tests could not run: {e}")),
        }
    }

    async fn discard_quietly(&self, workspace: &Workspace) {
        if let Err(e) = self
            .allocator
            .release(workspace, WorkspaceDisposition::Discarded)
            .await
        {
            warn!(workspace = %workspace.id, error = %e, "failed to discard workspace");
        }
    }
}

/// Downgrade a Success to Partial, appending `note` to the summary.
fn downgrade(record: &mut BuildAttempt, note: String) {
    record.outcome = AttemptOutcome::Partial;
    record.summary = if record.summary.is_empty() {
        note
    } else {
        format!("{}; {note}", record.summary)
    };
}

fn classify_exit(exit: &AgentExit) -> ExitClassification {
    if !exit.success {
        let code = exit
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return ExitClassification {
            outcome: AttemptOutcome::Failed,
            summary: format!("agent exited with {code}: {}", tail(&exit.stderr)),
            files: Vec::new(),
            tests: None,
        };
    }
    let report = match parse_agent_output(&exit.stdout) {
        Ok(report) => report,
        Err(e) => {
            return ExitClassification {
                outcome: AttemptOutcome::Failed,
                summary: e.to_string(),
                files: Vec::new(),
                tests: None,
            }
        }
    };

    let mut outcome = report.status.outcome();
    let mut summary = report.summary;
    if let Some(counts) = report.tests.filter(|c| c.failed > 0) {
        if outcome == AttemptOutcome::Success {
            outcome = AttemptOutcome::Partial;
            let note = format!("agent reported {} failing test(s)", counts.failed);
            summary = if summary.is_empty() {
                note
            } else {
                format!("{summary}; {note}")
            };
        }
    }
    ExitClassification {
        outcome,
        summary,
        files: report.files_touched,
        tests: report.tests,
    }
}

/// Context handed to the next rung.
fn failure_context(attempt: &BuildAttempt) -> String {
    let mut text = format!(
        "Attempt {} ({}) ended {}.",
        attempt.number,
        attempt.tier.as_str(),
        attempt.outcome.as_str()
    );
    if !attempt.summary.is_empty() {
        text.push('\n');
        text.push_str(&attempt.summary);
    }
    if let Some(counts) = attempt.local_tests {
        text.push_str(&format!(
            "\nLocal tests: {} passed, {} failed.",
            counts.passed, counts.failed
        ));
    }
    for finding in &attempt.review_findings {
        text.push_str(&format!("\n- {finding}"));
    }
    text
}

fn tail(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_CHARS {
        return trimmed;
    }
    let mut start = trimmed.len() - STDERR_TAIL_CHARS;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}
