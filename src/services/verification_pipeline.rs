//! Verification Pipeline
//!
//! Runs ordered tiers (unit, integration, visual, sweep) against a detached
//! snapshot of a trunk commit. Each tier is gated on the previous one passing.
//!
//! Issue routing:
//! - Critical/High: returned as blocking, driving a fix cycle
//! - Medium: queued, never blocks
//! - Low: recorded only
//!
//! An issue that comes back on a later cycle for the same item keeps one
//! queue entry and carries an increasing `retry_count`, whatever its severity.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Issue, Severity, TierKind, TierReport, VerificationResult, WorkItem, WorkItemId,
};
use crate::domain::ports::{VerificationContext, VerificationTier, VersionControl};
use crate::services::workspace_allocator::sanitize_name;

/// Result of one verification cycle for one item.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    /// One entry per executed tier, in order
    pub results: Vec<VerificationResult>,
    /// Critical and High issues across executed tiers
    pub blocking: Vec<Issue>,
}

impl VerificationOutcome {
    pub fn passed(&self) -> bool {
        self.blocking.is_empty()
    }

    /// Failure context handed to the next fix cycle.
    pub fn fix_context(&self) -> String {
        self.blocking
            .iter()
            .map(|issue| {
                format!(
                    "- [{}/{}] {}",
                    issue.tier,
                    issue.severity.as_str(),
                    issue.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Identity of an issue across cycles: item, tier, description.
type IssueKey = (WorkItemId, String, String);

fn issue_key(item: &WorkItemId, issue: &Issue) -> IssueKey {
    (item.clone(), issue.tier.clone(), issue.description.clone())
}

/// Issues in first-seen order, one entry per key.
#[derive(Debug, Default)]
struct IssueLog {
    issues: Vec<Issue>,
    index: HashMap<IssueKey, usize>,
}

impl IssueLog {
    /// Append, or replace the entry already logged under `key`.
    fn upsert(&mut self, key: IssueKey, issue: Issue) {
        match self.index.get(&key) {
            Some(&pos) => self.issues[pos] = issue,
            None => {
                self.index.insert(key, self.issues.len());
                self.issues.push(issue);
            }
        }
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    results: Vec<VerificationResult>,
    queued: IssueLog,
    recorded: IssueLog,
    /// Issues of every severity from each item's last cycle, for retry counting
    open: HashMap<WorkItemId, Vec<Issue>>,
}

pub struct VerificationPipeline {
    vcs: Arc<dyn VersionControl>,
    tiers: Vec<Arc<dyn VerificationTier>>,
    snapshot_root: PathBuf,
    state: Mutex<PipelineState>,
}

impl VerificationPipeline {
    /// Tiers are sorted into unit, integration, visual, sweep order.
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        mut tiers: Vec<Arc<dyn VerificationTier>>,
        snapshot_root: PathBuf,
    ) -> Self {
        tiers.sort_by_key(|tier| TierKind::ORDER.iter().position(|k| *k == tier.kind()));
        Self {
            vcs,
            tiers,
            snapshot_root,
            state: Mutex::new(PipelineState::default()),
        }
    }

    /// Verify `item` as merged at `trunk_commit`.
    #[instrument(skip(self, item), fields(item = %item.id, commit = %trunk_commit, cycle))]
    pub async fn verify(
        &self,
        item: &WorkItem,
        trunk_commit: &str,
        cycle: u32,
    ) -> DomainResult<VerificationOutcome> {
        let checkout = self.snapshot_root.join(format!(
            "{}-c{}-{}",
            sanitize_name(item.id.as_str())?,
            cycle,
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        self.vcs.checkout_snapshot(trunk_commit, &checkout).await?;

        let ctx = VerificationContext {
            item: item.clone(),
            trunk_commit: trunk_commit.to_string(),
            checkout: checkout.clone(),
            cycle,
        };
        let outcome = self.run_tiers(&ctx).await;

        if let Err(e) = self.vcs.remove_snapshot(&checkout).await {
            warn!(path = %checkout.display(), error = %e, "failed to remove snapshot");
        }

        let outcome = outcome?;
        info!(
            tiers_run = outcome.results.len(),
            blocking = outcome.blocking.len(),
            passed = outcome.passed(),
            "verification cycle finished"
        );
        Ok(outcome)
    }

    async fn run_tiers(&self, ctx: &VerificationContext) -> DomainResult<VerificationOutcome> {
        let mut results = Vec::new();
        let mut blocking = Vec::new();
        let mut seen = Vec::new();

        for tier in &self.tiers {
            let kind = tier.kind();
            let report = match tier.verify(ctx).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(tier = %kind, error = %e, "tier errored");
                    TierReport {
                        issues: vec![Issue::new(
                            Severity::High,
                            kind.as_str(),
                            format!("tier errored: {e}"),
                        )],
                        evidence: Vec::new(),
                    }
                }
            };

            let passed = report.is_passing();
            let result = self.record(ctx, kind, report).await;
            blocking.extend(
                result
                    .issues
                    .iter()
                    .filter(|issue| issue.severity.is_blocking())
                    .cloned(),
            );
            seen.extend(result.issues.iter().cloned());
            info!(tier = %kind, passed, issues = result.issues.len(), "tier finished");
            results.push(result);

            if !passed {
                break;
            }
        }

        self.state
            .lock()
            .await
            .open
            .insert(ctx.item.id.clone(), seen);
        Ok(VerificationOutcome { results, blocking })
    }

    /// Route a tier's issues and append its result to the audit history.
    async fn record(
        &self,
        ctx: &VerificationContext,
        tier: TierKind,
        report: TierReport,
    ) -> VerificationResult {
        let mut state = self.state.lock().await;
        let previous = state.open.get(&ctx.item.id).cloned().unwrap_or_default();

        let mut issues = report.issues;
        for issue in &mut issues {
            if let Some(prior) = previous
                .iter()
                .find(|p| p.tier == issue.tier && p.description == issue.description)
            {
                issue.retry_count = prior.retry_count + 1;
            }
            let key = issue_key(&ctx.item.id, issue);
            match issue.severity {
                Severity::Medium => state.queued.upsert(key, issue.clone()),
                Severity::Low => state.recorded.upsert(key, issue.clone()),
                Severity::Critical | Severity::High => {}
            }
        }

        let result = VerificationResult {
            id: Uuid::new_v4(),
            item_id: ctx.item.id.clone(),
            tier,
            passed: !issues.iter().any(|i| i.severity.is_blocking()),
            issues,
            evidence: report.evidence,
            cycle: ctx.cycle,
            trunk_commit: ctx.trunk_commit.clone(),
            recorded_at: Utc::now(),
        };
        state.results.push(result.clone());
        result
    }

    /// Audit history for one item, oldest first.
    pub async fn history(&self, item_id: &WorkItemId) -> Vec<VerificationResult> {
        self.state
            .lock()
            .await
            .results
            .iter()
            .filter(|r| &r.item_id == item_id)
            .cloned()
            .collect()
    }

    pub async fn queued_issues(&self) -> Vec<Issue> {
        self.state.lock().await.queued.issues.clone()
    }

    pub async fn recorded_issues(&self) -> Vec<Issue> {
        self.state.lock().await.recorded.issues.clone()
    }

    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.queued.issues.len()
    }
}
