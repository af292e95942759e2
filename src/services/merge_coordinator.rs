//! Merge Coordinator
//!
//! The only writer of trunk. Every merge runs inside one critical section,
//! so trunk advances form a total order with monotonically increasing
//! sequence numbers. Readers of the merge history never wait on that
//! section: the count is an atomic and the records sit behind their own
//! lock, taken only to append.
//!
//! When trunk has moved past a workspace's base, one rebase-and-retest is
//! attempted before giving up with `StaleBase`.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MergeRecord, Workspace};
use crate::domain::ports::{RebaseOutcome, TestRunner, VersionControl};
use crate::services::workspace_allocator::WorkspaceAllocator;

pub struct MergeCoordinator {
    vcs: Arc<dyn VersionControl>,
    tests: Arc<dyn TestRunner>,
    allocator: Arc<WorkspaceAllocator>,
    /// Run in the workspace after a clean rebase
    retest_command: Option<String>,
    /// Held for the whole rebase, retest and merge
    merge_lock: Mutex<()>,
    sequence: AtomicU64,
    records: RwLock<Vec<MergeRecord>>,
}

impl MergeCoordinator {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        tests: Arc<dyn TestRunner>,
        allocator: Arc<WorkspaceAllocator>,
        retest_command: Option<String>,
    ) -> Self {
        Self {
            vcs,
            tests,
            allocator,
            retest_command,
            merge_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Merge the workspace branch into trunk.
    ///
    /// The workspace stays Active either way; the caller releases it as
    /// Merged or Discarded.
    #[instrument(skip(self, workspace), fields(item = %workspace.item_id, branch = %workspace.branch))]
    pub async fn merge(&self, workspace: &Workspace) -> DomainResult<MergeRecord> {
        let _guard = self.merge_lock.lock().await;

        let tip = self.vcs.trunk_tip().await?;
        let mut rebased = false;

        if workspace.base_commit != tip {
            info!(base = %workspace.base_commit, tip = %tip, "trunk advanced, rebasing");
            let stale = |reason: String| DomainError::StaleBase {
                item: workspace.item_id.clone(),
                base: workspace.base_commit.clone(),
                tip: tip.clone(),
                reason,
            };

            match self.vcs.rebase(&workspace.path).await? {
                RebaseOutcome::Conflict { files } => {
                    warn!(conflicts = files.len(), "rebase conflicted");
                    return Err(stale(format!("rebase conflict in {}", files.join(", "))));
                }
                RebaseOutcome::Clean { new_base } => {
                    self.allocator.update_base(workspace.id, &new_base).await?;
                    rebased = true;

                    if let Some(command) = &self.retest_command {
                        match self.tests.run(&workspace.path, command).await {
                            Ok(run) if run.passed => {
                                info!("retest after rebase passed");
                            }
                            Ok(_) => {
                                warn!("retest after rebase failed");
                                return Err(stale("tests failed after rebase".to_string()));
                            }
                            Err(e) => {
                                return Err(stale(format!("retest after rebase could not run: {e}")));
                            }
                        }
                    }
                }
            }
        }

        let message = format!(
            "Merge {} from {}{}",
            workspace.item_id,
            workspace.branch,
            if rebased { " (rebased)" } else { "" }
        );
        let commit = self.vcs.merge(&workspace.branch, &message).await?;

        let record = MergeRecord {
            sequence: self.sequence.load(Ordering::SeqCst) + 1,
            item_id: workspace.item_id.clone(),
            workspace_id: workspace.id,
            commit,
            previous_tip: tip,
            rebased,
            merged_at: Utc::now(),
        };
        self.records.write().await.push(record.clone());
        self.sequence.store(record.sequence, Ordering::SeqCst);

        info!(
            sequence = record.sequence,
            commit = %record.commit,
            rebased,
            "merged into trunk"
        );
        Ok(record)
    }

    /// All merges in trunk order.
    pub async fn history(&self) -> Vec<MergeRecord> {
        self.records.read().await.clone()
    }

    pub fn merge_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Seed the history with merges from an earlier run, so sequence
    /// numbers continue where it stopped.
    pub async fn restore(&self, records: Vec<MergeRecord>) {
        let _guard = self.merge_lock.lock().await;
        let last = records.iter().map(|r| r.sequence).max().unwrap_or(0);
        *self.records.write().await = records;
        self.sequence.store(last, Ordering::SeqCst);
        info!(merges = last, "merge history restored");
    }
}
