//! Hardening pass over final trunk.
//!
//! Runs each configured check once, in order, against a snapshot of the
//! final trunk commit. Checks only produce issues; item status is untouched.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{HardeningCheckConfig, Issue};
use crate::domain::ports::{TestRunner, VersionControl};

pub struct HardeningService {
    vcs: Arc<dyn VersionControl>,
    tests: Arc<dyn TestRunner>,
    checks: Vec<HardeningCheckConfig>,
    snapshot_root: PathBuf,
}

impl HardeningService {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        tests: Arc<dyn TestRunner>,
        checks: Vec<HardeningCheckConfig>,
        snapshot_root: PathBuf,
    ) -> Self {
        Self {
            vcs,
            tests,
            checks,
            snapshot_root,
        }
    }

    #[instrument(skip(self), fields(checks = self.checks.len()))]
    pub async fn run(&self, trunk_commit: &str) -> DomainResult<Vec<Issue>> {
        if self.checks.is_empty() {
            return Ok(Vec::new());
        }

        let checkout = self
            .snapshot_root
            .join(format!("hardening-{}", &Uuid::new_v4().simple().to_string()[..8]));
        self.vcs.checkout_snapshot(trunk_commit, &checkout).await?;

        let mut issues = Vec::new();
        for check in &self.checks {
            let tier = format!("hardening:{}", check.name);
            match self.tests.run(&checkout, &check.command).await {
                Ok(run) if run.passed => info!(check = %check.name, "hardening check passed"),
                Ok(run) => {
                    warn!(check = %check.name, "hardening check failed");
                    let last = run.output.lines().last().unwrap_or_default().to_string();
                    issues.push(Issue::new(
                        check.severity,
                        tier,
                        format!("`{}` failed: {last}", check.command),
                    ));
                }
                Err(e) => issues.push(Issue::new(
                    check.severity,
                    tier,
                    format!("`{}` could not run: {e}", check.command),
                )),
            }
        }

        if let Err(e) = self.vcs.remove_snapshot(&checkout).await {
            warn!(path = %checkout.display(), error = %e, "failed to remove hardening snapshot");
        }
        Ok(issues)
    }
}
