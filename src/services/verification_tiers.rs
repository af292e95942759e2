//! Concrete verification tiers.
//!
//! `CommandTier` backs unit, integration and sweep with a shell command.
//! `VisualTier` runs the two-stage screenshot classifier.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CommandTierConfig, EvidenceRef, Issue, ResourceLease, ResourceNeed, Severity, TierKind, TierReport,
    VisualDecision, VisualTierConfig,
};
use crate::domain::ports::{
    TestRunner, VerificationContext, VerificationTier, VisualClassifier, VisualJudge,
};
use crate::services::resource_scheduler::ResourceScheduler;

const SCREENSHOT_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
const OUTPUT_TAIL_LINES: usize = 20;

/// A tier that passes when its shell command exits cleanly.
pub struct CommandTier {
    kind: TierKind,
    runner: Arc<dyn TestRunner>,
    config: CommandTierConfig,
}

impl CommandTier {
    pub fn new(kind: TierKind, runner: Arc<dyn TestRunner>, config: CommandTierConfig) -> Self {
        Self {
            kind,
            runner,
            config,
        }
    }
}

#[async_trait]
impl VerificationTier for CommandTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    #[instrument(skip(self, ctx), fields(tier = %self.kind, item = %ctx.item.id))]
    async fn verify(&self, ctx: &VerificationContext) -> DomainResult<TierReport> {
        let Some(command) = &self.config.command else {
            debug!("no command configured, tier skipped");
            return Ok(TierReport::passed());
        };

        let mut report = TierReport::passed();
        report.evidence.push(EvidenceRef::new("command", command.clone()));

        match self.runner.run(&ctx.checkout, command).await {
            Ok(run) if run.passed => {
                debug!(counts = ?run.counts, "tier command passed");
            }
            Ok(run) => {
                let counts = run
                    .counts
                    .map(|c| format!(" ({} passed, {} failed)", c.passed, c.failed))
                    .unwrap_or_default();
                report.issues.push(Issue::new(
                    self.config.severity,
                    self.kind.as_str(),
                    format!("`{command}` failed{counts}\n{}", output_tail(&run.output)),
                ));
            }
            Err(e) => {
                warn!(error = %e, "tier command could not run");
                report.issues.push(Issue::new(
                    self.config.severity,
                    self.kind.as_str(),
                    format!("`{command}` could not run: {e}"),
                ));
            }
        }
        Ok(report)
    }
}

/// Two-stage screenshot review: a fast classifier, escalating ambiguous
/// scores to a slower judge exactly once.
pub struct VisualTier {
    classifier: Arc<dyn VisualClassifier>,
    judge: Arc<dyn VisualJudge>,
    scheduler: Arc<ResourceScheduler>,
    config: VisualTierConfig,
}

impl VisualTier {
    pub fn new(
        classifier: Arc<dyn VisualClassifier>,
        judge: Arc<dyn VisualJudge>,
        scheduler: Arc<ResourceScheduler>,
        config: VisualTierConfig,
    ) -> Self {
        Self {
            classifier,
            judge,
            scheduler,
            config,
        }
    }

    async fn classify(&self, shot: &Path, context: &str, holder: &str) -> DomainResult<f64> {
        let lease = self.lease(self.config.resource.as_ref(), holder).await?;
        let verdict = self.classifier.classify(shot, context).await;
        if let Some(lease) = lease {
            self.scheduler.release(lease).await?;
        }

        Ok(match verdict {
            Ok(verdict) => verdict.confidence.clamp(0.0, 1.0),
            Err(e) => {
                warn!(screenshot = %shot.display(), error = %e, "classifier failed, scoring 0");
                0.0
            }
        })
    }

    async fn escalate(&self, shot: &Path, context: &str, holder: &str) -> DomainResult<Option<String>> {
        let lease = self.lease(self.config.judge_resource.as_ref(), holder).await?;
        let verdict = self.judge.judge(shot, context).await;
        if let Some(lease) = lease {
            self.scheduler.release(lease).await?;
        }

        Ok(match verdict {
            Ok(v) if v.passed => None,
            Ok(v) => Some(if v.issues.is_empty() {
                "judge rejected the screenshot".to_string()
            } else {
                v.issues.join("; ")
            }),
            Err(e) => Some(format!("judge failed: {e}")),
        })
    }

    async fn lease(
        &self,
        need: Option<&ResourceNeed>,
        holder: &str,
    ) -> DomainResult<Option<ResourceLease>> {
        match need {
            Some(need) => Ok(Some(self.scheduler.acquire(need, holder).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl VerificationTier for VisualTier {
    fn kind(&self) -> TierKind {
        TierKind::Visual
    }

    #[instrument(skip(self, ctx), fields(item = %ctx.item.id, cycle = ctx.cycle))]
    async fn verify(&self, ctx: &VerificationContext) -> DomainResult<TierReport> {
        if !self.config.enabled {
            return Ok(TierReport::passed());
        }

        let dir = ctx.checkout.join(&self.config.evidence_dir);
        let shots = collect_screenshots(&dir).await?;
        if shots.is_empty() {
            debug!(dir = %dir.display(), "no screenshots to review");
            return Ok(TierReport::passed());
        }

        let context = ctx.item.spec_text();
        let holder = format!("visual:{}", ctx.item.id);
        let thresholds = self.config.thresholds;
        let mut report = TierReport::passed();

        for shot in &shots {
            report
                .evidence
                .push(EvidenceRef::new("screenshot", shot.display().to_string()));

            let confidence = self.classify(shot, &context, &holder).await?;
            let decision = thresholds.decide(confidence);
            info!(screenshot = %shot.display(), confidence, ?decision, "screenshot classified");

            let rejection = match decision {
                VisualDecision::Accept => None,
                VisualDecision::Reject => Some(format!(
                    "confidence {confidence:.2} below {:.2}",
                    thresholds.reject_below
                )),
                VisualDecision::Escalate => self.escalate(shot, &context, &holder).await?,
            };

            if let Some(reason) = rejection {
                report.issues.push(Issue::new(
                    Severity::High,
                    TierKind::Visual.as_str(),
                    format!("{} rejected: {reason}", shot.display()),
                ));
            }
        }

        Ok(report)
    }
}

/// Screenshot files directly inside `dir`, sorted by name. A missing
/// directory yields none.
async fn collect_screenshots(dir: &Path) -> DomainResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut shots = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SCREENSHOT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && entry.file_type().await?.is_file() {
            shots.push(path);
        }
    }
    shots.sort();
    Ok(shots)
}

fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}
