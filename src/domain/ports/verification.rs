//! Verification ports: tiers and the two-stage visual classifier.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ClassifierVerdict, JudgeVerdict, TierKind, TierReport, WorkItem};

/// What a tier runs against: a read-only checkout of a trunk commit.
#[derive(Debug, Clone)]
pub struct VerificationContext {
    pub item: WorkItem,
    pub trunk_commit: String,
    pub checkout: PathBuf,
    pub cycle: u32,
}

/// One ordered verification tier.
#[async_trait]
pub trait VerificationTier: Send + Sync {
    fn kind(&self) -> TierKind;

    async fn verify(&self, ctx: &VerificationContext) -> DomainResult<TierReport>;
}

/// Fast, cheap pass producing a confidence score in [0,1].
#[async_trait]
pub trait VisualClassifier: Send + Sync {
    async fn classify(&self, screenshot: &Path, context: &str) -> DomainResult<ClassifierVerdict>;
}

/// Slower, more accurate judge for the ambiguous band.
#[async_trait]
pub trait VisualJudge: Send + Sync {
    async fn judge(&self, screenshot: &Path, context: &str) -> DomainResult<JudgeVerdict>;
}
