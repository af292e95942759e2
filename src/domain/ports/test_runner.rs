//! Test runner port.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::errors::DomainResult;
use crate::domain::models::TestCounts;

/// Result of one shell-level test command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    /// None when the output carried no recognizable summary
    pub counts: Option<TestCounts>,
    pub output: String,
}

/// Runs a single shell command in a directory and reports pass/fail counts.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, dir: &Path, command: &str) -> DomainResult<TestRun>;
}
