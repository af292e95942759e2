//! Build agent port - interface for external code-generation agents.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentTier;

/// What an agent is asked to do for one attempt.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub workspace_path: PathBuf,
    pub spec: String,
    pub failure_context: Option<String>,
    pub tier: AgentTier,
}

impl AgentRequest {
    /// Spec text with any prior failure context appended.
    pub fn prompt(&self) -> String {
        match &self.failure_context {
            Some(context) => format!(
                "{}\n\n## Previous attempt failed\n{}\nFix the problems above before doing anything else.",
                self.spec, context
            ),
            None => self.spec.clone(),
        }
    }
}

/// Raw terminal result of an agent process.
#[derive(Debug, Clone, Default)]
pub struct AgentExit {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// A running agent process.
#[async_trait]
pub trait AgentProcess: Send {
    /// Wait for the process to finish. Must be cancel-safe: dropping the
    /// future leaves the process running so it can be killed.
    async fn wait(&mut self) -> DomainResult<AgentExit>;

    /// Terminate the process.
    async fn kill(&mut self) -> DomainResult<()>;
}

/// Spawns one external process per attempt.
#[async_trait]
pub trait BuildAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn spawn(&self, request: AgentRequest) -> DomainResult<Box<dyn AgentProcess>>;
}
