//! Build agent adapter: one external process per attempt.
//!
//! Each tier is a configured program plus arguments. Placeholders in the
//! arguments are substituted per attempt:
//! - `{workspace}`: absolute workspace path
//! - `{tier}`: `primary` or `fallback`
//! - `{spec_file}`: file holding the prompt
//!
//! The prompt is also written to stdin and exported as `EVOCHAMBER_SPEC_FILE`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentTierConfig;
use crate::domain::ports::{AgentExit, AgentProcess, AgentRequest, BuildAgent};

pub const SPEC_FILE_ENV: &str = "EVOCHAMBER_SPEC_FILE";

/// `BuildAgent` that runs a configured CLI.
#[derive(Debug, Clone)]
pub struct ProcessAgent {
    name: String,
    config: AgentTierConfig,
}

impl ProcessAgent {
    pub fn new(name: impl Into<String>, config: AgentTierConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn render_args(&self, workspace: &str, tier: &str, spec_file: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{workspace}", workspace)
                    .replace("{tier}", tier)
                    .replace("{spec_file}", spec_file)
            })
            .collect()
    }
}

#[async_trait]
impl BuildAgent for ProcessAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, request: AgentRequest) -> DomainResult<Box<dyn AgentProcess>> {
        let workspace = std::path::absolute(&request.workspace_path)?;
        let workspace_arg = workspace.to_string_lossy().into_owned();
        let prompt = request.prompt();

        let spec_file = std::env::temp_dir().join(format!("evochamber-spec-{}.md", Uuid::new_v4()));
        tokio::fs::write(&spec_file, prompt.as_bytes()).await?;
        let spec_arg = spec_file.to_string_lossy().into_owned();

        let args = self.render_args(&workspace_arg, request.tier.as_str(), &spec_arg);
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .current_dir(&workspace)
            .env(SPEC_FILE_ENV, &spec_file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let _ = std::fs::remove_file(&spec_file);
                DomainError::ExecutionFailed(format!(
                    "Failed to spawn agent '{}': {e}",
                    self.config.program
                ))
            })?;

        info!(
            agent = %self.name,
            pid = child.id(),
            workspace = %workspace.display(),
            "agent started"
        );

        if let Some(mut stdin) = child.stdin.take() {
            // Written from a task so an agent that never reads stdin cannot stall the spawn.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "agent closed stdin before reading the prompt");
                }
            });
        }

        let stdout = child.stdout.take().map(|out| collect_lines(out, "stdout"));
        let stderr = child.stderr.take().map(|err| collect_lines(err, "stderr"));

        Ok(Box::new(RunningAgent {
            child,
            stdout,
            stderr,
            spec_file,
            kill_grace: Duration::from_secs(self.config.kill_grace_secs),
        }))
    }
}

/// Read a pipe line by line until EOF.
fn collect_lines<R>(reader: R, stream: &'static str) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut collected = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(stream, line = %line, "agent output");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(stream, error = %e, "agent output read failed");
                    break;
                }
            }
        }
        collected
    })
}

struct RunningAgent {
    child: Child,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    spec_file: PathBuf,
    kill_grace: Duration,
}

async fn drain(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[async_trait]
impl AgentProcess for RunningAgent {
    async fn wait(&mut self) -> DomainResult<AgentExit> {
        // Waiting on the child is cancel-safe; output is drained only after exit.
        let status = self.child.wait().await?;
        let stdout = drain(self.stdout.take()).await;
        let stderr = drain(self.stderr.take()).await;

        Ok(AgentExit {
            success: status.success(),
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn kill(&mut self) -> DomainResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        terminate(&self.child);
        match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
            Ok(_) => info!("agent exited after SIGTERM"),
            Err(_) => {
                warn!(grace_secs = self.kill_grace.as_secs(), "agent ignored SIGTERM, killing");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

impl Drop for RunningAgent {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.spec_file);
    }
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}
