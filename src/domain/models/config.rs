use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::lease::ResourceNeed;
use super::verification::{Severity, VisualThresholds};

/// Main configuration structure for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Trunk repository and workspace layout
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Batch scheduling limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Build agent tiers and local test command
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Verification tier configuration
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Capacity-constrained resource classes
    #[serde(default)]
    pub resources: ResourcesConfig,

    /// Local inference service
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Post-build quality checks
    #[serde(default)]
    pub hardening: HardeningConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Repository layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RepositoryConfig {
    /// Path to the trunk checkout
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Branch all workspaces branch from and merge into
    #[serde(default = "default_trunk_branch")]
    pub trunk_branch: String,

    /// Directory holding workspace checkouts, relative to root unless absolute
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Prefix for workspace branch names
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Directory for status snapshots and the delivery report
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_trunk_branch() -> String {
    "main".to_string()
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from(".evochamber/workspaces")
}

fn default_branch_prefix() -> String {
    "evo".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".evochamber")
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            trunk_branch: default_trunk_branch(),
            workspace_dir: default_workspace_dir(),
            branch_prefix: default_branch_prefix(),
            state_dir: default_state_dir(),
        }
    }
}

impl RepositoryConfig {
    pub fn workspace_root(&self) -> PathBuf {
        if self.workspace_dir.is_absolute() {
            self.workspace_dir.clone()
        } else {
            self.root.join(&self.workspace_dir)
        }
    }

    pub fn state_root(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.root.join(&self.state_dir)
        }
    }
}

/// Orchestrator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Concurrently active workspaces
    #[serde(default = "default_max_parallel_builders")]
    pub max_parallel_builders: usize,

    /// Fix cycles per item after blocking verification issues
    #[serde(default = "default_max_fix_cycles")]
    pub max_fix_cycles: u32,

    /// Stale-base returns to Ready before an item is failed
    #[serde(default = "default_max_stale_retries")]
    pub max_stale_retries: u32,

    /// Capacity of the engine event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

const fn default_max_parallel_builders() -> usize {
    3
}

const fn default_max_fix_cycles() -> u32 {
    3
}

const fn default_max_stale_retries() -> u32 {
    2
}

const fn default_event_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_builders: default_max_parallel_builders(),
            max_fix_cycles: default_max_fix_cycles(),
            max_stale_retries: default_max_stale_retries(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// One agent tier's invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentTierConfig {
    /// Program to spawn
    pub program: String,

    /// Arguments; `{workspace}` and `{tier}` are substituted
    #[serde(default)]
    pub args: Vec<String>,

    /// Wall-clock limit for one attempt
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL on cancellation
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

const fn default_agent_timeout_secs() -> u64 {
    4 * 60 * 60
}

const fn default_kill_grace_secs() -> u64 {
    5
}

/// Builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BuilderConfig {
    #[serde(default = "default_primary_agent")]
    pub primary: AgentTierConfig,

    #[serde(default = "default_fallback_agent")]
    pub fallback: AgentTierConfig,

    /// Shell command run inside the workspace after a successful attempt
    #[serde(default)]
    pub test_command: Option<String>,

    /// Lease held while an agent runs
    #[serde(default)]
    pub resource: Option<ResourceNeed>,

    /// Review changed files for placeholder code before accepting a success
    #[serde(default = "default_true")]
    pub review: bool,
}

fn default_primary_agent() -> AgentTierConfig {
    AgentTierConfig {
        program: "codex".to_string(),
        args: vec![
            "exec".to_string(),
            "--full-auto".to_string(),
            "--cd".to_string(),
            "{workspace}".to_string(),
        ],
        timeout_secs: default_agent_timeout_secs(),
        kill_grace_secs: default_kill_grace_secs(),
    }
}

fn default_fallback_agent() -> AgentTierConfig {
    AgentTierConfig {
        program: "claude".to_string(),
        args: vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "text".to_string(),
        ],
        timeout_secs: default_agent_timeout_secs(),
        kill_grace_secs: default_kill_grace_secs(),
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_agent(),
            fallback: default_fallback_agent(),
            test_command: None,
            resource: None,
            review: true,
        }
    }
}

/// A verification tier backed by a shell command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandTierConfig {
    /// Command to run against the trunk snapshot; skipped when unset
    #[serde(default)]
    pub command: Option<String>,

    /// Severity of the issue raised when the command fails
    #[serde(default = "default_tier_severity")]
    pub severity: Severity,
}

const fn default_tier_severity() -> Severity {
    Severity::High
}

impl Default for CommandTierConfig {
    fn default() -> Self {
        Self {
            command: None,
            severity: default_tier_severity(),
        }
    }
}

/// Visual tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VisualTierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Screenshot directory, relative to the trunk snapshot
    #[serde(default = "default_evidence_dir")]
    pub evidence_dir: PathBuf,

    #[serde(default)]
    pub thresholds: VisualThresholds,

    /// Fast classifier model
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,

    /// Escalation judge model
    #[serde(default = "default_judge_model")]
    pub judge_model: String,

    /// Lease held by the fast pass
    #[serde(default = "default_vision_need")]
    pub resource: Option<ResourceNeed>,

    /// Lease held by the judge
    #[serde(default = "default_judge_need")]
    pub judge_resource: Option<ResourceNeed>,
}

const fn default_true() -> bool {
    true
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_classifier_model() -> String {
    "qwen2.5vl:7b".to_string()
}

fn default_judge_model() -> String {
    "qwen2.5vl:32b".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_vision_need() -> Option<ResourceNeed> {
    Some(ResourceNeed::shared("vision-inference", 1))
}

#[allow(clippy::unnecessary_wraps)]
fn default_judge_need() -> Option<ResourceNeed> {
    Some(ResourceNeed::exclusive("heavy-inference"))
}

impl Default for VisualTierConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            evidence_dir: default_evidence_dir(),
            thresholds: VisualThresholds::default(),
            classifier_model: default_classifier_model(),
            judge_model: default_judge_model(),
            resource: default_vision_need(),
            judge_resource: default_judge_need(),
        }
    }
}

/// Verification pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VerificationConfig {
    #[serde(default)]
    pub unit: CommandTierConfig,

    #[serde(default)]
    pub integration: CommandTierConfig,

    #[serde(default)]
    pub visual: VisualTierConfig,

    #[serde(default = "default_sweep_tier")]
    pub sweep: CommandTierConfig,
}

fn default_sweep_tier() -> CommandTierConfig {
    CommandTierConfig {
        command: None,
        severity: Severity::Medium,
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            unit: CommandTierConfig::default(),
            integration: CommandTierConfig::default(),
            visual: VisualTierConfig::default(),
            sweep: default_sweep_tier(),
        }
    }
}

/// One resource class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceClassConfig {
    pub name: String,
    pub capacity: u32,
    /// Model kept warm while the class has holders
    #[serde(default)]
    pub model: Option<String>,
}

/// Resource pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourcesConfig {
    #[serde(default = "default_resource_classes")]
    pub classes: Vec<ResourceClassConfig>,
}

fn default_resource_classes() -> Vec<ResourceClassConfig> {
    vec![
        ResourceClassConfig {
            name: "heavy-inference".to_string(),
            capacity: 1,
            model: Some("qwen2.5vl:32b".to_string()),
        },
        ResourceClassConfig {
            name: "vision-inference".to_string(),
            capacity: 2,
            model: Some("qwen2.5vl:7b".to_string()),
        },
    ]
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            classes: default_resource_classes(),
        }
    }
}

/// Local inference service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InferenceConfig {
    #[serde(default = "default_inference_url")]
    pub base_url: String,

    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts for transient failures, including the first
    #[serde(default = "default_inference_retries")]
    pub max_retries: u32,

    /// How long a warmed model stays resident
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_inference_url() -> String {
    "http://localhost:11434".to_string()
}

const fn default_inference_timeout_secs() -> u64 {
    120
}

const fn default_inference_retries() -> u32 {
    3
}

fn default_keep_alive() -> String {
    "30m".to_string()
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_url(),
            timeout_secs: default_inference_timeout_secs(),
            max_retries: default_inference_retries(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// One hardening check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HardeningCheckConfig {
    pub name: String,
    pub command: String,
    #[serde(default = "default_hardening_severity")]
    pub severity: Severity,
}

const fn default_hardening_severity() -> Severity {
    Severity::Medium
}

/// Hardening phase configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HardeningConfig {
    #[serde(default)]
    pub checks: Vec<HardeningCheckConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling JSON log files (stdout only if unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
