//! Common test utilities for integration tests
//!
//! In-memory stand-ins for every port, plus helpers that wire the engine
//! services the way `build_engine` does.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tempfile::TempDir;

use evochamber::domain::errors::{DomainError, DomainResult};
use evochamber::domain::models::{
    ClassifierVerdict, JudgeVerdict, ResourceClassConfig, ResourceNeed, TestCounts, WorkItemSpec,
};
use evochamber::domain::ports::{
    AgentExit, AgentProcess, AgentRequest, BuildAgent, ModelResidency, RebaseOutcome, TestRun,
    TestRunner, VersionControl, VisualClassifier, VisualJudge,
};
use evochamber::domain::models::{CommandTierConfig, Severity, TierKind, VisualTierConfig};
use evochamber::domain::ports::VerificationTier;
use evochamber::services::{
    AllocatorConfig, BuilderSupervisor, CommandTier, EngineComponents, EngineSettings,
    HardeningService, MergeCoordinator, Orchestrator, ResourceScheduler, SupervisorConfig,
    VerificationPipeline, VisualTier, WorkItemGraph, WorkspaceAllocator,
};

/// Shared, ordered record of side effects across mocks.
#[derive(Clone, Default)]
pub struct Journal(Arc<StdMutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries starting with any of `prefixes`, in order.
    pub fn filtered(&self, prefixes: &[&str]) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| prefixes.iter().any(|p| e.starts_with(p)))
            .collect()
    }
}

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ---------------------------------------------------------------------------
// Version control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BranchState {
    pub path: PathBuf,
    pub base: String,
}

#[derive(Default)]
struct VcsState {
    trunk: Vec<String>,
    counter: usize,
    branches: HashMap<String, BranchState>,
    snapshots: HashSet<PathBuf>,
    merged: Vec<String>,
    conflicts: HashSet<String>,
    snapshot_files: Vec<String>,
    advance_on_commit: bool,
}

/// In-memory trunk with real workspace directories on disk.
///
/// Workspace directories are created so agents can write files and `diff`
/// lists whatever they wrote.
pub struct MockVcs {
    state: StdMutex<VcsState>,
    pub journal: Journal,
}

impl MockVcs {
    pub fn new(journal: Journal) -> Self {
        Self {
            state: StdMutex::new(VcsState {
                trunk: vec!["root".to_string()],
                ..VcsState::default()
            }),
            journal,
        }
    }

    /// Simulate an unrelated commit landing on trunk.
    pub fn advance_trunk(&self) -> String {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let commit = format!("ext{}", state.counter);
        state.trunk.push(commit.clone());
        commit
    }

    /// Rebases of branches containing `fragment` conflict.
    pub fn conflict_on(&self, fragment: &str) {
        self.state.lock().unwrap().conflicts.insert(fragment.to_string());
    }

    /// Land an unrelated trunk commit whenever an agent's work is committed,
    /// so every merge has to rebase.
    pub fn advance_on_commit(&self) {
        self.state.lock().unwrap().advance_on_commit = true;
    }

    /// Every later snapshot checkout contains `rel_path`.
    pub fn seed_snapshot_file(&self, rel_path: &str) {
        self.state
            .lock()
            .unwrap()
            .snapshot_files
            .push(rel_path.to_string());
    }

    pub fn clear_conflicts(&self) {
        self.state.lock().unwrap().conflicts.clear();
    }

    pub fn trunk(&self) -> Vec<String> {
        self.state.lock().unwrap().trunk.clone()
    }

    /// Branches merged into trunk, in order.
    pub fn merged_branches(&self) -> Vec<String> {
        self.state.lock().unwrap().merged.clone()
    }

    pub fn live_branches(&self) -> usize {
        self.state.lock().unwrap().branches.len()
    }

    pub fn live_snapshots(&self) -> usize {
        self.state.lock().unwrap().snapshots.len()
    }

    fn branch_at(&self, path: &Path) -> Option<(String, BranchState)> {
        self.state
            .lock()
            .unwrap()
            .branches
            .iter()
            .find(|(_, b)| b.path == path)
            .map(|(name, b)| (name.clone(), b.clone()))
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn trunk_tip(&self) -> DomainResult<String> {
        Ok(self.state.lock().unwrap().trunk.last().cloned().unwrap_or_default())
    }

    async fn create_branch(&self, branch: &str, path: &Path, base: &str) -> DomainResult<()> {
        std::fs::create_dir_all(path)?;
        self.state.lock().unwrap().branches.insert(
            branch.to_string(),
            BranchState {
                path: path.to_path_buf(),
                base: base.to_string(),
            },
        );
        self.journal.push(format!("create {branch}"));
        Ok(())
    }

    async fn commit_all(&self, path: &Path, _message: &str) -> DomainResult<String> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let head = format!("c{}-{}", state.counter, list_files(path).len());
        if state.advance_on_commit {
            state.counter += 1;
            let commit = format!("ext{}", state.counter);
            state.trunk.push(commit);
        }
        Ok(head)
    }

    async fn diff(&self, path: &Path, _base: &str) -> DomainResult<Vec<String>> {
        Ok(list_files(path))
    }

    async fn rebase(&self, path: &Path) -> DomainResult<RebaseOutcome> {
        let (name, _) = self
            .branch_at(path)
            .ok_or_else(|| DomainError::VersionControl(format!("no branch at {}", path.display())))?;
        let mut state = self.state.lock().unwrap();
        if state.conflicts.iter().any(|c| name.contains(c.as_str())) {
            self.journal.push(format!("rebase-conflict {name}"));
            return Ok(RebaseOutcome::Conflict {
                files: vec!["src/shared.rs".to_string()],
            });
        }
        let tip = state.trunk.last().cloned().unwrap_or_default();
        if let Some(branch) = state.branches.get_mut(&name) {
            branch.base = tip.clone();
        }
        self.journal.push(format!("rebase {name}"));
        Ok(RebaseOutcome::Clean { new_base: tip })
    }

    async fn merge(&self, branch: &str, _message: &str) -> DomainResult<String> {
        let mut state = self.state.lock().unwrap();
        if !state.branches.contains_key(branch) {
            return Err(DomainError::VersionControl(format!("unknown branch {branch}")));
        }
        state.counter += 1;
        let commit = format!("m{}", state.counter);
        state.trunk.push(commit.clone());
        state.merged.push(branch.to_string());
        self.journal.push(format!("merge {branch}"));
        Ok(commit)
    }

    async fn delete_branch(&self, branch: &str, path: &Path) -> DomainResult<()> {
        let _ = std::fs::remove_dir_all(path);
        self.state.lock().unwrap().branches.remove(branch);
        self.journal.push(format!("delete {branch}"));
        Ok(())
    }

    async fn checkout_snapshot(&self, commit: &str, path: &Path) -> DomainResult<()> {
        std::fs::create_dir_all(path)?;
        let files = self.state.lock().unwrap().snapshot_files.clone();
        for rel in files {
            let file = path.join(rel);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(file, b"\x89PNG")?;
        }
        self.state.lock().unwrap().snapshots.insert(path.to_path_buf());
        self.journal.push(format!("snapshot {commit}"));
        Ok(())
    }

    async fn remove_snapshot(&self, path: &Path) -> DomainResult<()> {
        let _ = std::fs::remove_dir_all(path);
        self.state.lock().unwrap().snapshots.remove(path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Build agents
// ---------------------------------------------------------------------------

/// What one scripted agent run does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Write the files, then report success
    Succeed(Vec<&'static str>),
    /// Write the files, then report partial
    Partial(Vec<&'static str>),
    /// Write one file with the given content, then report success
    SucceedWith(&'static str, &'static str),
    /// Write the files, then report success with failing test counts
    SucceedFailingTests(Vec<&'static str>, u32),
    /// Exit nonzero
    Fail,
    /// Exit zero without a JSON summary
    Malformed,
    /// Never exit
    Hang,
    /// Refuse to start
    SpawnError,
}

fn summary_json(status: &str, files: &[&str]) -> String {
    serde_json::json!({
        "status": status,
        "files_touched": files,
        "summary": format!("{status} run"),
    })
    .to_string()
}

/// Agent replaying a queue of scripts, then a default.
pub struct ScriptedAgent {
    name: String,
    scripts: StdMutex<VecDeque<Script>>,
    default: Script,
    failing_items: StdMutex<HashSet<String>>,
    pub requests: StdMutex<Vec<AgentRequest>>,
    journal: Journal,
}

impl ScriptedAgent {
    pub fn new(name: &str, scripts: Vec<Script>, default: Script, journal: Journal) -> Self {
        Self {
            name: name.to_string(),
            scripts: StdMutex::new(scripts.into()),
            default,
            failing_items: StdMutex::new(HashSet::new()),
            requests: StdMutex::new(Vec::new()),
            journal,
        }
    }

    pub fn always(name: &str, script: Script, journal: Journal) -> Self {
        Self::new(name, Vec::new(), script, journal)
    }

    /// Always fail for workspaces of item `id`, whatever the script says.
    #[must_use]
    pub fn failing_for(self, id: &str) -> Self {
        self.failing_items.lock().unwrap().insert(id.to_string());
        self
    }

    /// Replace the set of items this agent always fails for.
    pub fn fail_items(&self, ids: &[&str]) {
        let mut failing = self.failing_items.lock().unwrap();
        failing.clear();
        failing.extend(ids.iter().map(|id| id.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn spawn(&self, request: AgentRequest) -> DomainResult<Box<dyn AgentProcess>> {
        let workspace = request.workspace_path.clone();
        let dir_name = workspace
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let fails = self
            .failing_items
            .lock()
            .unwrap()
            .iter()
            .any(|id| dir_name.starts_with(&format!("{id}-")));
        let script = if fails {
            Script::Fail
        } else {
            self.scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default.clone())
        };
        self.requests.lock().unwrap().push(request);
        self.journal.push(format!("spawn {}", self.name));

        if matches!(script, Script::SpawnError) {
            return Err(DomainError::ExecutionFailed("no such program".to_string()));
        }
        match &script {
            Script::Succeed(files) | Script::Partial(files) | Script::SucceedFailingTests(files, _) => {
                for file in files {
                    std::fs::write(workspace.join(file), b"generated")?;
                }
            }
            Script::SucceedWith(file, content) => std::fs::write(workspace.join(file), content)?,
            _ => {}
        }

        Ok(Box::new(ScriptedProcess {
            script,
            journal: self.journal.clone(),
            agent: self.name.clone(),
        }))
    }
}

struct ScriptedProcess {
    script: Script,
    journal: Journal,
    agent: String,
}

#[async_trait]
impl AgentProcess for ScriptedProcess {
    async fn wait(&mut self) -> DomainResult<AgentExit> {
        match &self.script {
            Script::Succeed(files) => Ok(AgentExit {
                success: true,
                exit_code: Some(0),
                stdout: format!("working...\n{}", summary_json("success", files)),
                stderr: String::new(),
            }),
            Script::SucceedWith(file, _) => Ok(AgentExit {
                success: true,
                exit_code: Some(0),
                stdout: summary_json("success", &[*file]),
                stderr: String::new(),
            }),
            Script::SucceedFailingTests(files, failed) => Ok(AgentExit {
                success: true,
                exit_code: Some(0),
                stdout: serde_json::json!({
                    "status": "success",
                    "files_touched": files,
                    "tests": {"passed": 10, "failed": failed},
                })
                .to_string(),
                stderr: String::new(),
            }),
            Script::Partial(files) => Ok(AgentExit {
                success: true,
                exit_code: Some(0),
                stdout: summary_json("partial", files),
                stderr: String::new(),
            }),
            Script::Fail => Ok(AgentExit {
                success: false,
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "compilation error in src/lib.rs".to_string(),
            }),
            Script::Malformed => Ok(AgentExit {
                success: true,
                exit_code: Some(0),
                stdout: "all done, trust me".to_string(),
                stderr: String::new(),
            }),
            Script::Hang => std::future::pending().await,
            Script::SpawnError => unreachable!(),
        }
    }

    async fn kill(&mut self) -> DomainResult<()> {
        self.journal.push(format!("kill {}", self.agent));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test runner
// ---------------------------------------------------------------------------

/// Test runner answering by command, with per-command queued overrides.
#[derive(Default)]
pub struct MockTestRunner {
    queued: StdMutex<HashMap<String, VecDeque<bool>>>,
    failing: StdMutex<HashSet<String>>,
    unparsed: StdMutex<HashSet<String>>,
    delay: StdMutex<Option<Duration>>,
    pub runs: StdMutex<Vec<(PathBuf, String)>>,
}

impl MockTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// `command` fails until told otherwise.
    pub fn fail(&self, command: &str) {
        self.failing.lock().unwrap().insert(command.to_string());
    }

    /// Queue one-shot results for `command`, consumed in order.
    pub fn queue(&self, command: &str, results: &[bool]) {
        self.queued
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .extend(results.iter().copied());
    }

    /// `command` exits zero but prints nothing that parses as a summary.
    pub fn unparsed(&self, command: &str) {
        self.unparsed.lock().unwrap().insert(command.to_string());
    }

    /// Every later run sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn run_count(&self, command: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| c == command)
            .count()
    }
}

#[async_trait]
impl TestRunner for MockTestRunner {
    async fn run(&self, dir: &Path, command: &str) -> DomainResult<TestRun> {
        self.runs
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), command.to_string()));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unparsed.lock().unwrap().contains(command) {
            return Ok(TestRun {
                passed: true,
                counts: None,
                output: "ok".to_string(),
            });
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(command)
            .and_then(VecDeque::pop_front);
        let passed =
            queued.unwrap_or_else(|| !self.failing.lock().unwrap().contains(command));

        Ok(TestRun {
            passed,
            counts: Some(if passed {
                TestCounts { passed: 4, failed: 0 }
            } else {
                TestCounts { passed: 3, failed: 1 }
            }),
            output: if passed {
                "4 passed".to_string()
            } else {
                "FAILED test_login - assert 401 == 200\n3 passed, 1 failed".to_string()
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Visual classifier, judge, residency
// ---------------------------------------------------------------------------

pub struct FixedClassifier {
    pub confidence: f64,
    pub calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisualClassifier for FixedClassifier {
    async fn classify(&self, _screenshot: &Path, _context: &str) -> DomainResult<ClassifierVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ClassifierVerdict {
            confidence: self.confidence,
            issues: Vec::new(),
        })
    }
}

pub struct CountingJudge {
    pub passed: bool,
    pub calls: AtomicUsize,
}

impl CountingJudge {
    pub fn new(passed: bool) -> Self {
        Self {
            passed,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisualJudge for CountingJudge {
    async fn judge(&self, _screenshot: &Path, _context: &str) -> DomainResult<JudgeVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(JudgeVerdict {
            passed: self.passed,
            issues: if self.passed {
                Vec::new()
            } else {
                vec!["header overlaps navigation".to_string()]
            },
        })
    }
}

/// Records warm and unload calls in the journal.
pub struct RecordingResidency {
    pub journal: Journal,
}

#[async_trait]
impl ModelResidency for RecordingResidency {
    async fn warm(&self, model: &str) -> DomainResult<()> {
        self.journal.push(format!("warm {model}"));
        Ok(())
    }

    async fn unload(&self, model: &str) -> DomainResult<()> {
        self.journal.push(format!("unload {model}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

pub const BUILD_CLASS: &str = "build-slots";
pub const BUILD_MODEL: &str = "coder:30b";

pub fn resource_classes() -> Vec<ResourceClassConfig> {
    vec![
        ResourceClassConfig {
            name: BUILD_CLASS.to_string(),
            capacity: 3,
            model: Some(BUILD_MODEL.to_string()),
        },
        ResourceClassConfig {
            name: "vision-inference".to_string(),
            capacity: 2,
            model: None,
        },
        ResourceClassConfig {
            name: "heavy-inference".to_string(),
            capacity: 1,
            model: None,
        },
    ]
}

pub fn specs(items: &[(&str, &[&str])]) -> Vec<WorkItemSpec> {
    items
        .iter()
        .map(|(id, deps)| {
            WorkItemSpec::new(*id, format!("Feature {id}")).with_dependencies(deps.iter().copied())
        })
        .collect()
}

/// Supervisor plus the collaborators tests inspect.
pub struct SupervisorHarness {
    pub _root: TempDir,
    pub journal: Journal,
    pub vcs: Arc<MockVcs>,
    pub allocator: Arc<WorkspaceAllocator>,
    pub scheduler: Arc<ResourceScheduler>,
    pub primary: Arc<ScriptedAgent>,
    pub fallback: Arc<ScriptedAgent>,
    pub tests: Arc<MockTestRunner>,
    pub supervisor: BuilderSupervisor,
}

pub fn supervisor_config(timeout: Duration, test_command: Option<&str>) -> SupervisorConfig {
    SupervisorConfig {
        primary_timeout: timeout,
        fallback_timeout: timeout,
        test_command: test_command.map(str::to_string),
        resource: Some(ResourceNeed::shared(BUILD_CLASS, 1)),
        review: true,
    }
}

pub fn supervisor_harness(
    primary: Vec<Script>,
    fallback: Vec<Script>,
    config: SupervisorConfig,
) -> SupervisorHarness {
    let root = tempfile::tempdir().unwrap();
    let journal = Journal::default();
    let vcs = Arc::new(MockVcs::new(journal.clone()));
    let allocator = Arc::new(WorkspaceAllocator::new(
        vcs.clone(),
        AllocatorConfig {
            workspace_root: root.path().join("workspaces"),
            branch_prefix: "evo".to_string(),
        },
    ));
    let scheduler = Arc::new(
        ResourceScheduler::new(resource_classes()).with_residency(Arc::new(RecordingResidency {
            journal: journal.clone(),
        })),
    );
    let primary = Arc::new(ScriptedAgent::new("primary", primary, Script::Fail, journal.clone()));
    let fallback = Arc::new(ScriptedAgent::new("fallback", fallback, Script::Fail, journal.clone()));
    let tests = Arc::new(MockTestRunner::new());

    let supervisor = BuilderSupervisor::new(
        allocator.clone(),
        scheduler.clone(),
        vcs.clone(),
        primary.clone(),
        fallback.clone(),
        tests.clone(),
        config,
    );

    SupervisorHarness {
        _root: root,
        journal,
        vcs,
        allocator,
        scheduler,
        primary,
        fallback,
        tests,
        supervisor,
    }
}

pub const UNIT_CMD: &str = "make unit";
pub const LOCAL_CMD: &str = "make check";

/// Full engine over mocks. Unit tier runs `UNIT_CMD`; the visual tier uses
/// the given classifier confidence and judge verdict.
pub struct EngineHarness {
    pub root: TempDir,
    pub journal: Journal,
    pub vcs: Arc<MockVcs>,
    pub allocator: Arc<WorkspaceAllocator>,
    pub scheduler: Arc<ResourceScheduler>,
    pub primary: Arc<ScriptedAgent>,
    pub fallback: Arc<ScriptedAgent>,
    pub tests: Arc<MockTestRunner>,
    pub classifier: Arc<FixedClassifier>,
    pub judge: Arc<CountingJudge>,
    pub pipeline: Arc<VerificationPipeline>,
    pub merger: Arc<MergeCoordinator>,
    pub components: EngineComponents,
    pub settings: EngineSettings,
}

impl EngineHarness {
    pub fn new(primary: ScriptedAgent, fallback: ScriptedAgent, journal: Journal) -> Self {
        let root = tempfile::tempdir().unwrap();
        let vcs = Arc::new(MockVcs::new(journal.clone()));
        let allocator = Arc::new(WorkspaceAllocator::new(
            vcs.clone(),
            AllocatorConfig {
                workspace_root: root.path().join("workspaces"),
                branch_prefix: "evo".to_string(),
            },
        ));
        let scheduler = Arc::new(
            ResourceScheduler::new(resource_classes()).with_residency(Arc::new(
                RecordingResidency {
                    journal: journal.clone(),
                },
            )),
        );
        let primary = Arc::new(primary);
        let fallback = Arc::new(fallback);
        let tests = Arc::new(MockTestRunner::new());
        let classifier = Arc::new(FixedClassifier::new(0.95));
        let judge = Arc::new(CountingJudge::new(true));

        let supervisor = Arc::new(BuilderSupervisor::new(
            allocator.clone(),
            scheduler.clone(),
            vcs.clone(),
            primary.clone(),
            fallback.clone(),
            tests.clone(),
            supervisor_config(Duration::from_secs(5), None),
        ));
        let merger = Arc::new(MergeCoordinator::new(
            vcs.clone(),
            tests.clone(),
            allocator.clone(),
            Some(LOCAL_CMD.to_string()),
        ));
        let tiers: Vec<Arc<dyn VerificationTier>> = vec![
            Arc::new(CommandTier::new(
                TierKind::Unit,
                tests.clone(),
                CommandTierConfig {
                    command: Some(UNIT_CMD.to_string()),
                    severity: Severity::High,
                },
            )),
            Arc::new(VisualTier::new(
                classifier.clone(),
                judge.clone(),
                scheduler.clone(),
                VisualTierConfig::default(),
            )),
        ];
        let pipeline = Arc::new(VerificationPipeline::new(
            vcs.clone(),
            tiers,
            root.path().join("snapshots"),
        ));
        let hardening = Arc::new(HardeningService::new(
            vcs.clone(),
            tests.clone(),
            Vec::new(),
            root.path().join("snapshots"),
        ));

        let components = EngineComponents {
            vcs: vcs.clone(),
            allocator: allocator.clone(),
            scheduler: scheduler.clone(),
            supervisor,
            merger: merger.clone(),
            pipeline: pipeline.clone(),
            hardening,
        };
        let settings = EngineSettings {
            max_parallel_builders: 2,
            max_fix_cycles: 2,
            max_stale_retries: 2,
            state_dir: root.path().join("state"),
        };

        Self {
            root,
            journal,
            vcs,
            allocator,
            scheduler,
            primary,
            fallback,
            tests,
            classifier,
            judge,
            pipeline,
            merger,
            components,
            settings,
        }
    }

    pub fn orchestrator(&self, items: Vec<WorkItemSpec>) -> Orchestrator {
        let graph = WorkItemGraph::new(items).unwrap();
        Orchestrator::new(graph, self.components.clone(), self.settings.clone())
    }
}

/// Initialize a git repository with one commit on `main`.
pub fn setup_test_git_repo(dir: &Path) -> bool {
    let run = |args: &[&str]| {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    };
    run(&["init", "-q", "-b", "main"])
        && run(&["config", "user.email", "test@example.com"])
        && run(&["config", "user.name", "Test User"])
        && run(&["commit", "-q", "--allow-empty", "-m", "Initial commit"])
}
