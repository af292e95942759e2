//! Shell test runner with summary parsing for common test frameworks.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TestCounts;
use crate::domain::ports::{TestRun, TestRunner};

// Compile regexes once using LazyLock
static PYTEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=+\s*(.*?)\s*in\s+[\d.]+s\s*=+").unwrap());

static VITEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Tests\s+(.*?)\s*\((\d+)\)\s*$").unwrap());

static CARGO_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed").unwrap()
});

static PASSED_COUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+) passed").unwrap());

static FAILED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) (?:failed|errors?)\b").unwrap());

/// Runs a command through `sh -c` in the given directory.
///
/// The exit status decides pass or fail; a parsed summary reporting any
/// failure also fails the run.
#[derive(Debug, Clone, Default)]
pub struct ShellTestRunner;

impl ShellTestRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn run(&self, dir: &Path, command: &str) -> DomainResult<TestRun> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to run `{command}`: {e}")))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let counts = parse_summary(&text);
        let passed = output.status.success() && counts.is_none_or(|c| c.failed == 0);
        debug!(passed, exit_code = output.status.code(), ?counts, "test command finished");

        Ok(TestRun {
            passed,
            counts,
            output: text,
        })
    }
}

/// Extract pass/fail counts from pytest, vitest or cargo output.
pub fn parse_summary(output: &str) -> Option<TestCounts> {
    let cargo: Vec<_> = CARGO_SUMMARY.captures_iter(output).collect();
    if !cargo.is_empty() {
        let mut counts = TestCounts::default();
        for caps in cargo {
            counts.passed += number(caps.get(1).map(|m| m.as_str()));
            counts.failed += number(caps.get(2).map(|m| m.as_str()));
        }
        return Some(counts);
    }

    if let Some(caps) = VITEST_SUMMARY.captures_iter(output).last() {
        let body = caps.get(1).map_or("", |m| m.as_str());
        return Some(count_words(body));
    }

    PYTEST_SUMMARY
        .captures_iter(output)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|body| PASSED_COUNT.is_match(body) || FAILED_COUNT.is_match(body))
        .last()
        .map(count_words)
}

fn count_words(body: &str) -> TestCounts {
    TestCounts {
        passed: PASSED_COUNT
            .captures_iter(body)
            .map(|c| number(c.get(1).map(|m| m.as_str())))
            .sum(),
        failed: FAILED_COUNT
            .captures_iter(body)
            .map(|c| number(c.get(1).map(|m| m.as_str())))
            .sum(),
    }
}

fn number(text: Option<&str>) -> u32 {
    text.and_then(|t| t.parse().ok()).unwrap_or(0)
}
