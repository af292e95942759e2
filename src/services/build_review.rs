//! Post-build review of a workspace.
//!
//! A successful agent run only counts once its workspace shows real work: at
//! least one changed file, every expected file present, and no placeholder
//! code in the changed sources.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, instrument};

/// Source extensions scanned for prohibited patterns.
const SCANNED_EXTENSIONS: &[&str] = &["py", "ts", "tsx", "js", "jsx", "mjs", "cjs", "rs"];

/// Findings beyond this many are summarized as a count.
const MAX_REPORTED_FINDINGS: usize = 10;

struct ProhibitedPattern {
    name: &'static str,
    regex: LazyLock<Regex>,
}

static PROHIBITED: [ProhibitedPattern; 7] = [
    ProhibitedPattern {
        name: "TODO comment",
        regex: LazyLock::new(|| Regex::new(r"(?i)(?:#|//|/\*)\s*TODO").unwrap()),
    },
    ProhibitedPattern {
        name: "placeholder pass statement",
        regex: LazyLock::new(|| {
            Regex::new(r"(?im)^\s*pass\s*#\s*(?:placeholder|stub|implement)").unwrap()
        }),
    },
    ProhibitedPattern {
        name: "not yet implemented text",
        regex: LazyLock::new(|| Regex::new(r"(?i)not\s+yet\s+implemented|coming\s+soon").unwrap()),
    },
    ProhibitedPattern {
        name: "empty exception handler",
        regex: LazyLock::new(|| Regex::new(r"except\s*(?:\w+\s*)?:\s*\n\s*pass\b").unwrap()),
    },
    ProhibitedPattern {
        name: "console.log debug statement",
        regex: LazyLock::new(|| Regex::new(r"\bconsole\.log\(").unwrap()),
    },
    ProhibitedPattern {
        name: "placeholder return",
        regex: LazyLock::new(|| {
            Regex::new(r"(?i)return\s+True\s*#\s*(?:placeholder|stub|temp)").unwrap()
        }),
    },
    ProhibitedPattern {
        name: "unimplemented macro",
        regex: LazyLock::new(|| Regex::new(r"\b(?:todo|unimplemented)!\(").unwrap()),
    },
];

/// Outcome of reviewing one attempt's workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReview {
    pub findings: Vec<String>,
}

impl BuildReview {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }

    /// One-line summary for the attempt record.
    pub fn summary(&self) -> String {
        let mut shown: Vec<String> = self
            .findings
            .iter()
            .take(MAX_REPORTED_FINDINGS)
            .cloned()
            .collect();
        let more = self.findings.len().saturating_sub(MAX_REPORTED_FINDINGS);
        if more > 0 {
            shown.push(format!("and {more} more"));
        }
        format!("review failed: {}", shown.join("; "))
    }
}

/// Review `changed` files (relative to `workspace`) and check `expected` files exist.
#[instrument(skip_all, fields(workspace = %workspace.display(), changed = changed.len()))]
pub async fn review_workspace(workspace: &Path, changed: &[String], expected: &[String]) -> BuildReview {
    let mut findings = Vec::new();

    if changed.is_empty() {
        findings.push("no files were changed".to_string());
    }

    for rel in expected {
        if !tokio::fs::try_exists(workspace.join(rel)).await.unwrap_or(false) {
            findings.push(format!("expected file not created: {rel}"));
        }
    }

    for rel in changed.iter().filter(|rel| is_scanned(rel)) {
        let Ok(content) = tokio::fs::read_to_string(workspace.join(rel)).await else {
            continue;
        };
        findings.extend(scan_source(rel, &content));
    }

    debug!(findings = findings.len(), "workspace reviewed");
    BuildReview { findings }
}

fn is_scanned(rel: &str) -> bool {
    Path::new(rel)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SCANNED_EXTENSIONS.contains(&ext))
}

/// Prohibited-pattern hits in one file, as `name in file:line: text`.
pub fn scan_source(rel: &str, content: &str) -> Vec<String> {
    let mut hits = Vec::new();
    for pattern in &PROHIBITED {
        for found in pattern.regex.find_iter(content) {
            let line = content[..found.start()].matches('\n').count() + 1;
            let text: String = found.as_str().trim().chars().take(80).collect();
            hits.push(format!("{} in {rel}:{line}: {text}", pattern.name));
        }
    }
    hits
}
