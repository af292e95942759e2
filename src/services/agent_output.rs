//! Parsing of build agent terminal output into an `AgentReport`.
//!
//! Agents print free text around their machine-readable summary. Extraction
//! tries, in order: the whole output as JSON, the last balanced `{...}` block,
//! then the last line that parses as a JSON object.

use serde_json::Value;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentReport, AgentStatus, TestCounts};

/// Extract and validate the agent's summary.
pub fn parse_agent_output(output: &str) -> DomainResult<AgentReport> {
    let value = extract_json_object(output).ok_or_else(|| {
        DomainError::AgentProtocol("no JSON summary found in agent output".to_string())
    })?;
    report_from_value(&value)
}

/// Find the JSON object a model or agent embedded in free text.
pub fn extract_json_object(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for (start, end) in balanced_blocks(trimmed).into_iter().rev() {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&trimmed[start..end]) {
            return Some(value);
        }
    }

    trimmed.lines().rev().find_map(|line| {
        match serde_json::from_str::<Value>(line.trim()) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        }
    })
}

/// Byte ranges of top-level `{...}` blocks, skipping braces inside strings.
fn balanced_blocks(text: &str) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    blocks.push((start, i + 1));
                }
            }
            _ => {}
        }
    }

    blocks
}

fn report_from_value(value: &Value) -> DomainResult<AgentReport> {
    let status_text = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| DomainError::AgentProtocol("summary has no status field".to_string()))?;
    let status = AgentStatus::from_str(status_text).ok_or_else(|| {
        DomainError::AgentProtocol(format!("unrecognized agent status '{status_text}'"))
    })?;

    let summary = value
        .get("summary")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(AgentReport {
        status,
        files_touched: files_from_value(value),
        tests: value
            .get("test_results")
            .or_else(|| value.get("tests"))
            .and_then(counts_from_value),
        summary,
    })
}

fn files_from_value(value: &Value) -> Vec<String> {
    if let Some(files) = value.get("files_touched") {
        return string_list(files);
    }

    let mut files = Vec::new();
    for key in ["files_created", "files_modified"] {
        if let Some(list) = value.get(key) {
            files.extend(string_list(list));
        }
    }
    if !files.is_empty() {
        return files;
    }

    value
        .get("files")
        .or_else(|| value.get("changes"))
        .map(string_list)
        .unwrap_or_default()
}

/// Accepts `["a.rs"]` or `[{"path": "a.rs"}]` / `[{"file": "a.rs"}]`.
fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map
                        .get("path")
                        .or_else(|| map.get("file"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn counts_from_value(value: &Value) -> Option<TestCounts> {
    let passed = value.get("passed").and_then(Value::as_u64)?;
    let failed = value.get("failed").and_then(Value::as_u64).unwrap_or(0);
    Some(TestCounts {
        passed: u32::try_from(passed).unwrap_or(u32::MAX),
        failed: u32::try_from(failed).unwrap_or(u32::MAX),
    })
}
