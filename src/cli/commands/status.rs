//! `status`: render the snapshot the engine persists after each item settles.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::cli::table::{list_table, number_cell};
use crate::domain::models::{Config, StatusSnapshot, WorkItemStatus};
use crate::services::orchestrator::STATUS_FILE;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct StatusOutput {
    pub snapshot: StatusSnapshot,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let s = &self.snapshot;
        let mut lines = vec![format!(
            "Phase: {}  Items: {}  Merges: {}  Queued issues: {}",
            s.phase, s.total_items, s.merges, s.queued_issues
        )];
        lines.push(format!("As of {}", s.taken_at.to_rfc3339()));
        lines.push(String::new());

        let mut counts = list_table(&["status", "items"]);
        for status in WorkItemStatus::ALL {
            counts.add_row(vec![status.as_str().into(), number_cell(s.count(status))]);
        }
        lines.push(counts.to_string());

        if !s.resources.is_empty() {
            lines.push(String::new());
            let mut resources =
                list_table(&["resource", "in use", "capacity", "exclusive", "waiting"]);
            for r in &s.resources {
                resources.add_row(vec![
                    r.class.clone().into(),
                    number_cell(r.in_use),
                    number_cell(r.capacity),
                    (if r.exclusive_held { "yes" } else { "no" }).into(),
                    number_cell(r.waiting),
                ]);
            }
            lines.push(resources.to_string());
        }

        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.snapshot).unwrap_or_default()
    }
}

/// Read the persisted snapshot under `state_root`.
pub fn read_snapshot(state_root: &Path) -> Result<StatusSnapshot> {
    let path = state_root.join(STATUS_FILE);
    let raw = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "No engine status at {}; start a run with `evochamber run`",
            path.display()
        )
    })?;
    serde_json::from_str(&raw).with_context(|| format!("Corrupt status file {}", path.display()))
}

pub fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let snapshot = read_snapshot(&config.repository.state_root())?;
    output(&StatusOutput { snapshot }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Phase, ResourceUtilization};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot() -> StatusSnapshot {
        let mut counts = BTreeMap::new();
        counts.insert("done".to_string(), 2);
        counts.insert("in_progress".to_string(), 1);
        StatusSnapshot {
            phase: Phase::Building,
            counts,
            total_items: 3,
            resources: vec![ResourceUtilization {
                class: "heavy-inference".to_string(),
                capacity: 1,
                in_use: 1,
                exclusive_held: true,
                waiting: 2,
            }],
            merges: 2,
            queued_issues: 0,
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_reads_persisted_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(STATUS_FILE),
            serde_json::to_string(&snapshot()).unwrap(),
        )
        .unwrap();

        let read = read_snapshot(dir.path()).unwrap();
        assert_eq!(read.count(WorkItemStatus::Done), 2);
        assert_eq!(read.phase, Phase::Building);
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_snapshot(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No engine status"));
    }

    #[test]
    fn test_human_rendering() {
        let human = StatusOutput { snapshot: snapshot() }.to_human();
        assert!(human.contains("Phase: building"));
        assert!(human.contains("heavy-inference"));
        assert!(human.contains("in_progress"));
    }
}
