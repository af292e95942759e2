//! `run`: drive a feature file through build, merge, verification and delivery.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::{build_engine, EngineAdapters};
use crate::cli::features::load_features;
use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::table::{list_table, number_cell};
use crate::cli::types::RunArgs;
use crate::domain::models::{Config, DeliveryReport, EngineEvent};
use crate::services::orchestrator::load_engine_state;

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct RunOutput {
    pub report: DeliveryReport,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        let mut lines = vec![
            String::new(),
            format!(
                "Run {} finished in {}s: {} delivered, {} failed, {} blocked",
                r.run_id,
                r.duration_secs(),
                r.delivered.len(),
                r.failed.len(),
                r.blocked.len()
            ),
            format!("Trunk: {}", truncate(&r.trunk_commit, 12)),
            String::new(),
        ];

        let mut table = list_table(&["id", "status", "attempts", "title"]);
        for item in &r.items {
            table.add_row(vec![
                item.id.to_string().into(),
                item.status.as_str().into(),
                number_cell(item.attempts.len()),
                truncate(&item.title, 48).into(),
            ]);
        }
        lines.push(table.to_string());

        let issues = r.queued_issues.len() + r.hardening_issues.len();
        if issues > 0 {
            lines.push(String::new());
            lines.push(format!("{issues} open issue(s):"));
            for issue in r.queued_issues.iter().chain(&r.hardening_issues) {
                lines.push(format!(
                    "  [{}] {}: {}",
                    issue.severity.as_str(),
                    issue.tier,
                    truncate(issue.description.lines().next().unwrap_or_default(), 80)
                ));
            }
        }

        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.report).unwrap_or_default()
    }
}

/// One-line rendering of an engine event.
pub fn describe_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::PhaseChanged { from, to } => format!("Phase {from} -> {to}"),
        EngineEvent::ItemReady { item_id } => format!("  Ready: {item_id}"),
        EngineEvent::AttemptRecorded { item_id, attempt } => format!(
            "  Attempt {} ({}, cycle {}) for {}: {}",
            attempt.number,
            attempt.tier.as_str(),
            attempt.cycle,
            item_id,
            attempt.outcome.as_str()
        ),
        EngineEvent::Merged { record } => format!(
            "  Merged #{} {} at {}{}",
            record.sequence,
            record.item_id,
            truncate(&record.commit, 10),
            if record.rebased { " (rebased)" } else { "" }
        ),
        EngineEvent::TierFinished {
            item_id,
            tier,
            passed,
            issues,
        } => format!(
            "  Verify {item_id} {tier}: {} ({issues} issue(s))",
            if *passed { "pass" } else { "fail" }
        ),
        EngineEvent::ItemDone { item_id } => format!("  Done: {item_id}"),
        EngineEvent::ItemFailed { item_id, reason } => {
            format!("  Failed: {item_id} - {}", truncate(reason, 120))
        }
        EngineEvent::ItemsBlocked { cause, blocked } => format!(
            "  Blocked by {cause}: {}",
            blocked
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

pub async fn execute(args: &RunArgs, config: &Config, json_mode: bool) -> Result<()> {
    let specs = load_features(&args.features.features)?;
    let adapters = EngineAdapters::from_config(config).context("Failed to set up adapters")?;
    let (event_tx, mut event_rx) =
        mpsc::channel::<EngineEvent>(config.orchestrator.event_buffer.max(1));
    let orchestrator = build_engine(config, specs, adapters)
        .context("Failed to assemble engine")?
        .with_events(event_tx);

    if args.resume {
        let state_root = config.repository.state_root();
        match load_engine_state(&state_root)
            .await
            .context("Failed to read saved engine state")?
        {
            Some(state) => {
                let restored = orchestrator.resume_from(state).await?;
                if !json_mode {
                    println!("Resuming: {restored} item(s) already delivered");
                }
            }
            None if !json_mode => println!("Nothing to resume, starting a fresh run"),
            None => {}
        }
    }

    if !json_mode {
        println!("Starting evochamber run");
        println!("   Repository: {}", config.repository.root.display());
        println!("   Trunk: {}", config.repository.trunk_branch);
        println!(
            "   Parallel builders: {}",
            config.orchestrator.max_parallel_builders
        );
        println!();
    }

    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if !json_mode {
                println!("{}", describe_event(&event));
            }
        }
    });

    let result = orchestrator.run().await;
    // Dropping the engine closes the event channel so the printer can finish.
    drop(orchestrator);
    let _ = event_handler.await;

    let report = result.context("Engine run failed")?;
    output(&RunOutput { report }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MergeRecord, Phase, WorkItemId};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_describe_events() {
        let phase = EngineEvent::PhaseChanged {
            from: Phase::Building,
            to: Phase::Verifying,
        };
        assert_eq!(describe_event(&phase), "Phase building -> verifying");

        let merged = EngineEvent::Merged {
            record: MergeRecord {
                sequence: 3,
                item_id: WorkItemId::from("cart"),
                workspace_id: Uuid::new_v4(),
                commit: "0123456789abcdef".to_string(),
                previous_tip: "fedcba".to_string(),
                rebased: true,
                merged_at: Utc::now(),
            },
        };
        assert_eq!(describe_event(&merged), "  Merged #3 cart at 0123456... (rebased)");

        let blocked = EngineEvent::ItemsBlocked {
            cause: WorkItemId::from("a"),
            blocked: vec![WorkItemId::from("b"), WorkItemId::from("c")],
        };
        assert_eq!(describe_event(&blocked), "  Blocked by a: b, c");
    }
}
