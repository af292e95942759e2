//! `plan`: validate a feature file and print the build order.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::features::load_features;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::{list_table, number_cell, render_list};
use crate::cli::types::FeaturesArgs;
use crate::services::WorkItemGraph;

#[derive(Debug, Serialize)]
pub struct PlanStep {
    pub position: usize,
    pub id: String,
    pub title: String,
    pub priority: String,
    pub complexity: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub steps: Vec<PlanStep>,
}

impl PlanOutput {
    pub fn from_graph(graph: &WorkItemGraph) -> Self {
        let steps = graph
            .topological_order()
            .iter()
            .filter_map(|id| graph.get(id))
            .enumerate()
            .map(|(i, item)| PlanStep {
                position: i + 1,
                id: item.id.to_string(),
                title: item.title.clone(),
                priority: item.priority.as_str().to_string(),
                complexity: item.complexity.as_str().to_string(),
                dependencies: item.dependencies().iter().map(ToString::to_string).collect(),
            })
            .collect();
        Self { steps }
    }
}

impl CommandOutput for PlanOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["#", "id", "title", "priority", "complexity", "after"]);
        for step in &self.steps {
            table.add_row(vec![
                number_cell(step.position),
                step.id.clone().into(),
                step.title.clone().into(),
                step.priority.clone().into(),
                step.complexity.clone().into(),
                step.dependencies.join(", ").into(),
            ]);
        }
        render_list("work item", &table, self.steps.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn execute(args: &FeaturesArgs, json_mode: bool) -> Result<()> {
    let specs = load_features(&args.features)?;
    let graph = WorkItemGraph::new(specs).context("Invalid work item graph")?;
    output(&PlanOutput::from_graph(&graph), json_mode);
    Ok(())
}
