//! Feature file loading.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::domain::models::WorkItemSpec;

/// A bare list, or the list under a `features` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureFile {
    List(Vec<WorkItemSpec>),
    Wrapped { features: Vec<WorkItemSpec> },
}

/// Read work item specs from a YAML or JSON file.
pub fn load_features(path: &Path) -> Result<Vec<WorkItemSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read feature file {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let file: FeatureFile = if is_json {
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON feature file {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid YAML feature file {}", path.display()))?
    };

    let specs = match file {
        FeatureFile::List(specs) | FeatureFile::Wrapped { features: specs } => specs,
    };
    if specs.is_empty() {
        anyhow::bail!("Feature file {} contains no work items", path.display());
    }
    Ok(specs)
}
