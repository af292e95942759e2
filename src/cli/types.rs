//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "evochamber")]
#[command(about = "Evochamber - build-verify orchestration engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .evochamber/config.yaml)
    #[arg(short, long, global = true, env = "EVOCHAMBER_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build, merge and verify every work item in a feature file
    Run(RunArgs),

    /// Validate a feature file and print the build order
    Plan(FeaturesArgs),

    /// Show the last persisted engine status
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct FeaturesArgs {
    /// YAML or JSON list of work items
    #[arg(short, long)]
    pub features: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub features: FeaturesArgs,

    /// Keep items delivered by the previous run instead of rebuilding them
    #[arg(long)]
    pub resume: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "evochamber",
            "run",
            "--features",
            "features.yaml",
            "--json",
            "--config",
            "custom.yaml",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.features.features, PathBuf::from("features.yaml"));
                assert!(!args.resume);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_resume_flag() {
        let cli = Cli::try_parse_from(["evochamber", "run", "-f", "f.yaml", "--resume"]).unwrap();
        assert!(matches!(cli.command, Commands::Run(args) if args.resume));
        assert!(Cli::try_parse_from(["evochamber", "plan", "-f", "f.yaml", "--resume"]).is_err());
    }

    #[test]
    fn test_plan_requires_features() {
        assert!(Cli::try_parse_from(["evochamber", "plan"]).is_err());
    }
}
