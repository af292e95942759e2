//! Evochamber - build-verify orchestration engine
//!
//! Evochamber takes a dependency graph of feature work items and drives each
//! one through an isolated build workspace, an escalating ladder of external
//! build agents, a serialized merge into trunk, and tiered verification of the
//! merged state, while arbitrating a fixed pool of local inference capacity.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors and port traits
//! - **Service Layer** (`services`): Graph, scheduler, allocator, supervisor, merge, verification
//! - **Application Layer** (`application`): Engine assembly from configuration
//! - **Infrastructure Layer** (`infrastructure`): Git, agent processes, test runner, inference, config, logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use evochamber::{build_engine, ConfigLoader, EngineAdapters};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let specs = evochamber::cli::features::load_features("features.yaml".as_ref())?;
//!     let adapters = EngineAdapters::from_config(&config)?;
//!     let report = build_engine(&config, specs, adapters)?.run().await?;
//!     println!("{} delivered", report.delivered.len());
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{build_engine, EngineAdapters};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, DeliveryReport, EngineEvent, Phase, StatusSnapshot, WorkItem, WorkItemId,
    WorkItemSpec, WorkItemStatus,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Orchestrator, WorkItemGraph};
