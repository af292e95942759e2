//! Infrastructure layer module
//!
//! This module contains all infrastructure adapters and external integrations:
//! - Git CLI version control (worktrees)
//! - Build agent processes
//! - Shell test runner
//! - Local inference service client and vision models
//! - Configuration management
//! - Logging infrastructure
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod agents;
pub mod config;
pub mod git;
pub mod inference;
pub mod logging;
pub mod test_runner;
