//! Domain layer for the build-verify engine
//!
//! Core models, the error taxonomy, and the port traits that
//! infrastructure adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
