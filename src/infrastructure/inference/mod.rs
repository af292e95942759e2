//! HTTP adapter for the local inference service.
//!
//! Speaks the Ollama `/api/generate` protocol. The same client backs the
//! visual classifier and judge, and the model residency hooks used by the
//! resource scheduler.

mod client;
mod error;
mod vision;

pub use client::OllamaClient;
pub use error::InferenceError;
pub use vision::{parse_visual_reply, InferenceVisualClassifier, InferenceVisualJudge, VisualReply};
