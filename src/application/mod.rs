pub mod engine;

pub use engine::{build_engine, EngineAdapters};
