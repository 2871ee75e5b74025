//! Engine facade over the rollup builder, pipeline orchestrator and query planner

pub mod builder;

pub use builder::{RollupEngine, RollupEngineBuilder};
