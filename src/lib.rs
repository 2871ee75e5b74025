//! Kuba Rollup - multi-granularity sales rollups with a cost-based range planner
//!
//! This library provides:
//! - A hierarchical rollup builder (hourly → daily → weekly/monthly → quarterly → yearly)
//!   with period-over-period growth fields
//! - A pipeline orchestrator that rebuilds date ranges in dependency-ordered
//!   stages of concurrent, retryable units
//! - A query planner that answers arbitrary date ranges with a minimum-cost
//!   mix of ADD and SUBTRACT reads over the rollup tables
//!
//! # Example
//!
//! ```rust,ignore
//! use kuba_rollup::{Granularity, QueryRequest, RollupEngine};
//!
//! let engine = RollupEngine::builder()
//!     .with_source(reader)
//!     .build()?;
//!
//! let run = engine.rebuild_range(start, end, Granularity::Yearly).await?;
//! engine.wait_for_run(run).await?;
//!
//! let result = engine
//!     .query(&QueryRequest::new(start, end, ["net_sales", "avg_ticket"]))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod engine;
pub mod error;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber initialisation
pub mod logging;

/// Rebuild status documents shared through a TTL'd key-value store
pub mod progress;

/// Staged, concurrent rebuilds of date ranges
pub mod pipeline;

/// Cost-based planning and execution of range queries
pub mod planner;

// Re-export main types
pub use builder::{BuildReport, RollupBuilder};
pub use config::Config;
pub use engine::{RollupEngine, RollupEngineBuilder};
pub use error::{Error, Result};
pub use pipeline::{RunId, RunState, RunStatus};
pub use planner::{QueryError, QueryPlan, QueryRequest, QueryResult};
pub use schema::MetricSchema;
pub use types::{
    DateRange, DimensionFilter, DimensionKey, DimensionShape, Granularity, PeriodKey, RollupRecord,
};
