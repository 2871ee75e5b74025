//! Pipeline Orchestrator
//!
//! Rebuilds a contiguous date range across the rollup hierarchy in dependency
//! order. Every stage is decomposed into independent units which run
//! concurrently; the next stage starts only once every unit of the current
//! stage has finished, successfully or not.
//!
//! ```text
//!  RebuildRange(2025-01-01..2025-01-31, monthly)
//!
//!  stage 0  hourly   ┌─┐┌─┐┌─┐ ... ┌─┐  31 units (one per day)
//!                    └─┘└─┘└─┘     └─┘
//!  ──────────────────────── barrier ─────────────────────────
//!  stage 1  daily    ┌─┐┌─┐┌─┐ ... ┌─┐  31 units
//!                    └─┘└─┘└─┘     └─┘
//!  ──────────────────────── barrier ─────────────────────────
//!  stage 2  monthly  ┌───────────────┐   1 unit (January)
//!                    └───────────────┘
//! ```
//!
//! Progress is published to the [`ProgressStore`](crate::progress::ProgressStore)
//! on every stage transition and every permanent unit failure.

pub mod orchestrator;
pub mod status;
pub mod unit;

pub use orchestrator::PipelineOrchestrator;
pub use status::{RunId, RunState, RunStatus, UnitFailure};
pub use unit::{stages_for, units_for, RetryPolicy, WorkUnit};
