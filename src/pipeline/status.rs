//! Rebuild run identity and status document

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::{DateRange, Granularity};

/// Identifier of one rebuild run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Fresh random run id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(RunId)
            .map_err(|_| ValidationError::InvalidRunId(s.to_string()))
    }
}

/// Lifecycle state of a run
///
/// ```text
/// queued ──► processing(stage 0) ──► ... ──► processing(stage n-1) ──► completed
///                  │                                  │
///                  └──────────────► failed ◄──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Accepted, not started
    Queued,
    /// Running a stage
    Processing,
    /// Every stage joined
    Completed,
    /// Fatal orchestration error
    Failed,
}

impl RunState {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Processing => "processing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    /// Whether the run can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit that exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Stage the unit belonged to
    pub stage: Granularity,
    /// Unit description, e.g. `daily 2025-01-15`
    pub unit: String,
    /// Attempts made
    pub attempts: u32,
    /// Last error
    pub error: String,
}

/// Status document published for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Run identifier
    pub run_id: RunId,
    /// Current state
    pub state: RunState,
    /// Range being rebuilt
    pub range: DateRange,
    /// Requested depth
    pub depth: Granularity,
    /// Stage list for the depth
    pub stages: Vec<Granularity>,
    /// Index of the current (or last started) stage
    pub stage_index: usize,
    /// Number of stages
    pub total_stages: usize,
    /// Units in the current stage
    pub stage_units_total: usize,
    /// Units of the current stage that succeeded
    pub stage_units_completed: usize,
    /// Units of the current stage that failed permanently
    pub stage_units_failed: usize,
    /// Units that succeeded across the run
    pub units_completed: usize,
    /// Units that failed permanently across the run
    pub units_failed: usize,
    /// Permanently failed units
    pub failures: Vec<UnitFailure>,
    /// Fatal error when `state` is `failed`
    pub error: Option<String>,
    /// When the run was accepted
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// When the run reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    /// Queued status for a new run
    pub fn queued(run_id: RunId, range: DateRange, depth: Granularity, stages: Vec<Granularity>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            state: RunState::Queued,
            range,
            depth,
            total_stages: stages.len(),
            stages,
            stage_index: 0,
            stage_units_total: 0,
            stage_units_completed: 0,
            stage_units_failed: 0,
            units_completed: 0,
            units_failed: 0,
            failures: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Stage currently running, if any
    pub fn current_stage(&self) -> Option<Granularity> {
        match self.state {
            RunState::Processing | RunState::Failed => self.stages.get(self.stage_index).copied(),
            _ => None,
        }
    }

    /// Enter a stage with the given number of units
    pub fn begin_stage(&mut self, index: usize, units: usize) {
        self.state = RunState::Processing;
        self.stage_index = index;
        self.stage_units_total = units;
        self.stage_units_completed = 0;
        self.stage_units_failed = 0;
        self.touch();
    }

    /// Count a successful unit
    pub fn unit_succeeded(&mut self) {
        self.stage_units_completed += 1;
        self.units_completed += 1;
        self.touch();
    }

    /// Record a permanently failed unit
    pub fn unit_failed(&mut self, failure: UnitFailure) {
        self.stage_units_failed += 1;
        self.units_failed += 1;
        self.failures.push(failure);
        self.touch();
    }

    /// Terminal success
    pub fn complete(&mut self) {
        self.state = RunState::Completed;
        self.finish();
    }

    /// Terminal failure
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = RunState::Failed;
        self.error = Some(error.into());
        self.finish();
    }

    fn finish(&mut self) {
        self.touch();
        self.finished_at = Some(self.updated_at);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
