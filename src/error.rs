//! Error types for the rollup engine
//!
//! Errors are split along the lines the engine handles them:
//!
//! - **Validation** errors are surfaced to the caller before any work starts
//! - **Store / source / progress** errors come from external collaborators and
//!   are retried at the unit level by the pipeline
//! - **Build** errors are scoped to one dimension key and are skipped + logged
//! - **Orchestration** errors are fatal for a rebuild run

use thiserror::Error;

use crate::planner::QueryError;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Rollup store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Source data reader error
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Progress store error
    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    /// Rollup computation error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Query planning or execution error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Fatal orchestration error (run cannot continue)
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether retrying the same operation may succeed
    ///
    /// Validation problems and malformed data never heal on retry; store and
    /// source hiccups might.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            Error::Source(e) => e.is_transient(),
            Error::Progress(_) => true,
            Error::Validation(_) | Error::Build(_) | Error::Configuration(_) => false,
            Error::Query(_) | Error::Orchestration(_) | Error::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Start date is after end date
    #[error("Invalid date range: start {start} > end {end}")]
    InvalidRange {
        /// Requested start
        start: String,
        /// Requested end
        end: String,
    },

    /// Granularity name not recognised
    #[error("Unknown granularity: {0}")]
    UnknownGranularity(String),

    /// Metric not present in the schema
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Dimension shape name not recognised
    #[error("Unknown dimension shape: {0}")]
    UnknownShape(String),

    /// Period does not belong to the requested granularity
    #[error("Period {period} cannot be built at {granularity} granularity")]
    PeriodMismatch {
        /// Requested granularity
        granularity: String,
        /// Supplied period
        period: String,
    },

    /// Calendar value out of range (month 13, week 54, ...)
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Run id does not parse
    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    /// Request asks for nothing
    #[error("No metrics requested")]
    NoMetrics,
}

/// Rollup store errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out or hit lock contention
    #[error("Store timeout: {0}")]
    Timeout(String),

    /// Query could not be evaluated
    #[error("Invalid store query: {0}")]
    InvalidQuery(String),
}

impl StoreError {
    /// Timeouts and outages are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Source reader errors
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Source could not be reached
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Source read timed out
    #[error("Source timeout: {0}")]
    Timeout(String),
}

impl SourceError {
    /// Every source error is considered retryable
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// Progress store errors
#[derive(Error, Debug, Clone)]
pub enum ProgressError {
    /// Backend connection failed
    #[error("Progress store connection error: {0}")]
    Connection(String),

    /// Backend command failed
    #[error("Progress store command failed: {0}")]
    Command(String),
}

/// Errors scoped to a single dimension key inside one period
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// A raw source row failed validation
    #[error("Malformed source row {row}: {reason}")]
    MalformedRow {
        /// Order / row identifier
        row: String,
        /// What is wrong with it
        reason: String,
    },

    /// A finer rollup row carries an unusable metric value
    #[error("Non-finite value for metric {metric} in period {period}")]
    NonFiniteMetric {
        /// Metric name
        metric: String,
        /// Period of the offending row
        period: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
