//! Query error types
//!
//! Structured errors for the validation, planning and execution phases of a
//! range query.

use std::fmt;

use crate::error::{StoreError, ValidationError};

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ValidationError, message)
    }

    /// Create a planning error
    pub fn planning(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::PlanningError, message)
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ExecutionError, message)
    }

    /// Whether the caller supplied a bad request
    pub fn is_validation(&self) -> bool {
        self.kind == QueryErrorKind::ValidationError
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ValidationError> for QueryError {
    fn from(e: ValidationError) -> Self {
        QueryError::validation(e.to_string()).with_source(e)
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::execution(format!("rollup store query failed: {}", e)).with_source(e)
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Request validation failed (bad range, unknown metric)
    ValidationError,
    /// No acceptable plan could be produced within the configured limits
    PlanningError,
    /// A plan operation failed against the store
    ExecutionError,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::ValidationError => write!(f, "ValidationError"),
            QueryErrorKind::PlanningError => write!(f, "PlanningError"),
            QueryErrorKind::ExecutionError => write!(f, "ExecutionError"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = QueryError::validation("unknown metric 'foo'");
        assert_eq!(err.to_string(), "ValidationError: unknown metric 'foo'");
        assert!(err.is_validation());
    }

    #[test]
    fn test_store_error_keeps_source() {
        let err = QueryError::from(StoreError::Timeout("lock wait".into()));
        assert_eq!(err.kind, QueryErrorKind::ExecutionError);
        assert!(err.source().is_some());
    }
}
