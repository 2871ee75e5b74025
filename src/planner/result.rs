//! Query results

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::plan::{QueryPlan, Strategy};
use crate::types::DimensionKey;

/// Metric totals for one dimension key over the requested range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    /// Dimension key
    pub key: DimensionKey,
    /// Requested metrics; a rate with a zero denominator is absent
    pub values: BTreeMap<String, f64>,
    /// Rollup rows of coverage behind the row after subtraction (days, or
    /// hours on the hourly fast path)
    pub covered_days: f64,
}

impl QueryRow {
    /// Value of a metric, `None` when absent
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Execution statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Strategy of the executed plan
    pub strategy: Strategy,
    /// Store queries issued
    pub operations_executed: usize,
    /// Plan cost estimate
    pub estimated_cost: u64,
    /// Table rows folded by the store
    pub rows_scanned: usize,
    /// Wall time
    pub elapsed_ms: u64,
    /// Metrics averaged rather than summed; their values are weighted
    /// approximations when the plan mixes granularities
    pub approximate_metrics: Vec<String>,
}

/// Rows plus the plan that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// One row per dimension key with data in range, ordered by key
    pub rows: Vec<QueryRow>,
    /// Executed plan
    pub plan: QueryPlan,
    /// Execution statistics
    pub metadata: QueryMetadata,
}

impl QueryResult {
    /// Row for a key
    pub fn row(&self, key: &DimensionKey) -> Option<&QueryRow> {
        self.rows.iter().find(|r| &r.key == key)
    }

    /// Sum of a metric over every row
    pub fn total(&self, metric: &str) -> f64 {
        self.rows.iter().filter_map(|r| r.value(metric)).sum()
    }

    /// Whether no key had data in range
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
