//! Plan execution
//!
//! Every operation becomes one grouped store query. Queries run concurrently;
//! the first failure fails the whole query. Results are combined per key:
//!
//! ```text
//!   ADD rows ──► merge by key (SUM columns add, AVG columns weight by days)
//!                     │
//!   SUBTRACT rows ──► subtract from keys already present, clamp at zero
//!                     │
//!                     ▼
//!          drop keys with no covered days, recompute rates,
//!          keep requested metrics only
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use super::error::QueryError;
use super::plan::{QueryPlan, Sign};
use super::result::QueryRow;
use crate::metrics;
use crate::schema::{AggregateVerb, MetricSchema};
use crate::store::{AggregateRow, MetricColumn, RollupStore};
use crate::types::DimensionKey;

const COVERAGE_EPSILON: f64 = 1e-9;

/// Rows and scan statistics from one executed plan
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    /// Final rows ordered by key
    pub rows: Vec<QueryRow>,
    /// Table rows folded by the store
    pub rows_scanned: usize,
}

#[derive(Debug, Default)]
struct Accumulator {
    sums: BTreeMap<String, f64>,
    weighted: BTreeMap<String, (f64, f64)>,
    covered_days: f64,
}

impl Accumulator {
    fn add(&mut self, row: &AggregateRow, columns: &[MetricColumn]) {
        for column in columns {
            let Some(value) = row.values.get(&column.name).copied() else {
                continue;
            };
            match column.verb {
                AggregateVerb::Sum => *self.sums.entry(column.name.clone()).or_insert(0.0) += value,
                AggregateVerb::Avg => {
                    let slot = self.weighted.entry(column.name.clone()).or_insert((0.0, 0.0));
                    slot.0 += value * row.covered_days;
                    slot.1 += row.covered_days;
                },
            }
        }
        self.covered_days += row.covered_days;
    }

    fn subtract(&mut self, row: &AggregateRow, columns: &[MetricColumn]) {
        for column in columns.iter().filter(|c| c.verb == AggregateVerb::Sum) {
            let value = row.values.get(&column.name).copied().unwrap_or(0.0);
            let slot = self.sums.entry(column.name.clone()).or_insert(0.0);
            *slot = (*slot - value).max(0.0);
        }
        self.covered_days = (self.covered_days - row.covered_days).max(0.0);
    }

    fn finish(self, schema: &MetricSchema, requested: &[String]) -> BTreeMap<String, f64> {
        let mut values = self.sums;
        for (name, (total, weight)) in self.weighted {
            if weight > 0.0 {
                values.insert(name, total / weight);
            }
        }
        schema.apply_rates(&mut values);
        values.retain(|name, _| requested.iter().any(|r| r == name));
        values
    }
}

/// Runs plans against a rollup store
pub struct PlanExecutor {
    store: Arc<dyn RollupStore>,
}

impl PlanExecutor {
    /// Create an executor over a store
    pub fn new(store: Arc<dyn RollupStore>) -> Self {
        Self { store }
    }

    /// Execute a plan and combine its signed results
    pub async fn execute(
        &self,
        plan: &QueryPlan,
        schema: &MetricSchema,
        requested: &[String],
    ) -> Result<ExecutionOutput, QueryError> {
        let queries = plan.queries();
        let pending = plan.operations.iter().zip(queries.iter()).map(|(op, query)| {
            let store = Arc::clone(&self.store);
            async move {
                metrics::record_operation(op.sign.as_str(), op.granularity.as_str());
                store
                    .aggregate(query)
                    .await
                    .map(|rows| (op.sign, rows))
                    .map_err(|e| QueryError::execution(format!("operation {} failed", op)).with_source(e))
            }
        });
        let results = try_join_all(pending).await?;

        let mut rows_scanned = 0;
        let mut merged: BTreeMap<DimensionKey, Accumulator> = BTreeMap::new();

        for (_, rows) in results.iter().filter(|(sign, _)| *sign == Sign::Add) {
            for row in rows {
                rows_scanned += row.rows_scanned;
                merged.entry(row.key.clone()).or_default().add(row, &plan.columns);
            }
        }
        for (_, rows) in results.iter().filter(|(sign, _)| *sign == Sign::Subtract) {
            for row in rows {
                rows_scanned += row.rows_scanned;
                // Only keys with ADD data can lose rows
                if let Some(acc) = merged.get_mut(&row.key) {
                    acc.subtract(row, &plan.columns);
                }
            }
        }

        let rows: Vec<QueryRow> = merged
            .into_iter()
            .filter(|(_, acc)| acc.covered_days > COVERAGE_EPSILON)
            .map(|(key, acc)| {
                let covered_days = acc.covered_days;
                QueryRow {
                    key,
                    values: acc.finish(schema, requested),
                    covered_days,
                }
            })
            .collect();

        debug!(
            "Executed {} operations: {} rows scanned, {} keys returned",
            plan.operations.len(),
            rows_scanned,
            rows.len()
        );

        Ok(ExecutionOutput { rows, rows_scanned })
    }
}
