//! Intelligent Query Planner
//!
//! Answers "metric totals per dimension key over `[start, end]`" by reading as
//! few rollup rows as possible.
//!
//! ```text
//! QueryRequest
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Validate   │  range order, metric names
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Clamp     │  end ≤ today (UTC)
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │    Plan     │  fast path, or cheapest of five candidates
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  concurrent store queries
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Merge     │  ADDs, then clamped SUBTRACTs, then rates
//! └─────────────┘
//! ```
//!
//! For example `2024-01-22..2025-01-02` becomes
//!
//! ```text
//! ADD      yearly(2024)
//! ADD      daily(2025-01-01..2025-01-02)
//! SUBTRACT weekly(2024-01-01..2024-01-21)
//! ```
//!
//! at a cost of 6 rows per key instead of 347 daily rows.

pub mod error;
pub mod executor;
pub mod optimizer;
pub mod plan;
pub mod result;

pub use error::{QueryError, QueryErrorKind};
pub use executor::{ExecutionOutput, PlanExecutor};
pub use optimizer::Optimizer;
pub use plan::{total_cost, CandidateCost, PlanOperation, QueryPlan, Sign, Strategy, Target};
pub use result::{QueryMetadata, QueryResult, QueryRow};

use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::error::ValidationError;
use crate::metrics;
use crate::schema::{AggregateVerb, MetricKind, MetricSchema};
use crate::store::{MetricColumn, RollupStore};
use crate::types::{DateRange, DimensionFilter, DimensionShape};

/// A range query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// First day, inclusive
    pub start: NaiveDate,
    /// Last day, inclusive
    pub end: NaiveDate,
    /// Dimension restriction
    #[serde(default)]
    pub filter: DimensionFilter,
    /// Metrics to return
    pub metrics: Vec<String>,
    /// Table family to read
    #[serde(default = "default_shape")]
    pub shape: DimensionShape,
}

fn default_shape() -> DimensionShape {
    DimensionShape::Store
}

impl QueryRequest {
    /// Store-level query over every store
    pub fn new<I, S>(start: NaiveDate, end: NaiveDate, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            start,
            end,
            filter: DimensionFilter::all(),
            metrics: metrics.into_iter().map(Into::into).collect(),
            shape: DimensionShape::Store,
        }
    }

    /// Restrict to some dimension keys
    pub fn with_filter(mut self, filter: DimensionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Read a different table family
    pub fn with_shape(mut self, shape: DimensionShape) -> Self {
        self.shape = shape;
        self
    }
}

/// Plans and executes range queries
pub struct QueryPlanner {
    store: Arc<dyn RollupStore>,
    schema: Arc<MetricSchema>,
    config: PlannerConfig,
    today: Option<NaiveDate>,
}

impl QueryPlanner {
    /// Create a planner over a store
    pub fn new(store: Arc<dyn RollupStore>, schema: Arc<MetricSchema>, config: PlannerConfig) -> Self {
        Self {
            store,
            schema,
            config,
            today: None,
        }
    }

    /// Pin the date ranges are clamped to instead of reading the clock
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Planner configuration
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Validate a request and produce its plan without touching the store
    pub fn plan(&self, request: &QueryRequest) -> Result<QueryPlan, QueryError> {
        let requested = DateRange::new(request.start, request.end)?;
        let metrics = self.validate_metrics(&request.metrics)?;
        let columns = self.columns_for(&metrics);

        let effective = if self.config.clamp_to_today {
            let today = self.today();
            if requested.start > today {
                None
            } else {
                Some(DateRange {
                    start: requested.start,
                    end: requested.end.min(today),
                })
            }
        } else {
            Some(requested)
        };

        let (strategy, operations, candidates) = match effective {
            None => (Strategy::Empty, Vec::new(), Vec::new()),
            Some(range) => {
                let optimizer = Optimizer::new(&self.config);
                match optimizer.fast_path(&range) {
                    Some((strategy, ops)) => (strategy, ops, Vec::new()),
                    None => optimizer.optimize(&range),
                }
            },
        };

        if operations.len() > self.config.max_plan_operations {
            return Err(QueryError::planning(format!(
                "plan for {} needs {} operations, limit is {}",
                requested,
                operations.len(),
                self.config.max_plan_operations
            )));
        }

        let estimated_cost = total_cost(&operations);
        debug!(
            "Planned {} for {}: {} operations, cost {}",
            strategy,
            requested,
            operations.len(),
            estimated_cost
        );

        Ok(QueryPlan {
            requested,
            effective,
            shape: request.shape,
            filter: request.filter.clone(),
            columns,
            strategy,
            operations,
            estimated_cost,
            candidates,
        })
    }

    /// Plan text with the SQL of every operation and the candidate costs
    pub fn explain(&self, request: &QueryRequest) -> Result<String, QueryError> {
        Ok(self.plan(request)?.explain())
    }

    /// Plan, execute and merge a range query
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        let plan = self.plan(request)?;
        let requested = self.validate_metrics(&request.metrics)?;

        let output = PlanExecutor::new(Arc::clone(&self.store))
            .execute(&plan, &self.schema, &requested)
            .await?;

        let elapsed = started.elapsed();
        metrics::record_query(plan.strategy.as_str(), elapsed.as_secs_f64());

        let approximate_metrics = plan
            .columns
            .iter()
            .filter(|c| c.verb == AggregateVerb::Avg && requested.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();

        info!(
            strategy = plan.strategy.as_str(),
            operations = plan.operations.len(),
            rows = output.rows.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Query {} complete",
            plan.requested
        );

        let metadata = QueryMetadata {
            strategy: plan.strategy,
            operations_executed: plan.operations.len(),
            estimated_cost: plan.estimated_cost,
            rows_scanned: output.rows_scanned,
            elapsed_ms: elapsed.as_millis() as u64,
            approximate_metrics,
        };

        Ok(QueryResult {
            rows: output.rows,
            plan,
            metadata,
        })
    }

    /// Known metrics, deduplicated in request order
    fn validate_metrics(&self, metrics: &[String]) -> Result<Vec<String>, ValidationError> {
        if metrics.is_empty() {
            return Err(ValidationError::NoMetrics);
        }
        let mut out: Vec<String> = Vec::with_capacity(metrics.len());
        for name in metrics {
            if self.schema.get(name).is_none() {
                return Err(ValidationError::UnknownMetric(name.clone()));
            }
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Ok(out)
    }

    /// Columns fetched from the store; rates are fetched as their components
    fn columns_for(&self, metrics: &[String]) -> Vec<MetricColumn> {
        let mut columns: Vec<MetricColumn> = Vec::new();
        let mut push = |column: MetricColumn| {
            if !columns.iter().any(|c| c.name == column.name) {
                columns.push(column);
            }
        };
        for name in metrics {
            match self.schema.get(name).map(|def| &def.kind) {
                Some(MetricKind::DerivedRate {
                    numerator,
                    denominator,
                    ..
                }) => {
                    for component in [numerator, denominator] {
                        push(MetricColumn {
                            name: component.clone(),
                            verb: AggregateVerb::Sum,
                        });
                    }
                },
                _ => push(MetricColumn::inferred(name.clone())),
            }
        }
        columns
    }
}
