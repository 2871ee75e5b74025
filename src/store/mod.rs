//! Rollup store interface
//!
//! The store holds one table per granularity per dimension shape, each keyed by
//! `(dimension key, period key)`. The engine needs four things from it:
//!
//! - upsert-by-key (the only mutation; last writer wins per row)
//! - point lookup of a single row (prior-period growth)
//! - range scans of a finer table (chained rollup folds)
//! - grouped aggregate queries (query planner operations)
//!
//! # Table layout
//!
//! ```text
//! store_hourly_rollup       (store_id, business_date, hour)
//! store_daily_rollup        (store_id, business_date)
//! store_weekly_rollup       (store_id, iso_year, iso_week)
//! store_monthly_rollup      (store_id, year, month)
//! store_quarterly_rollup    (store_id, year, quarter)
//! store_yearly_rollup       (store_id, year)
//! store_item_*_rollup       (store_id, item_id, <period columns>)
//! ```

pub mod memory;

pub use memory::{InMemoryRollupStore, StoreStats};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::AggregateVerb;
use crate::types::{
    DateRange, DimensionFilter, DimensionKey, DimensionShape, Granularity, PeriodKey, RollupRecord,
};

/// Name of the coverage column every rollup table carries
pub const COVERED_DAYS_COLUMN: &str = "covered_days";

// ============================================================================
// Store Trait
// ============================================================================

/// Table-per-granularity rollup storage
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// Insert or replace rows keyed by `(dimension key, period key)`
    ///
    /// Returns the number of rows written.
    async fn upsert(
        &self,
        shape: DimensionShape,
        records: Vec<RollupRecord>,
    ) -> Result<usize, StoreError>;

    /// Fetch a single row
    async fn get(
        &self,
        shape: DimensionShape,
        key: &DimensionKey,
        period: &PeriodKey,
    ) -> Result<Option<RollupRecord>, StoreError>;

    /// Fetch every row of a table whose period lies inside `range`
    async fn scan(
        &self,
        shape: DimensionShape,
        granularity: Granularity,
        range: &DateRange,
        filter: &DimensionFilter,
    ) -> Result<Vec<RollupRecord>, StoreError>;

    /// Evaluate a grouped aggregate query
    async fn aggregate(&self, query: &RollupQuery) -> Result<Vec<AggregateRow>, StoreError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), StoreError>;
}

// ============================================================================
// Aggregate Queries
// ============================================================================

/// Which rows of a table a query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodPredicate {
    /// Every row whose period lies fully inside the range
    Within(DateRange),
    /// Exactly one period
    Exact(PeriodKey),
}

impl PeriodPredicate {
    /// Whether a row's period satisfies the predicate
    pub fn matches(&self, period: &PeriodKey) -> bool {
        match self {
            PeriodPredicate::Within(range) => range.covers(&period.date_range()),
            PeriodPredicate::Exact(p) => p == period,
        }
    }

    /// Render as a SQL `WHERE` fragment for the given table granularity
    pub fn to_sql(&self, granularity: Granularity) -> String {
        match self {
            PeriodPredicate::Within(range) => match granularity {
                Granularity::Hourly | Granularity::Daily => format!(
                    "business_date BETWEEN {} AND {}",
                    sql_date(range.start),
                    sql_date(range.end)
                ),
                Granularity::Weekly => format!(
                    "week_start >= {} AND week_start + 6 <= {}",
                    sql_date(range.start),
                    sql_date(range.end)
                ),
                _ => format!(
                    "period_start >= {} AND period_end <= {}",
                    sql_date(range.start),
                    sql_date(range.end)
                ),
            },
            PeriodPredicate::Exact(period) => match *period {
                PeriodKey::Hour { date, hour } => {
                    format!("business_date = {} AND hour = {}", sql_date(date), hour)
                },
                PeriodKey::Day { date } => format!("business_date = {}", sql_date(date)),
                PeriodKey::Week { year, week } => {
                    format!("iso_year = {} AND iso_week = {}", year, week)
                },
                PeriodKey::Month { year, month } => format!("year = {} AND month = {}", year, month),
                PeriodKey::Quarter { year, quarter } => {
                    format!("year = {} AND quarter = {}", year, quarter)
                },
                PeriodKey::Year { year } => format!("year = {}", year),
            },
        }
    }
}

/// A metric column and the aggregate applied to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricColumn {
    /// Column name
    pub name: String,
    /// Aggregate function
    pub verb: AggregateVerb,
}

impl MetricColumn {
    /// Column with the verb inferred from its name
    pub fn inferred(name: impl Into<String>) -> Self {
        let name = name.into();
        let verb = AggregateVerb::infer(&name);
        Self { name, verb }
    }
}

/// One grouped aggregate query against a single rollup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupQuery {
    /// Table family
    pub shape: DimensionShape,
    /// Table granularity
    pub granularity: Granularity,
    /// Period restriction
    pub predicate: PeriodPredicate,
    /// Dimension restriction
    pub filter: DimensionFilter,
    /// Metric columns to aggregate
    pub columns: Vec<MetricColumn>,
}

impl RollupQuery {
    /// Table the query reads
    pub fn table(&self) -> String {
        self.shape.table_name(self.granularity)
    }

    /// Render the query as SQL
    pub fn to_sql(&self) -> String {
        let key_columns = self.shape.key_columns().join(", ");
        let mut select = vec![key_columns.clone()];
        for column in &self.columns {
            select.push(format!("{}({}) AS {}", column.verb, column.name, column.name));
        }
        select.push(format!(
            "SUM({}) AS {}",
            COVERED_DAYS_COLUMN, COVERED_DAYS_COLUMN
        ));

        let mut conditions = vec![self.predicate.to_sql(self.granularity)];
        if !self.filter.stores.is_empty() {
            conditions.push(format!("store_id IN ({})", sql_list(&self.filter.stores)));
        }
        if self.shape == DimensionShape::StoreItem && !self.filter.items.is_empty() {
            conditions.push(format!("item_id IN ({})", sql_list(&self.filter.items)));
        }

        format!(
            "SELECT {} FROM {} WHERE {} GROUP BY {}",
            select.join(", "),
            self.table(),
            conditions.join(" AND "),
            key_columns
        )
    }
}

impl fmt::Display for RollupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// One grouped result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Group key
    pub key: DimensionKey,
    /// Aggregated metric values; `AVG` over no values leaves the column out
    pub values: BTreeMap<String, f64>,
    /// Sum of the coverage column
    pub covered_days: f64,
    /// Number of table rows folded into the group
    pub rows_scanned: usize,
}

fn sql_date(date: NaiveDate) -> String {
    format!("'{}'", date.format("%Y-%m-%d"))
}

fn sql_list<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}
