//! In-memory rollup store
//!
//! Each `(shape, granularity)` table is a `BTreeMap` ordered by
//! `(period key, dimension key)`, so range scans walk a contiguous slice of the
//! map instead of the whole table.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;

use super::{AggregateRow, PeriodPredicate, RollupQuery, RollupStore};
use crate::error::StoreError;
use crate::schema::AggregateVerb;
use crate::types::{
    DateRange, DimensionFilter, DimensionKey, DimensionShape, Granularity, PeriodKey, RollupRecord,
};

type TableId = (DimensionShape, Granularity);
type Table = BTreeMap<(PeriodKey, DimensionKey), RollupRecord>;

/// Counters exposed for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Rows written by upserts
    pub rows_written: u64,
    /// Rows read by scans and aggregates
    pub rows_scanned: u64,
    /// Aggregate queries evaluated
    pub queries: u64,
}

/// Rollup store backed by ordered maps
pub struct InMemoryRollupStore {
    tables: RwLock<HashMap<TableId, Table>>,
    available: AtomicBool,
    rows_written: AtomicU64,
    rows_scanned: AtomicU64,
    queries: AtomicU64,
}

impl InMemoryRollupStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            rows_written: AtomicU64::new(0),
            rows_scanned: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of rows in one table
    pub fn row_count(&self, shape: DimensionShape, granularity: Granularity) -> usize {
        self.tables
            .read()
            .get(&(shape, granularity))
            .map_or(0, BTreeMap::len)
    }

    /// Every row of one table in key order
    pub fn rows(&self, shape: DimensionShape, granularity: Granularity) -> Vec<RollupRecord> {
        self.tables
            .read()
            .get(&(shape, granularity))
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        }
    }

    /// Rows of a table matching a predicate and filter, in key order
    fn select(
        &self,
        table: TableId,
        predicate: &PeriodPredicate,
        filter: &DimensionFilter,
    ) -> Vec<RollupRecord> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(&table) else {
            return Vec::new();
        };

        let (lower, last_day) = match predicate {
            PeriodPredicate::Within(range) => (lower_bound(table.1, range.start), range.end),
            PeriodPredicate::Exact(period) => (*period, period.first_day()),
        };
        let from = (lower, min_key());

        let selected: Vec<RollupRecord> = rows
            .range(from..)
            .take_while(|((period, _), _)| period.first_day() <= last_day)
            .filter(|((period, key), _)| predicate.matches(period) && filter.matches(key))
            .map(|(_, record)| record.clone())
            .collect();

        self.rows_scanned
            .fetch_add(selected.len() as u64, Ordering::Relaxed);
        selected
    }
}

impl Default for InMemoryRollupStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest period key of a table that can start on or after `date`
fn lower_bound(granularity: Granularity, date: NaiveDate) -> PeriodKey {
    match granularity {
        Granularity::Hourly => PeriodKey::Hour { date, hour: 0 },
        g => PeriodKey::containing(g, date),
    }
}

fn min_key() -> DimensionKey {
    DimensionKey {
        store_id: String::new(),
        item_id: None,
    }
}

#[derive(Default)]
struct Accumulator {
    sums: BTreeMap<String, f64>,
    averages: BTreeMap<String, (f64, u32)>,
    covered_days: f64,
    rows: usize,
}

#[async_trait]
impl RollupStore for InMemoryRollupStore {
    async fn upsert(
        &self,
        shape: DimensionShape,
        records: Vec<RollupRecord>,
    ) -> Result<usize, StoreError> {
        self.check_available()?;
        if let Some(bad) = records.iter().find(|r| r.key.shape() != shape) {
            return Err(StoreError::InvalidQuery(format!(
                "key {} does not belong to the {} table family",
                bad.key, shape
            )));
        }

        let mut tables = self.tables.write();
        let count = records.len();
        for record in records {
            let table = tables.entry((shape, record.granularity())).or_default();
            table.insert((record.period, record.key.clone()), record);
        }
        self.rows_written.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    async fn get(
        &self,
        shape: DimensionShape,
        key: &DimensionKey,
        period: &PeriodKey,
    ) -> Result<Option<RollupRecord>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .get(&(shape, period.granularity()))
            .and_then(|t| t.get(&(*period, key.clone())))
            .cloned())
    }

    async fn scan(
        &self,
        shape: DimensionShape,
        granularity: Granularity,
        range: &DateRange,
        filter: &DimensionFilter,
    ) -> Result<Vec<RollupRecord>, StoreError> {
        self.check_available()?;
        Ok(self.select((shape, granularity), &PeriodPredicate::Within(*range), filter))
    }

    async fn aggregate(&self, query: &RollupQuery) -> Result<Vec<AggregateRow>, StoreError> {
        self.check_available()?;
        if let PeriodPredicate::Exact(period) = &query.predicate {
            if period.granularity() != query.granularity {
                return Err(StoreError::InvalidQuery(format!(
                    "period {} does not belong to table {}",
                    period,
                    query.table()
                )));
            }
        }
        self.queries.fetch_add(1, Ordering::Relaxed);

        let rows = self.select(
            (query.shape, query.granularity),
            &query.predicate,
            &query.filter,
        );

        let mut groups: BTreeMap<DimensionKey, Accumulator> = BTreeMap::new();
        for row in rows {
            let acc = groups.entry(row.key.clone()).or_default();
            acc.rows += 1;
            acc.covered_days += f64::from(row.covered_days);
            for column in &query.columns {
                let value = row.metrics.get(&column.name).copied();
                match column.verb {
                    AggregateVerb::Sum => {
                        *acc.sums.entry(column.name.clone()).or_insert(0.0) += value.unwrap_or(0.0);
                    },
                    AggregateVerb::Avg => {
                        // AVG ignores missing values
                        if let Some(v) = value {
                            let slot = acc.averages.entry(column.name.clone()).or_insert((0.0, 0));
                            slot.0 += v;
                            slot.1 += 1;
                        }
                    },
                }
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, acc)| {
                let mut values = acc.sums;
                for (name, (sum, n)) in acc.averages {
                    values.insert(name, sum / f64::from(n));
                }
                AggregateRow {
                    key,
                    values,
                    covered_days: acc.covered_days,
                    rows_scanned: acc.rows,
                }
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
