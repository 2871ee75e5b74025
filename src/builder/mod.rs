//! Rollup Builder
//!
//! Computes the rollup rows of one `(granularity, period)` pair and upserts
//! them. The finest two levels read raw transactions; every coarser level reads
//! only the next-finer rollup table:
//!
//! ```text
//!   raw ──► hourly
//!   raw ──► daily ──► weekly
//!             │
//!             └─────► monthly ──► quarterly ──► yearly
//! ```
//!
//! For each dimension key present in the finer data the builder sums the
//! summable metrics, recomputes derived rates from the sums, fills growth
//! fields from the prior period's row and upserts the result. A key whose rows
//! cannot be folded is logged and skipped; the other keys of the period are
//! still written. A period with no finer rows is skipped without error.
//!
//! Growth fields read whatever prior-period row is in the store at build time.
//! When the prior period is being rebuilt concurrently the fields can be stale
//! or absent until the next rebuild pass.

pub mod chained;
pub mod raw;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, ValidationError};
use crate::metrics;
use crate::schema::MetricSchema;
use crate::source::{SourceReader, SourceTransaction};
use crate::store::RollupStore;
use crate::types::{
    DateRange, DimensionFilter, DimensionKey, DimensionShape, Granularity, PeriodKey, RollupRecord,
};

/// A dimension key left out of a build
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedKey {
    /// Table family
    pub shape: DimensionShape,
    /// Skipped key
    pub key: DimensionKey,
    /// Period being built
    pub period: PeriodKey,
    /// Why the key could not be folded
    pub reason: String,
}

/// Outcome of one or more period builds at a single granularity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    /// Granularity built
    pub granularity: Granularity,
    /// Periods that produced at least one row
    pub periods_built: usize,
    /// Periods with no finer data
    pub periods_empty: usize,
    /// Rows written per table family
    pub written_by_shape: BTreeMap<DimensionShape, usize>,
    /// Keys that were skipped
    pub skipped: Vec<SkippedKey>,
}

impl BuildReport {
    fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            periods_built: 0,
            periods_empty: 0,
            written_by_shape: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    /// Number of dimension keys written across all table families
    pub fn written(&self) -> usize {
        self.written_by_shape.values().sum()
    }

    /// Fold another report for the same granularity into this one
    pub fn absorb(&mut self, other: BuildReport) {
        self.periods_built += other.periods_built;
        self.periods_empty += other.periods_empty;
        for (shape, n) in other.written_by_shape {
            *self.written_by_shape.entry(shape).or_insert(0) += n;
        }
        self.skipped.extend(other.skipped);
    }
}

/// Builds rollup rows for single periods
pub struct RollupBuilder {
    store: Arc<dyn RollupStore>,
    source: Arc<dyn SourceReader>,
    schema: Arc<MetricSchema>,
    shapes: Vec<DimensionShape>,
}

impl RollupBuilder {
    /// Create a builder writing the given table families
    pub fn new(
        store: Arc<dyn RollupStore>,
        source: Arc<dyn SourceReader>,
        schema: Arc<MetricSchema>,
        shapes: Vec<DimensionShape>,
    ) -> Self {
        Self {
            store,
            source,
            schema,
            shapes,
        }
    }

    /// Metric catalog in use
    pub fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    /// Table families written
    pub fn shapes(&self) -> &[DimensionShape] {
        &self.shapes
    }

    /// Build one period
    ///
    /// Hourly accepts either a single hour or a whole day (all 24 hours).
    pub async fn build_period(
        &self,
        granularity: Granularity,
        period: PeriodKey,
        filter: &DimensionFilter,
    ) -> Result<BuildReport> {
        period.validate()?;
        let accepted = match granularity {
            Granularity::Hourly => matches!(period, PeriodKey::Hour { .. } | PeriodKey::Day { .. }),
            g => period.granularity() == g,
        };
        if !accepted {
            return Err(ValidationError::PeriodMismatch {
                granularity: granularity.to_string(),
                period: period.to_string(),
            }
            .into());
        }

        let started = Instant::now();
        let report = match granularity.source() {
            None => self.build_raw(granularity, period, filter).await?,
            Some(finer) => self.build_chained(granularity, finer, period, filter).await?,
        };

        for (shape, written) in &report.written_by_shape {
            let skipped = report.skipped.iter().filter(|s| s.shape == *shape).count();
            metrics::record_build(granularity.as_str(), shape.as_str(), *written, skipped);
        }
        metrics::record_build_duration(granularity.as_str(), started.elapsed().as_secs_f64());

        debug!(
            granularity = %granularity,
            period = %period,
            written = report.written(),
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built rollup period"
        );
        Ok(report)
    }

    /// Build every period of a granularity overlapping a range
    pub async fn build_range(
        &self,
        granularity: Granularity,
        range: &DateRange,
        filter: &DimensionFilter,
    ) -> Result<BuildReport> {
        let mut report = BuildReport::new(granularity);
        for period in PeriodKey::overlapping(granularity, range) {
            report.absorb(self.build_period(granularity, period, filter).await?);
        }
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Raw levels
    // ------------------------------------------------------------------------

    async fn build_raw(
        &self,
        granularity: Granularity,
        period: PeriodKey,
        filter: &DimensionFilter,
    ) -> Result<BuildReport> {
        let (date, hour) = match period {
            PeriodKey::Hour { date, hour } => (date, Some(hour)),
            other => (other.first_day(), None),
        };
        let txns = self.source.fetch_transactions(date, hour, filter).await?;

        // Hourly day builds are one period per hour that saw sales
        let mut buckets: BTreeMap<PeriodKey, Vec<SourceTransaction>> = BTreeMap::new();
        for txn in txns {
            let bucket = match granularity {
                Granularity::Hourly => PeriodKey::Hour {
                    date,
                    hour: txn.hour,
                },
                _ => PeriodKey::day(date),
            };
            buckets.entry(bucket).or_default().push(txn);
        }

        let mut report = BuildReport::new(granularity);
        if buckets.is_empty() {
            report.periods_empty += 1;
            return Ok(report);
        }

        for (bucket, txns) in &buckets {
            report.periods_built += 1;
            for &shape in &self.shapes {
                let mut records = Vec::new();
                for (key, key_txns) in raw::group_by_key(shape, txns) {
                    if !filter.matches(&key) {
                        continue;
                    }
                    match raw::fold_key(&key, &key_txns) {
                        Ok(mut metrics) => {
                            self.schema.apply_rates(&mut metrics);
                            let mut record = RollupRecord::new(key, *bucket);
                            record.metrics = metrics;
                            record.covered_days = 1;
                            records.push(record);
                        },
                        Err(e) => {
                            warn!(
                                granularity = %granularity,
                                period = %bucket,
                                dimension = %key,
                                error = %e,
                                "Skipping dimension key"
                            );
                            report.skipped.push(SkippedKey {
                                shape,
                                key,
                                period: *bucket,
                                reason: e.to_string(),
                            });
                        },
                    }
                }
                let written = self.upsert(shape, records).await?;
                *report.written_by_shape.entry(shape).or_insert(0) += written;
            }
        }
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Chained levels
    // ------------------------------------------------------------------------

    async fn build_chained(
        &self,
        granularity: Granularity,
        finer: Granularity,
        period: PeriodKey,
        filter: &DimensionFilter,
    ) -> Result<BuildReport> {
        let mut report = BuildReport::new(granularity);
        let span = period.date_range();
        let mut any_rows = false;

        for &shape in &self.shapes {
            let rows = self.store.scan(shape, finer, &span, filter).await?;
            if rows.is_empty() {
                continue;
            }
            any_rows = true;

            let mut by_key: BTreeMap<&DimensionKey, Vec<&RollupRecord>> = BTreeMap::new();
            for row in &rows {
                by_key.entry(&row.key).or_default().push(row);
            }

            let mut records = Vec::with_capacity(by_key.len());
            for (key, key_rows) in by_key {
                match chained::fold_records(&self.schema, key, period, &key_rows) {
                    Ok(mut record) => {
                        if granularity.tracks_growth() {
                            let prior = match period.prior() {
                                Some(prior) => self.store.get(shape, key, &prior).await?,
                                None => None,
                            };
                            chained::apply_growth(&self.schema, &mut record, prior.as_ref());
                        }
                        records.push(record);
                    },
                    Err(e) => {
                        warn!(
                            granularity = %granularity,
                            period = %period,
                            dimension = %key,
                            error = %e,
                            "Skipping dimension key"
                        );
                        report.skipped.push(SkippedKey {
                            shape,
                            key: key.clone(),
                            period,
                            reason: e.to_string(),
                        });
                    },
                }
            }

            let written = self.upsert(shape, records).await?;
            *report.written_by_shape.entry(shape).or_insert(0) += written;
        }

        if any_rows {
            report.periods_built += 1;
        } else {
            report.periods_empty += 1;
        }
        Ok(report)
    }

    async fn upsert(&self, shape: DimensionShape, records: Vec<RollupRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        Ok(self.store.upsert(shape, records).await?)
    }
}
