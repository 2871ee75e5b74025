//! Core data types used throughout the rollup engine
//!
//! # Key Types
//!
//! - **`Granularity`**: one level of the rollup hierarchy (hourly .. yearly)
//! - **`DimensionShape`**: which table family a row belongs to (store, store+item)
//! - **`DimensionKey`**: the entity a rollup row summarizes
//! - **`PeriodKey`**: the time bucket a rollup row summarizes
//! - **`DateRange`**: inclusive business-date window
//! - **`RollupRecord`**: one row per (dimension key, period key) in a rollup table
//!
//! # Example
//!
//! ```rust
//! use chrono::NaiveDate;
//! use kuba_rollup::types::{DateRange, Granularity, PeriodKey};
//!
//! let jan = PeriodKey::month(2025, 1).unwrap();
//! assert_eq!(jan.granularity(), Granularity::Monthly);
//! assert_eq!(jan.date_range().days(), 31);
//!
//! let range = DateRange::new(
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
//! )
//! .unwrap();
//! assert!(range.covers(&jan.date_range()));
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ============================================================================
// Granularity
// ============================================================================

/// One level of the rollup hierarchy
///
/// The mapping from each variant to its build source, cost-model unit size and
/// growth suffix is total and lives here so nothing dispatches on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Business date + hour
    Hourly,
    /// Business date
    Daily,
    /// ISO year + ISO week
    Weekly,
    /// Calendar year + month
    Monthly,
    /// Calendar year + quarter
    Quarterly,
    /// Calendar year
    Yearly,
}

impl Granularity {
    /// Every granularity, finest first
    pub const ALL: [Granularity; 6] = [
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Quarterly,
        Granularity::Yearly,
    ];

    /// Lowercase name used in table names, logs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Quarterly => "quarterly",
            Granularity::Yearly => "yearly",
        }
    }

    /// Level this granularity is folded from (`None` = raw source data)
    pub fn source(&self) -> Option<Granularity> {
        match self {
            Granularity::Hourly | Granularity::Daily => None,
            Granularity::Weekly | Granularity::Monthly => Some(Granularity::Daily),
            Granularity::Quarterly => Some(Granularity::Monthly),
            Granularity::Yearly => Some(Granularity::Quarterly),
        }
    }

    /// Days per unit in the planner cost model
    pub fn unit_days(&self) -> u32 {
        match self {
            Granularity::Hourly | Granularity::Daily => 1,
            Granularity::Weekly => 7,
            Granularity::Monthly => 30,
            Granularity::Quarterly => 91,
            Granularity::Yearly => 365,
        }
    }

    /// Whether records at this level carry period-over-period growth fields
    pub fn tracks_growth(&self) -> bool {
        !matches!(self, Granularity::Hourly | Granularity::Daily)
    }

    /// Suffix used in `<metric>_vs_prior_<suffix>` growth fields
    pub fn period_noun(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hour",
            Granularity::Daily => "day",
            Granularity::Weekly => "week",
            Granularity::Monthly => "month",
            Granularity::Quarterly => "quarter",
            Granularity::Yearly => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            "quarterly" | "quarter" => Ok(Granularity::Quarterly),
            "yearly" | "year" => Ok(Granularity::Yearly),
            other => Err(ValidationError::UnknownGranularity(other.to_string())),
        }
    }
}

// ============================================================================
// Dimensions
// ============================================================================

/// Table family a rollup row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionShape {
    /// Keyed by store
    Store,
    /// Keyed by store + item
    StoreItem,
}

impl DimensionShape {
    /// Name used in table names and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionShape::Store => "store",
            DimensionShape::StoreItem => "store_item",
        }
    }

    /// Rollup table holding this shape at the given granularity
    pub fn table_name(&self, granularity: Granularity) -> String {
        format!("{}_{}_rollup", self.as_str(), granularity.as_str())
    }

    /// Columns that make up the dimension key
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            DimensionShape::Store => &["store_id"],
            DimensionShape::StoreItem => &["store_id", "item_id"],
        }
    }
}

impl fmt::Display for DimensionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DimensionShape {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "store" => Ok(DimensionShape::Store),
            "store_item" | "store+item" => Ok(DimensionShape::StoreItem),
            other => Err(ValidationError::UnknownShape(other.to_string())),
        }
    }
}

/// Entity identity a rollup row summarizes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionKey {
    /// Store identifier
    pub store_id: String,
    /// Item identifier (store+item shape only)
    pub item_id: Option<String>,
}

impl DimensionKey {
    /// Store-level key
    pub fn store(store_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            item_id: None,
        }
    }

    /// Store+item key
    pub fn store_item(store_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            item_id: Some(item_id.into()),
        }
    }

    /// Table family this key belongs to
    pub fn shape(&self) -> DimensionShape {
        if self.item_id.is_some() {
            DimensionShape::StoreItem
        } else {
            DimensionShape::Store
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item_id {
            Some(item) => write!(f, "store={},item={}", self.store_id, item),
            None => write!(f, "store={}", self.store_id),
        }
    }
}

/// Restricts which dimension keys an operation touches
///
/// Empty sets mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionFilter {
    /// Allowed store ids
    #[serde(default)]
    pub stores: BTreeSet<String>,
    /// Allowed item ids
    #[serde(default)]
    pub items: BTreeSet<String>,
}

impl DimensionFilter {
    /// Filter that matches every key
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter on a set of stores
    pub fn stores<I, S>(stores: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stores: stores.into_iter().map(Into::into).collect(),
            items: BTreeSet::new(),
        }
    }

    /// Add an item restriction
    pub fn with_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    /// True when nothing is filtered out
    pub fn is_unrestricted(&self) -> bool {
        self.stores.is_empty() && self.items.is_empty()
    }

    /// Check a store id against the store restriction
    pub fn matches_store(&self, store_id: &str) -> bool {
        self.stores.is_empty() || self.stores.contains(store_id)
    }

    /// Check an item id against the item restriction
    pub fn matches_item(&self, item_id: &str) -> bool {
        self.items.is_empty() || self.items.contains(item_id)
    }

    /// Check a full dimension key
    ///
    /// Item restrictions do not apply to store-level keys.
    pub fn matches(&self, key: &DimensionKey) -> bool {
        if !self.matches_store(&key.store_id) {
            return false;
        }
        match &key.item_id {
            Some(item) => self.matches_item(item),
            None => true,
        }
    }
}

// ============================================================================
// Date Range
// ============================================================================

/// Inclusive range of business dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    /// First business date (inclusive)
    pub start: NaiveDate,
    /// Last business date (inclusive)
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a validated range
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Single-day range
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Number of days in the range
    pub fn days(&self) -> u32 {
        ((self.end - self.start).num_days() + 1) as u32
    }

    /// Whether the range contains a date
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Whether the range fully covers another range
    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Overlapping part of two ranges
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(DateRange { start, end })
    }

    /// Iterate every date in the range
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Part of `outer` strictly before this range
    pub fn lead_within(&self, outer: &DateRange) -> Option<DateRange> {
        let end = self.start.pred_opt()?;
        (outer.start <= end).then_some(DateRange {
            start: outer.start,
            end,
        })
    }

    /// Part of `outer` strictly after this range
    pub fn trail_within(&self, outer: &DateRange) -> Option<DateRange> {
        let start = self.end.succ_opt()?;
        (start <= outer.end).then_some(DateRange {
            start,
            end: outer.end,
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

// ============================================================================
// Period Key
// ============================================================================

/// Time bucket identity of a rollup row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PeriodKey {
    /// One hour of a business date
    Hour {
        /// Business date
        date: NaiveDate,
        /// Hour of day, 0..=23
        hour: u32,
    },
    /// One business date
    Day {
        /// Business date
        date: NaiveDate,
    },
    /// One ISO week
    Week {
        /// ISO week-numbering year
        year: i32,
        /// ISO week, 1..=53
        week: u32,
    },
    /// One calendar month
    Month {
        /// Calendar year
        year: i32,
        /// Month, 1..=12
        month: u32,
    },
    /// One calendar quarter
    Quarter {
        /// Calendar year
        year: i32,
        /// Quarter, 1..=4
        quarter: u32,
    },
    /// One calendar year
    Year {
        /// Calendar year
        year: i32,
    },
}

impl PeriodKey {
    /// Validated hour period
    pub fn hour(date: NaiveDate, hour: u32) -> Result<Self, ValidationError> {
        if hour > 23 {
            return Err(ValidationError::InvalidPeriod(format!("hour {}", hour)));
        }
        Ok(PeriodKey::Hour { date, hour })
    }

    /// Day period
    pub fn day(date: NaiveDate) -> Self {
        PeriodKey::Day { date }
    }

    /// Validated ISO week period
    pub fn week(year: i32, week: u32) -> Result<Self, ValidationError> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .map(|_| PeriodKey::Week { year, week })
            .ok_or_else(|| ValidationError::InvalidPeriod(format!("{}-W{:02}", year, week)))
    }

    /// Validated month period
    pub fn month(year: i32, month: u32) -> Result<Self, ValidationError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|_| PeriodKey::Month { year, month })
            .ok_or_else(|| ValidationError::InvalidPeriod(format!("{}-{:02}", year, month)))
    }

    /// Validated quarter period
    pub fn quarter(year: i32, quarter: u32) -> Result<Self, ValidationError> {
        if !(1..=4).contains(&quarter) || NaiveDate::from_ymd_opt(year, 1, 1).is_none() {
            return Err(ValidationError::InvalidPeriod(format!("{}-Q{}", year, quarter)));
        }
        Ok(PeriodKey::Quarter { year, quarter })
    }

    /// Validated year period
    pub fn year(year: i32) -> Result<Self, ValidationError> {
        NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|_| NaiveDate::from_ymd_opt(year, 12, 31))
            .map(|_| PeriodKey::Year { year })
            .ok_or_else(|| ValidationError::InvalidPeriod(format!("year {}", year)))
    }

    /// Re-check a period that did not come from a validating constructor
    ///
    /// Fields are public and the type deserializes, so a caller can hold a
    /// `Month { month: 13 }` or `Quarter { quarter: 0 }`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            PeriodKey::Hour { date, hour } => PeriodKey::hour(date, hour).map(|_| ()),
            PeriodKey::Day { .. } => Ok(()),
            PeriodKey::Week { year, week } => PeriodKey::week(year, week).map(|_| ()),
            PeriodKey::Month { year, month } => PeriodKey::month(year, month).map(|_| ()),
            PeriodKey::Quarter { year, quarter } => PeriodKey::quarter(year, quarter).map(|_| ()),
            PeriodKey::Year { year } => PeriodKey::year(year).map(|_| ()),
        }
    }

    /// Period of the given granularity containing a date
    ///
    /// Hourly work is addressed by business date, so `Hourly` maps to the day.
    pub fn containing(granularity: Granularity, date: NaiveDate) -> Self {
        match granularity {
            Granularity::Hourly | Granularity::Daily => PeriodKey::Day { date },
            Granularity::Weekly => {
                let iso = date.iso_week();
                PeriodKey::Week {
                    year: iso.year(),
                    week: iso.week(),
                }
            },
            Granularity::Monthly => PeriodKey::Month {
                year: date.year(),
                month: date.month(),
            },
            Granularity::Quarterly => PeriodKey::Quarter {
                year: date.year(),
                quarter: (date.month() - 1) / 3 + 1,
            },
            Granularity::Yearly => PeriodKey::Year { year: date.year() },
        }
    }

    /// Every period of a granularity overlapping a range, in time order
    pub fn overlapping(granularity: Granularity, range: &DateRange) -> Vec<PeriodKey> {
        let mut periods = Vec::new();
        let mut cursor = range.start;
        loop {
            let period = PeriodKey::containing(granularity, cursor);
            let last = period.last_day();
            periods.push(period);
            if last >= range.end {
                break;
            }
            match last.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        periods
    }

    /// Granularity this period belongs to
    pub fn granularity(&self) -> Granularity {
        match self {
            PeriodKey::Hour { .. } => Granularity::Hourly,
            PeriodKey::Day { .. } => Granularity::Daily,
            PeriodKey::Week { .. } => Granularity::Weekly,
            PeriodKey::Month { .. } => Granularity::Monthly,
            PeriodKey::Quarter { .. } => Granularity::Quarterly,
            PeriodKey::Year { .. } => Granularity::Yearly,
        }
    }

    /// First business date in the period
    pub fn first_day(&self) -> NaiveDate {
        match *self {
            PeriodKey::Hour { date, .. } | PeriodKey::Day { date } => date,
            PeriodKey::Week { year, week } => {
                NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).unwrap_or(NaiveDate::MIN)
            },
            PeriodKey::Month { year, month } => {
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
            },
            PeriodKey::Quarter { year, quarter } => quarter
                .checked_sub(1)
                .and_then(|q| q.checked_mul(3))
                .and_then(|m| NaiveDate::from_ymd_opt(year, m.checked_add(1)?, 1))
                .unwrap_or(NaiveDate::MIN),
            PeriodKey::Year { year } => NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN),
        }
    }

    /// Last business date in the period
    pub fn last_day(&self) -> NaiveDate {
        let first = self.first_day();
        match *self {
            PeriodKey::Hour { date, .. } | PeriodKey::Day { date } => date,
            PeriodKey::Week { .. } => first.checked_add_days(Days::new(6)).unwrap_or(NaiveDate::MAX),
            PeriodKey::Month { .. } => end_of_months(first, 1),
            PeriodKey::Quarter { .. } => end_of_months(first, 3),
            PeriodKey::Year { year } => NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }

    /// Business dates covered by the period
    pub fn date_range(&self) -> DateRange {
        DateRange {
            start: self.first_day(),
            end: self.last_day(),
        }
    }

    /// Immediately preceding period of the same granularity
    pub fn prior(&self) -> Option<PeriodKey> {
        match *self {
            PeriodKey::Hour { date, hour } => {
                if hour > 0 {
                    Some(PeriodKey::Hour {
                        date,
                        hour: hour - 1,
                    })
                } else {
                    date.pred_opt().map(|d| PeriodKey::Hour { date: d, hour: 23 })
                }
            },
            PeriodKey::Day { date } => date.pred_opt().map(|d| PeriodKey::Day { date: d }),
            PeriodKey::Week { .. } | PeriodKey::Month { .. } | PeriodKey::Quarter { .. } => self
                .first_day()
                .pred_opt()
                .map(|d| PeriodKey::containing(self.granularity(), d)),
            PeriodKey::Year { year } => PeriodKey::year(year - 1).ok(),
        }
    }
}

/// Last day of the `months`-long block starting at `first`
fn end_of_months(first: NaiveDate, months: u32) -> NaiveDate {
    first
        .checked_add_months(chrono::Months::new(months))
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKey::Hour { date, hour } => write!(f, "{}T{:02}", date, hour),
            PeriodKey::Day { date } => write!(f, "{}", date),
            PeriodKey::Week { year, week } => write!(f, "{}-W{:02}", year, week),
            PeriodKey::Month { year, month } => write!(f, "{}-{:02}", year, month),
            PeriodKey::Quarter { year, quarter } => write!(f, "{}-Q{}", year, quarter),
            PeriodKey::Year { year } => write!(f, "{}", year),
        }
    }
}

// ============================================================================
// Rollup Record
// ============================================================================

/// One row of a rollup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRecord {
    /// Entity this row summarizes
    pub key: DimensionKey,
    /// Time bucket this row summarizes
    pub period: PeriodKey,
    /// Summable and derived-rate metric values
    pub metrics: BTreeMap<String, f64>,
    /// Growth fields; a missing entry means "no prior data", never zero
    #[serde(default)]
    pub growth: BTreeMap<String, f64>,
    /// Number of daily rows folded into this record (1 for hourly/daily rows)
    pub covered_days: u32,
}

impl RollupRecord {
    /// Empty record for a key and period
    pub fn new(key: DimensionKey, period: PeriodKey) -> Self {
        Self {
            key,
            period,
            metrics: BTreeMap::new(),
            growth: BTreeMap::new(),
            covered_days: 0,
        }
    }

    /// Metric value, zero when absent
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }

    /// Growth field value, `None` when no prior record existed
    pub fn growth_field(&self, name: &str) -> Option<f64> {
        self.growth.get(name).copied()
    }

    /// Granularity of the row
    pub fn granularity(&self) -> Granularity {
        self.period.granularity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_granularity_parse_and_display() {
        for g in Granularity::ALL {
            assert_eq!(g.as_str().parse::<Granularity>().unwrap(), g);
        }
        assert!(matches!(
            "fortnightly".parse::<Granularity>(),
            Err(ValidationError::UnknownGranularity(_))
        ));
    }

    #[test]
    fn test_granularity_sources_form_chain() {
        assert_eq!(Granularity::Hourly.source(), None);
        assert_eq!(Granularity::Daily.source(), None);
        assert_eq!(Granularity::Weekly.source(), Some(Granularity::Daily));
        assert_eq!(Granularity::Monthly.source(), Some(Granularity::Daily));
        assert_eq!(Granularity::Quarterly.source(), Some(Granularity::Monthly));
        assert_eq!(Granularity::Yearly.source(), Some(Granularity::Quarterly));
    }

    #[test]
    fn test_date_range_validation() {
        assert!(DateRange::new(d(2025, 2, 1), d(2025, 1, 1)).is_err());
        let r = DateRange::new(d(2024, 2, 1), d(2024, 2, 29)).unwrap();
        assert_eq!(r.days(), 29);
        assert_eq!(r.iter_days().count(), 29);
    }

    #[test]
    fn test_lead_and_trail() {
        let year = PeriodKey::year(2024).unwrap().date_range();
        let inner = DateRange::new(d(2024, 1, 22), d(2024, 12, 31)).unwrap();
        assert_eq!(
            inner.lead_within(&year),
            Some(DateRange::new(d(2024, 1, 1), d(2024, 1, 21)).unwrap())
        );
        assert_eq!(inner.trail_within(&year), None);
    }

    #[test]
    fn test_week_boundaries_cross_years() {
        // 2024-12-30 belongs to ISO week 1 of 2025
        let week = PeriodKey::containing(Granularity::Weekly, d(2024, 12, 30));
        assert_eq!(week, PeriodKey::Week { year: 2025, week: 1 });
        assert_eq!(week.first_day(), d(2024, 12, 30));
        assert_eq!(week.last_day(), d(2025, 1, 5));
        assert_eq!(
            week.prior(),
            Some(PeriodKey::Week {
                year: 2024,
                week: 52
            })
        );
    }

    #[test]
    fn test_month_and_quarter_lengths() {
        assert_eq!(PeriodKey::month(2024, 2).unwrap().date_range().days(), 29);
        assert_eq!(PeriodKey::month(2025, 2).unwrap().date_range().days(), 28);
        assert_eq!(PeriodKey::quarter(2025, 4).unwrap().last_day(), d(2025, 12, 31));
        assert_eq!(PeriodKey::year(2024).unwrap().date_range().days(), 366);
        assert!(PeriodKey::month(2025, 13).is_err());
        assert!(PeriodKey::quarter(2025, 5).is_err());
        assert!(PeriodKey::week(2025, 53).is_err());
        assert!(PeriodKey::week(2020, 53).is_ok());
    }

    #[test]
    fn test_validate_rejects_hand_built_periods() {
        let zero: PeriodKey =
            serde_json::from_str(r#"{"kind":"quarter","year":2025,"quarter":0}"#).unwrap();
        assert!(zero.validate().is_err());
        assert_eq!(zero.first_day(), NaiveDate::MIN);

        assert!(PeriodKey::Month { year: 2025, month: 13 }.validate().is_err());
        assert!(PeriodKey::Week { year: 2025, week: 60 }.validate().is_err());
        assert!(PeriodKey::Hour { date: d(2025, 1, 1), hour: 24 }.validate().is_err());
        assert!(PeriodKey::Quarter { year: 2025, quarter: 4 }.validate().is_ok());
        assert!(PeriodKey::day(d(2025, 1, 1)).validate().is_ok());
    }

    #[test]
    fn test_prior_periods() {
        assert_eq!(
            PeriodKey::month(2025, 1).unwrap().prior(),
            Some(PeriodKey::Month {
                year: 2024,
                month: 12
            })
        );
        assert_eq!(
            PeriodKey::quarter(2025, 1).unwrap().prior(),
            Some(PeriodKey::Quarter {
                year: 2024,
                quarter: 4
            })
        );
        assert_eq!(
            PeriodKey::hour(d(2025, 1, 1), 0).unwrap().prior(),
            Some(PeriodKey::Hour {
                date: d(2024, 12, 31),
                hour: 23
            })
        );
    }

    #[test]
    fn test_overlapping_periods() {
        let r = DateRange::new(d(2025, 1, 15), d(2025, 4, 2)).unwrap();
        let months = PeriodKey::overlapping(Granularity::Monthly, &r);
        assert_eq!(months.len(), 4);
        let quarters = PeriodKey::overlapping(Granularity::Quarterly, &r);
        assert_eq!(quarters.len(), 2);
        let days = PeriodKey::overlapping(Granularity::Daily, &r);
        assert_eq!(days.len(), r.days() as usize);
    }

    #[test]
    fn test_dimension_filter() {
        let f = DimensionFilter::stores(["S1"]).with_items(["I1"]);
        assert!(f.matches(&DimensionKey::store("S1")));
        assert!(f.matches(&DimensionKey::store_item("S1", "I1")));
        assert!(!f.matches(&DimensionKey::store_item("S1", "I2")));
        assert!(!f.matches(&DimensionKey::store("S2")));
        assert!(DimensionFilter::all().is_unrestricted());
    }
}
