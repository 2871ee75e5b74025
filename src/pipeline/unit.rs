//! Stage lists, unit decomposition and unit retry policy

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::builder::{BuildReport, RollupBuilder};
use crate::error::Result;
use crate::types::{DateRange, DimensionFilter, Granularity, PeriodKey};

/// Stages run for a requested rebuild depth, in dependency order
///
/// Weekly is a side branch (nothing is derived from it), so it only runs when
/// asked for directly or for a full yearly rebuild.
pub fn stages_for(depth: Granularity) -> Vec<Granularity> {
    use Granularity::*;
    match depth {
        Hourly => vec![Hourly],
        Daily => vec![Hourly, Daily],
        Weekly => vec![Hourly, Daily, Weekly],
        Monthly => vec![Hourly, Daily, Monthly],
        Quarterly => vec![Hourly, Daily, Monthly, Quarterly],
        Yearly => vec![Hourly, Daily, Weekly, Monthly, Quarterly, Yearly],
    }
}

/// One independently schedulable piece of builder work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkUnit {
    /// Build a single period
    Period {
        /// Level to build
        granularity: Granularity,
        /// Period to build
        period: PeriodKey,
    },
    /// Build every period overlapping a range
    Range {
        /// Level to build
        granularity: Granularity,
        /// Range to cover
        range: DateRange,
    },
}

impl WorkUnit {
    /// Level the unit builds
    pub fn granularity(&self) -> Granularity {
        match self {
            WorkUnit::Period { granularity, .. } | WorkUnit::Range { granularity, .. } => {
                *granularity
            },
        }
    }

    /// Run the unit once
    pub async fn run(&self, builder: &RollupBuilder, filter: &DimensionFilter) -> Result<BuildReport> {
        match self {
            WorkUnit::Period {
                granularity,
                period,
            } => builder.build_period(*granularity, *period, filter).await,
            WorkUnit::Range { granularity, range } => {
                builder.build_range(*granularity, range, filter).await
            },
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Period {
                granularity,
                period,
            } => write!(f, "{} {}", granularity, period),
            WorkUnit::Range { granularity, range } => write!(f, "{} {}", granularity, range),
        }
    }
}

/// Decompose one stage of a rebuild into units
///
/// Hourly and daily get one unit per day, weekly a single range unit, and the
/// calendar levels one unit per period overlapping the range.
pub fn units_for(stage: Granularity, range: &DateRange) -> Vec<WorkUnit> {
    match stage {
        Granularity::Hourly | Granularity::Daily => range
            .iter_days()
            .map(|date| WorkUnit::Period {
                granularity: stage,
                period: PeriodKey::day(date),
            })
            .collect(),
        Granularity::Weekly => vec![WorkUnit::Range {
            granularity: stage,
            range: *range,
        }],
        _ => PeriodKey::overlapping(stage, range)
            .into_iter()
            .map(|period| WorkUnit::Period {
                granularity: stage,
                period,
            })
            .collect(),
    }
}

/// Bounded retry with a fixed backoff and a per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub backoff: Duration,
    /// Limit on a single attempt
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn jan() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_stage_lists() {
        assert_eq!(
            stages_for(Granularity::Monthly),
            vec![Granularity::Hourly, Granularity::Daily, Granularity::Monthly]
        );
        assert_eq!(stages_for(Granularity::Yearly).len(), 6);
        assert_eq!(stages_for(Granularity::Hourly), vec![Granularity::Hourly]);
    }

    #[test]
    fn test_unit_decomposition() {
        assert_eq!(units_for(Granularity::Hourly, &jan()).len(), 31);
        assert_eq!(units_for(Granularity::Daily, &jan()).len(), 31);
        assert_eq!(units_for(Granularity::Weekly, &jan()).len(), 1);
        assert_eq!(
            units_for(Granularity::Monthly, &jan()),
            vec![WorkUnit::Period {
                granularity: Granularity::Monthly,
                period: PeriodKey::month(2025, 1).unwrap(),
            }]
        );
        assert_eq!(units_for(Granularity::Yearly, &jan()).len(), 1);
    }

    #[test]
    fn test_unit_display() {
        let unit = &units_for(Granularity::Daily, &jan())[14];
        assert_eq!(unit.to_string(), "daily 2025-01-15");
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
