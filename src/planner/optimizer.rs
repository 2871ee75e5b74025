//! Cost-based plan search
//!
//! Cost is the number of rollup rows a plan reads per dimension key: one per
//! coarse period, one per week, one per day (24 per day on the hourly table).
//!
//! Five candidates are evaluated for every long range and the cheapest wins,
//! with ties going to the earlier one:
//!
//! | # | candidate            | shape of the plan                                        |
//! |---|----------------------|----------------------------------------------------------|
//! | 1 | direct daily         | `+daily(range)`                                          |
//! | 2 | direct weekly        | `+daily(lead) +weekly(whole weeks) +daily(trail)`        |
//! | 3 | direct monthly       | `+fine(lead) +monthly(whole months) +fine(trail)`        |
//! | 4 | yearly + subtraction | per year: `+yearly(y) -excl(lead) -excl(trail)`          |
//! | 5 | monthly + subtraction| per month: `+monthly(m) -excl(lead) -excl(trail)`        |
//!
//! A year (or month) is only added when at least `coarse_coverage_threshold` of
//! its days fall inside the range; otherwise that segment is covered the
//! cheapest way one level down. Exclusions are the cheapest of a daily,
//! weekly-aligned or monthly-aligned cover of the excluded days, with every
//! sign flipped.
//!
//! Quarterly rollups are built but never read here: every quarter-aligned
//! range is already covered by yearly or monthly operations at equal or lower
//! cost.

use chrono::{Datelike, Days, NaiveDate};

use super::plan::{total_cost, CandidateCost, PlanOperation, Sign, Strategy, Target};
use crate::config::PlannerConfig;
use crate::types::{DateRange, Granularity, PeriodKey};

/// A list of operations covering some days, with its cost
#[derive(Debug, Clone, Default)]
struct Cover {
    ops: Vec<PlanOperation>,
    cost: u64,
}

impl Cover {
    fn single(op: PlanOperation) -> Self {
        Self {
            cost: op.cost(),
            ops: vec![op],
        }
    }

    fn push(&mut self, op: PlanOperation) {
        self.cost += op.cost();
        self.ops.push(op);
    }

    fn extend(&mut self, other: Cover) {
        self.cost += other.cost;
        self.ops.extend(other.ops);
    }

    fn flipped(self) -> Self {
        Self {
            ops: self.ops.into_iter().map(PlanOperation::flipped).collect(),
            cost: self.cost,
        }
    }
}

/// Cheapest cover; the first of equal-cost covers wins
fn cheapest(covers: impl IntoIterator<Item = Cover>) -> Cover {
    let mut best: Option<Cover> = None;
    for cover in covers {
        match &best {
            Some(b) if b.cost <= cover.cost => {},
            _ => best = Some(cover),
        }
    }
    best.unwrap_or_default()
}

/// Whole ISO weeks inside a range
fn whole_weeks(range: &DateRange) -> Option<DateRange> {
    let lead = (7 - range.start.weekday().num_days_from_monday()) % 7;
    let first_monday = range.start.checked_add_days(Days::new(u64::from(lead)))?;
    let trail = (range.end.weekday().num_days_from_monday() + 1) % 7;
    let last_sunday = range.end.checked_sub_days(Days::new(u64::from(trail)))?;
    let min_end = first_monday.checked_add_days(Days::new(6))?;
    (last_sunday >= min_end).then_some(DateRange {
        start: first_monday,
        end: last_sunday,
    })
}

/// Whole calendar months inside a range
fn whole_months(range: &DateRange) -> Option<DateRange> {
    let first = if range.start.day() == 1 {
        range.start
    } else {
        month_of(range.start).last_day().succ_opt()?
    };
    let end_month = month_of(range.end);
    let last = if end_month.last_day() == range.end {
        range.end
    } else {
        end_month.first_day().pred_opt()?
    };
    (first <= last).then_some(DateRange {
        start: first,
        end: last,
    })
}

fn month_of(date: NaiveDate) -> PeriodKey {
    PeriodKey::containing(Granularity::Monthly, date)
}

/// Merge contiguous range operations of the same sign and table, ADDs first
fn coalesce(mut ops: Vec<PlanOperation>) -> Vec<PlanOperation> {
    ops.sort_by_key(|op| (op.sign == Sign::Subtract, op.dates().start, op.granularity));

    let mut merged: Vec<PlanOperation> = Vec::with_capacity(ops.len());
    for op in ops {
        if let (Some(last), Target::Range { range: next }) = (merged.last_mut(), op.target) {
            if let Target::Range { range: prev } = &mut last.target {
                let contiguous = prev.end.succ_opt() == Some(next.start);
                if last.sign == op.sign && last.granularity == op.granularity && contiguous {
                    prev.end = next.end;
                    continue;
                }
            }
        }
        merged.push(op);
    }
    merged
}

/// Plan search over one effective range
pub struct Optimizer<'a> {
    config: &'a PlannerConfig,
}

impl<'a> Optimizer<'a> {
    /// Create an optimizer with the given limits and thresholds
    pub fn new(config: &'a PlannerConfig) -> Self {
        Self { config }
    }

    /// Single-table plan for short ranges
    pub fn fast_path(&self, range: &DateRange) -> Option<(Strategy, Vec<PlanOperation>)> {
        let days = range.days();
        if days <= self.config.hourly_fast_path_days {
            Some((
                Strategy::FastPathHourly,
                vec![PlanOperation::range(Sign::Add, Granularity::Hourly, *range)],
            ))
        } else if days <= self.config.daily_fast_path_days {
            Some((
                Strategy::FastPathDaily,
                vec![PlanOperation::range(Sign::Add, Granularity::Daily, *range)],
            ))
        } else {
            None
        }
    }

    /// Evaluate every candidate and return the cheapest plan
    pub fn optimize(&self, range: &DateRange) -> (Strategy, Vec<PlanOperation>, Vec<CandidateCost>) {
        let mut best: Option<(Strategy, Cover)> = None;
        let mut candidates = Vec::with_capacity(Strategy::CANDIDATES.len());

        for strategy in Strategy::CANDIDATES {
            let cover = self.candidate(strategy, range);
            candidates.push(CandidateCost {
                strategy,
                cost: cover.cost,
                operations: coalesce(cover.ops.clone()).len(),
            });
            match &best {
                Some((_, b)) if b.cost <= cover.cost => {},
                _ => best = Some((strategy, cover)),
            }
        }

        let (strategy, cover) = best.unwrap_or_else(|| (Strategy::DirectDaily, self.daily(range)));
        let ops = coalesce(cover.ops);
        debug_assert_eq!(total_cost(&ops), cover.cost);
        (strategy, ops, candidates)
    }

    fn candidate(&self, strategy: Strategy, range: &DateRange) -> Cover {
        match strategy {
            Strategy::DirectDaily => self.daily(range),
            Strategy::DirectWeekly => self.weekly(range),
            Strategy::DirectMonthly => self.monthly(range, true),
            Strategy::YearlySubtraction => self.yearly_subtraction(range),
            Strategy::MonthlySubtraction => self.monthly_subtraction(range),
            _ => self.daily(range),
        }
    }

    fn daily(&self, range: &DateRange) -> Cover {
        Cover::single(PlanOperation::range(Sign::Add, Granularity::Daily, *range))
    }

    fn weekly(&self, range: &DateRange) -> Cover {
        let Some(block) = whole_weeks(range) else {
            return self.daily(range);
        };
        let mut cover = Cover::default();
        if let Some(lead) = block.lead_within(range) {
            cover.extend(self.daily(&lead));
        }
        cover.push(PlanOperation::range(Sign::Add, Granularity::Weekly, block));
        if let Some(trail) = block.trail_within(range) {
            cover.extend(self.daily(&trail));
        }
        cover
    }

    /// Cheaper of daily and (optionally) weekly
    fn fine(&self, range: &DateRange, weeks: bool) -> Cover {
        if weeks {
            cheapest([self.daily(range), self.weekly(range)])
        } else {
            self.daily(range)
        }
    }

    fn monthly(&self, range: &DateRange, weeks: bool) -> Cover {
        let Some(block) = whole_months(range) else {
            return self.fine(range, weeks);
        };
        let mut cover = Cover::default();
        if let Some(lead) = block.lead_within(range) {
            cover.extend(self.fine(&lead, weeks));
        }
        cover.push(PlanOperation::range(Sign::Add, Granularity::Monthly, block));
        if let Some(trail) = block.trail_within(range) {
            cover.extend(self.fine(&trail, weeks));
        }
        cover
    }

    /// Cheapest SUBTRACT cover of excluded days
    fn exclusion(&self, range: &DateRange) -> Cover {
        let weeks = self.config.allow_weekly_exclusion;
        let mut options = vec![self.daily(range)];
        if weeks {
            options.push(self.weekly(range));
        }
        if self.config.allow_monthly_exclusion {
            options.push(self.monthly(range, weeks));
        }
        cheapest(options).flipped()
    }

    fn covered_enough(&self, segment: &DateRange, period: &DateRange) -> bool {
        f64::from(segment.days()) / f64::from(period.days()) >= self.config.coarse_coverage_threshold
    }

    /// ADD a coarse period and SUBTRACT whatever part of it lies outside `segment`
    fn coarse_minus_excess(&self, period: PeriodKey, segment: &DateRange) -> Cover {
        let span = period.date_range();
        let mut cover = Cover::single(PlanOperation::period(Sign::Add, period));
        if let Some(lead) = segment.lead_within(&span) {
            cover.extend(self.exclusion(&lead));
        }
        if let Some(trail) = segment.trail_within(&span) {
            cover.extend(self.exclusion(&trail));
        }
        cover
    }

    fn yearly_subtraction(&self, range: &DateRange) -> Cover {
        let mut cover = Cover::default();
        for period in PeriodKey::overlapping(Granularity::Yearly, range) {
            let span = period.date_range();
            let Some(segment) = range.intersect(&span) else {
                continue;
            };
            if self.covered_enough(&segment, &span) {
                cover.extend(self.coarse_minus_excess(period, &segment));
            } else {
                cover.extend(cheapest([
                    self.daily(&segment),
                    self.weekly(&segment),
                    self.monthly(&segment, true),
                    self.monthly_subtraction(&segment),
                ]));
            }
        }
        cover
    }

    fn monthly_subtraction(&self, range: &DateRange) -> Cover {
        let mut cover = Cover::default();
        for period in PeriodKey::overlapping(Granularity::Monthly, range) {
            let span = period.date_range();
            let Some(segment) = range.intersect(&span) else {
                continue;
            };
            if self.covered_enough(&segment, &span) {
                cover.extend(self.coarse_minus_excess(period, &segment));
            } else {
                cover.extend(self.fine(&segment, true));
            }
        }
        cover
    }
}
