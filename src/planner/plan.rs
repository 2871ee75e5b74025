//! Query plans: signed operations over the rollup hierarchy

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{MetricColumn, PeriodPredicate, RollupQuery};
use crate::types::{DateRange, DimensionFilter, DimensionShape, Granularity, PeriodKey};

/// Whether an operation's rows are added to or subtracted from the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    /// Rows are summed into the result
    Add,
    /// Rows are subtracted from the merged ADD result
    Subtract,
}

impl Sign {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Sign::Add => "add",
            Sign::Subtract => "subtract",
        }
    }

    /// Opposite sign
    pub fn flip(self) -> Self {
        match self {
            Sign::Add => Sign::Subtract,
            Sign::Subtract => Sign::Add,
        }
    }
}

/// What an operation reads from its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    /// Every row whose period lies inside the range
    Range {
        /// Date range, aligned to whole periods of the operation's granularity
        range: DateRange,
    },
    /// One coarse period
    Period {
        /// The period
        period: PeriodKey,
    },
}

/// One signed read against a single rollup table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOperation {
    /// ADD or SUBTRACT
    pub sign: Sign,
    /// Table granularity
    pub granularity: Granularity,
    /// Rows read
    pub target: Target,
}

impl PlanOperation {
    /// Read a whole-period-aligned range
    pub fn range(sign: Sign, granularity: Granularity, range: DateRange) -> Self {
        Self {
            sign,
            granularity,
            target: Target::Range { range },
        }
    }

    /// Read a single period
    pub fn period(sign: Sign, period: PeriodKey) -> Self {
        Self {
            sign,
            granularity: period.granularity(),
            target: Target::Period { period },
        }
    }

    /// Dates covered by the operation
    pub fn dates(&self) -> DateRange {
        match self.target {
            Target::Range { range } => range,
            Target::Period { period } => period.date_range(),
        }
    }

    /// Rollup rows read per dimension key
    pub fn cost(&self) -> u64 {
        match self.target {
            Target::Period { .. } => 1,
            Target::Range { range } => match self.granularity {
                Granularity::Hourly => u64::from(range.days()) * 24,
                Granularity::Daily => u64::from(range.days()),
                g => PeriodKey::overlapping(g, &range)
                    .iter()
                    .filter(|p| range.covers(&p.date_range()))
                    .count() as u64,
            },
        }
    }

    /// Same operation with the opposite sign
    pub fn flipped(mut self) -> Self {
        self.sign = self.sign.flip();
        self
    }

    /// Store query for this operation
    pub fn to_query(
        &self,
        shape: DimensionShape,
        filter: &DimensionFilter,
        columns: &[MetricColumn],
    ) -> RollupQuery {
        let predicate = match self.target {
            Target::Range { range } => PeriodPredicate::Within(range),
            Target::Period { period } => PeriodPredicate::Exact(period),
        };
        RollupQuery {
            shape,
            granularity: self.granularity,
            predicate,
            filter: filter.clone(),
            columns: columns.to_vec(),
        }
    }
}

impl fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.sign {
            Sign::Add => "ADD",
            Sign::Subtract => "SUBTRACT",
        };
        match self.target {
            Target::Range { range } => write!(f, "{} {}({})", sign, self.granularity, range),
            Target::Period { period } => write!(f, "{} {}({})", sign, self.granularity, period),
        }
    }
}

/// Total cost of a list of operations
pub fn total_cost(operations: &[PlanOperation]) -> u64 {
    operations.iter().map(PlanOperation::cost).sum()
}

/// How a plan was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Range clamped to nothing
    Empty,
    /// Short range read from the hourly table
    FastPathHourly,
    /// Short range read from the daily table
    FastPathDaily,
    /// Daily rows only
    DirectDaily,
    /// Whole ISO weeks plus daily edges
    DirectWeekly,
    /// Whole months plus fine edges
    DirectMonthly,
    /// Yearly rows with excluded days subtracted
    YearlySubtraction,
    /// Monthly rows with excluded days subtracted
    MonthlySubtraction,
}

impl Strategy {
    /// Candidates of the long-range optimizer in tie-break order
    pub const CANDIDATES: [Strategy; 5] = [
        Strategy::DirectDaily,
        Strategy::DirectWeekly,
        Strategy::DirectMonthly,
        Strategy::YearlySubtraction,
        Strategy::MonthlySubtraction,
    ];

    /// snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Empty => "empty",
            Strategy::FastPathHourly => "fast_path_hourly",
            Strategy::FastPathDaily => "fast_path_daily",
            Strategy::DirectDaily => "direct_daily",
            Strategy::DirectWeekly => "direct_weekly",
            Strategy::DirectMonthly => "direct_monthly",
            Strategy::YearlySubtraction => "yearly_subtraction",
            Strategy::MonthlySubtraction => "monthly_subtraction",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cost of one evaluated candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCost {
    /// Candidate strategy
    pub strategy: Strategy,
    /// Rows read per dimension key
    pub cost: u64,
    /// Operations in the candidate plan
    pub operations: usize,
}

/// An executable plan for one range query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    /// Range as requested
    pub requested: DateRange,
    /// Range after clamping; `None` when nothing is left
    pub effective: Option<DateRange>,
    /// Table family read
    pub shape: DimensionShape,
    /// Dimension restriction
    pub filter: DimensionFilter,
    /// Columns fetched by every operation
    pub columns: Vec<MetricColumn>,
    /// Chosen strategy
    pub strategy: Strategy,
    /// Signed operations, ADDs first
    pub operations: Vec<PlanOperation>,
    /// Rows read per dimension key
    pub estimated_cost: u64,
    /// Every candidate considered, in tie-break order
    pub candidates: Vec<CandidateCost>,
}

impl QueryPlan {
    /// Store queries in operation order
    pub fn queries(&self) -> Vec<RollupQuery> {
        self.operations
            .iter()
            .map(|op| op.to_query(self.shape, &self.filter, &self.columns))
            .collect()
    }

    /// Rendered SQL of each operation
    pub fn sql(&self) -> Vec<String> {
        self.queries().iter().map(RollupQuery::to_sql).collect()
    }

    /// Human-readable plan
    pub fn explain(&self) -> String {
        let mut output = String::new();
        output.push_str("Query Plan:\n");
        output.push_str(&format!("  Requested: {}\n", self.requested));
        match self.effective {
            Some(range) => output.push_str(&format!("  Effective: {}\n", range)),
            None => output.push_str("  Effective: <empty>\n"),
        }
        output.push_str(&format!("  Strategy: {}\n", self.strategy));
        output.push_str(&format!("  Estimated cost: {}\n", self.estimated_cost));

        output.push_str("\nOperations:\n");
        for (op, sql) in self.operations.iter().zip(self.sql()) {
            output.push_str(&format!("  {} [cost {}]\n    {}\n", op, op.cost(), sql));
        }

        if !self.candidates.is_empty() {
            output.push_str("\nCandidates:\n");
            for c in &self.candidates {
                let marker = if c.strategy == self.strategy { "*" } else { " " };
                output.push_str(&format!(
                    " {} {:<20} cost {:>6}  ops {}\n",
                    marker,
                    c.strategy.as_str(),
                    c.cost,
                    c.operations
                ));
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_operation_costs() {
        let days = DateRange::new(d(2024, 1, 1), d(2024, 1, 21)).unwrap();
        assert_eq!(PlanOperation::range(Sign::Add, Granularity::Daily, days).cost(), 21);
        assert_eq!(PlanOperation::range(Sign::Add, Granularity::Hourly, days).cost(), 504);
        assert_eq!(PlanOperation::range(Sign::Add, Granularity::Weekly, days).cost(), 3);

        let months = DateRange::new(d(2024, 2, 1), d(2024, 12, 31)).unwrap();
        assert_eq!(PlanOperation::range(Sign::Add, Granularity::Monthly, months).cost(), 11);

        let year = PlanOperation::period(Sign::Add, PeriodKey::year(2024).unwrap());
        assert_eq!(year.cost(), 1);
        assert_eq!(year.granularity, Granularity::Yearly);
    }

    #[test]
    fn test_operation_display() {
        let op = PlanOperation::range(
            Sign::Subtract,
            Granularity::Daily,
            DateRange::new(d(2024, 1, 1), d(2024, 1, 21)).unwrap(),
        );
        assert_eq!(op.to_string(), "SUBTRACT daily(2024-01-01..2024-01-21)");
        assert_eq!(op.flipped().sign, Sign::Add);
    }
}
