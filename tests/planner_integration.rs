//! Integration tests for the query planner
//!
//! A store is rebuilt once from reproducible random orders spanning a leap
//! year, then every query answer is checked against a brute-force sum of the
//! daily rows in range.

mod common;

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use common::{approx_eq, brute_force, d, range, seed_orders};
use kuba_rollup::config::Config;
use kuba_rollup::planner::{QueryRequest, Sign, Strategy, Target};
use kuba_rollup::source::InMemorySourceReader;
use kuba_rollup::store::InMemoryRollupStore;
use kuba_rollup::types::{DateRange, DimensionFilter, DimensionShape, Granularity, PeriodKey};
use kuba_rollup::{Error, RollupEngine, RunState};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestRunner};
use tokio::runtime::Runtime;

const SUMMED: [&str; 4] = ["net_sales", "order_count", "item_quantity", "food_sales"];

fn data_start() -> NaiveDate {
    d(2023, 11, 1)
}

fn data_end() -> NaiveDate {
    d(2025, 2, 28)
}

fn today() -> NaiveDate {
    d(2025, 3, 15)
}

async fn rebuilt() -> (RollupEngine, Arc<InMemoryRollupStore>) {
    let source = InMemorySourceReader::new();
    seed_orders(&source, range(data_start(), data_end()), 42);

    let mut config = Config::default();
    config.builder.shapes = vec![DimensionShape::Store];
    config.pipeline.unit_retry_backoff_ms = 1;

    let store = Arc::new(InMemoryRollupStore::new());
    let engine = RollupEngine::builder()
        .with_store_arc(store.clone())
        .with_source(source)
        .with_config(config)
        .with_today(today())
        .build()
        .unwrap();

    let run_id = engine
        .rebuild_range(data_start(), data_end(), Granularity::Yearly)
        .await
        .unwrap();
    let status = engine.wait_for_run(run_id).await.unwrap();
    assert_eq!(status.state, RunState::Completed);
    (engine, store)
}

/// Query a range and compare every key against the daily rows
async fn check_against_brute_force(
    engine: &RollupEngine,
    store: &InMemoryRollupStore,
    dates: DateRange,
) -> Result<(), String> {
    let mut metrics: Vec<&str> = SUMMED.to_vec();
    metrics.push("avg_ticket");
    let result = engine
        .query(&QueryRequest::new(dates.start, dates.end, metrics.iter().copied()))
        .await
        .map_err(|e| e.to_string())?;

    let daily = store.rows(DimensionShape::Store, Granularity::Daily);
    let expected = brute_force(&daily, &dates, &SUMMED);

    let got: Vec<_> = result.rows.iter().map(|r| r.key.clone()).collect();
    let want: Vec<_> = expected.keys().cloned().collect();
    if got != want {
        return Err(format!("{}: keys {:?} != {:?}", dates, got, want));
    }

    for row in &result.rows {
        let totals = &expected[&row.key];
        for metric in SUMMED {
            let value = row.value(metric).unwrap_or(0.0);
            if value < 0.0 {
                return Err(format!("{} {} {}: negative {}", dates, row.key, metric, value));
            }
            if !approx_eq(value, totals[metric]) {
                return Err(format!(
                    "{} {} {} ({}): {} != {}",
                    dates, row.key, metric, result.plan.strategy, value, totals[metric]
                ));
            }
        }
        let ticket = totals["net_sales"] / totals["order_count"];
        match row.value("avg_ticket") {
            Some(v) if approx_eq(v, ticket) => {},
            other => {
                return Err(format!("{} {}: avg_ticket {:?} != {}", dates, row.key, other, ticket))
            },
        }
    }

    let hourly = result.plan.strategy == Strategy::FastPathHourly;
    if !hourly && result.plan.estimated_cost > u64::from(dates.days()) {
        return Err(format!(
            "{}: cost {} above direct daily {}",
            dates,
            result.plan.estimated_cost,
            dates.days()
        ));
    }
    Ok(())
}

// ============================================================================
// Fixed scenarios
// ============================================================================

#[tokio::test]
async fn test_fixed_ranges_match_brute_force() {
    let (engine, store) = rebuilt().await;
    let cases = [
        // single day, hourly fast path
        (d(2024, 7, 4), d(2024, 7, 4)),
        // two weeks, daily fast path
        (d(2024, 2, 20), d(2024, 3, 4)),
        // year minus leading weeks plus trailing days
        (d(2024, 1, 22), d(2025, 1, 2)),
        // whole leap year
        (d(2024, 1, 1), d(2024, 12, 31)),
        // month-aligned quarter
        (d(2024, 4, 1), d(2024, 6, 30)),
        // crosses leap day and a year boundary
        (d(2023, 12, 30), d(2024, 3, 2)),
        // starts before any data, S3 opens mid-range
        (d(2023, 10, 15), d(2024, 8, 20)),
        // everything
        (d(2023, 11, 1), d(2025, 2, 28)),
    ];
    for (start, end) in cases {
        check_against_brute_force(&engine, &store, range(start, end))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_year_minus_weeks_plan() {
    let (engine, _) = rebuilt().await;
    let plan = engine
        .explain(&QueryRequest::new(d(2024, 1, 22), d(2025, 1, 2), ["net_sales"]))
        .unwrap();

    assert_eq!(plan.strategy, Strategy::YearlySubtraction);
    assert!(plan.operations.iter().any(|op| op.sign == Sign::Add
        && op.target
            == Target::Period {
                period: PeriodKey::year(2024).unwrap()
            }));

    let subtracted: Vec<DateRange> = plan
        .operations
        .iter()
        .filter(|op| op.sign == Sign::Subtract)
        .map(|op| op.dates())
        .collect();
    assert_eq!(subtracted, vec![range(d(2024, 1, 1), d(2024, 1, 21))]);

    assert!(plan.operations.iter().any(|op| op.sign == Sign::Add
        && op.granularity == Granularity::Daily
        && op.dates() == range(d(2025, 1, 1), d(2025, 1, 2))));

    let direct_daily = plan
        .candidates
        .iter()
        .find(|c| c.strategy == Strategy::DirectDaily)
        .unwrap();
    assert_eq!(direct_daily.cost, 347);
    assert!(plan.estimated_cost < direct_daily.cost);
    assert!(plan.estimated_cost <= 24);

    let text = plan.explain();
    assert!(text.contains("Strategy: yearly_subtraction"));
    assert!(text.contains("FROM store_yearly_rollup"));
}

#[tokio::test]
async fn test_single_day_fast_path() {
    let (engine, store) = rebuilt().await;
    let result = engine
        .query(&QueryRequest::new(d(2025, 2, 10), d(2025, 2, 10), ["net_sales"]))
        .await
        .unwrap();
    assert_eq!(result.metadata.strategy, Strategy::FastPathHourly);
    assert_eq!(result.metadata.operations_executed, 1);
    assert_eq!(result.plan.operations[0].granularity, Granularity::Hourly);
    assert!(result.metadata.rows_scanned > 0);

    let daily = store.rows(DimensionShape::Store, Granularity::Daily);
    let expected = brute_force(&daily, &DateRange::day(d(2025, 2, 10)), &["net_sales"]);
    for row in &result.rows {
        assert!(approx_eq(row.value("net_sales").unwrap(), expected[&row.key]["net_sales"]));
    }
}

#[tokio::test]
async fn test_filter_restricts_keys() {
    let (engine, _) = rebuilt().await;
    let result = engine
        .query(
            &QueryRequest::new(d(2024, 1, 1), d(2024, 12, 31), ["net_sales"])
                .with_filter(DimensionFilter::stores(["S3"])),
        )
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].key.store_id, "S3");
    assert!(result.plan.sql().iter().all(|sql| sql.contains("store_id IN ('S3')")));
}

#[tokio::test]
async fn test_invalid_and_empty_ranges() {
    let (engine, _) = rebuilt().await;

    let err = engine
        .query(&QueryRequest::new(d(2024, 5, 1), d(2024, 4, 1), ["net_sales"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Query(ref q) if q.is_validation()));

    let err = engine
        .query(&QueryRequest::new(d(2024, 4, 1), d(2024, 5, 1), ["basket_size"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Query(ref q) if q.is_validation()));

    // Entirely after "today"
    let result = engine
        .query(&QueryRequest::new(d(2025, 4, 1), d(2025, 4, 30), ["net_sales"]))
        .await
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(result.metadata.strategy, Strategy::Empty);
    assert_eq!(result.metadata.operations_executed, 0);

    // Range before any data
    let result = engine
        .query(&QueryRequest::new(d(2022, 1, 1), d(2022, 12, 31), ["net_sales"]))
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_store_outage_fails_whole_query() {
    let (engine, store) = rebuilt().await;
    store.set_available(false);
    let err = engine
        .query(&QueryRequest::new(d(2024, 1, 22), d(2025, 1, 2), ["net_sales"]))
        .await
        .unwrap_err();
    match err {
        Error::Query(q) => assert_eq!(q.kind, kuba_rollup::planner::QueryErrorKind::ExecutionError),
        other => panic!("unexpected error: {}", other),
    }
}

// ============================================================================
// Property tests
// ============================================================================

#[test]
fn prop_random_ranges_match_brute_force() {
    let rt = Runtime::new().unwrap();
    let (engine, store) = rt.block_on(rebuilt());

    let span = (data_end() - data_start()).num_days() as u64 + 30;
    let strategy = (0..span, 0u64..500);

    let mut runner = TestRunner::new(ProptestConfig::with_cases(96));
    runner
        .run(&strategy, |(offset, length)| {
            let start = d(2023, 10, 15).checked_add_days(Days::new(offset)).unwrap();
            let end = start.checked_add_days(Days::new(length)).unwrap().min(today());
            prop_assume!(start <= end);

            rt.block_on(check_against_brute_force(&engine, &store, range(start, end)))
                .map_err(TestCaseError::fail)
        })
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The chosen plan never costs more than reading every day
    #[test]
    fn prop_plan_cost_at_most_daily(offset in 0u64..3000, length in 15u64..2000) {
        let config = Config::default();
        let engine = RollupEngine::builder()
            .with_source(InMemorySourceReader::new())
            .with_config(config)
            .with_today(d(2030, 1, 1))
            .build()
            .unwrap();
        let start = d(2020, 1, 1).checked_add_days(Days::new(offset)).unwrap();
        let end = start.checked_add_days(Days::new(length)).unwrap();

        let plan = engine
            .explain(&QueryRequest::new(start, end, ["net_sales"]))
            .unwrap();
        let days = u64::from(range(start, end).days());

        prop_assert!(plan.estimated_cost <= days);
        prop_assert!(plan.candidates.iter().all(|c| c.cost >= plan.estimated_cost));

        // Operations cover every day exactly once net of subtractions
        let mut coverage = std::collections::BTreeMap::new();
        for op in &plan.operations {
            let delta: i32 = if op.sign == Sign::Add { 1 } else { -1 };
            for day in op.dates().iter_days() {
                *coverage.entry(day).or_insert(0) += delta;
            }
        }
        for day in range(start, end).iter_days() {
            prop_assert_eq!(coverage.get(&day).copied(), Some(1), "{} not covered once", day);
        }
        for (day, count) in coverage {
            if day < start || day > end {
                prop_assert_eq!(count, 0, "{} outside range counted {} times", day, count);
            }
        }
    }
}
