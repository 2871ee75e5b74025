//! Roll-up consistency and idempotence of the rollup builder
//!
//! Every coarse row must equal the sum of the finer rows inside its period for
//! every summable metric, and rebuilding with unchanged source data must
//! leave every row as it was.

mod common;

use std::sync::Arc;

use common::{approx_eq, d, range, seed_orders};
use kuba_rollup::config::Config;
use kuba_rollup::schema::MetricSchema;
use kuba_rollup::source::InMemorySourceReader;
use kuba_rollup::store::InMemoryRollupStore;
use kuba_rollup::types::{DateRange, DimensionFilter, DimensionShape, Granularity, PeriodKey};
use kuba_rollup::{RollupEngine, RunState};

async fn rebuilt_engine(dates: DateRange) -> (RollupEngine, Arc<InMemoryRollupStore>) {
    let source = InMemorySourceReader::new();
    seed_orders(&source, dates, 7);

    let mut config = Config::default();
    config.pipeline.unit_retry_backoff_ms = 1;
    let store = Arc::new(InMemoryRollupStore::new());
    let engine = RollupEngine::builder()
        .with_store_arc(store.clone())
        .with_source(source)
        .with_config(config)
        .build()
        .unwrap();

    let run_id = engine
        .rebuild_range(dates.start, dates.end, Granularity::Yearly)
        .await
        .unwrap();
    let status = engine.wait_for_run(run_id).await.unwrap();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.units_failed, 0);
    (engine, store)
}

fn assert_rolls_up(
    store: &InMemoryRollupStore,
    schema: &MetricSchema,
    shape: DimensionShape,
    finer: Granularity,
    coarser: Granularity,
) {
    let finer_rows = store.rows(shape, finer);
    let coarse_rows = store.rows(shape, coarser);
    assert!(!coarse_rows.is_empty(), "no {} {} rows", shape, coarser);

    for coarse in &coarse_rows {
        let span = coarse.period.date_range();
        let parts: Vec<_> = finer_rows
            .iter()
            .filter(|r| r.key == coarse.key && span.covers(&r.period.date_range()))
            .collect();
        assert!(!parts.is_empty());

        for metric in schema.summable() {
            let expected: f64 = parts.iter().map(|r| r.metric(&metric.name)).sum();
            assert!(
                approx_eq(coarse.metric(&metric.name), expected),
                "{} {} {} {}: {} != {}",
                shape,
                coarser,
                coarse.key,
                metric.name,
                coarse.metric(&metric.name),
                expected
            );
        }
        if finer != Granularity::Hourly {
            let days: u32 = parts.iter().map(|r| r.covered_days).sum();
            assert_eq!(coarse.covered_days, days);
        }
    }
}

#[tokio::test]
async fn test_every_level_sums_its_source() {
    let (engine, store) = rebuilt_engine(range(d(2023, 12, 15), d(2024, 4, 10))).await;
    let schema = engine.schema();

    for shape in [DimensionShape::Store, DimensionShape::StoreItem] {
        for (finer, coarser) in [
            (Granularity::Hourly, Granularity::Daily),
            (Granularity::Daily, Granularity::Weekly),
            (Granularity::Daily, Granularity::Monthly),
            (Granularity::Monthly, Granularity::Quarterly),
            (Granularity::Quarterly, Granularity::Yearly),
        ] {
            assert_rolls_up(&store, schema, shape, finer, coarser);
        }
    }
}

#[tokio::test]
async fn test_rates_recomputed_from_components() {
    let (_, store) = rebuilt_engine(range(d(2024, 1, 1), d(2024, 2, 29))).await;
    for row in store.rows(DimensionShape::Store, Granularity::Monthly) {
        let orders = row.metric("order_count");
        let expected = row.metric("net_sales") / orders;
        assert!(approx_eq(row.metrics["avg_ticket"], expected));

        let used = row.metric("portal_used_orders");
        match row.metrics.get("portal_on_time_rate") {
            Some(rate) => assert!(approx_eq(*rate, row.metric("portal_on_time_orders") / used * 100.0)),
            None => assert_eq!(used, 0.0),
        }
    }
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let dates = range(d(2024, 2, 20), d(2024, 3, 12));
    let (engine, store) = rebuilt_engine(dates).await;

    // Summable fields only: growth of a period rebuilt alongside its prior
    // period depends on unit scheduling
    let snapshot = |store: &InMemoryRollupStore| {
        Granularity::ALL
            .iter()
            .flat_map(|g| store.rows(DimensionShape::Store, *g))
            .map(|r| (r.key, r.period, r.metrics, r.covered_days))
            .collect::<Vec<_>>()
    };
    let before = snapshot(&store);

    // A single period built twice
    let all = DimensionFilter::all();
    let day = PeriodKey::day(d(2024, 3, 1));
    engine.build_period(Granularity::Daily, day, &all).await.unwrap();
    engine.build_period(Granularity::Daily, day, &all).await.unwrap();
    assert_eq!(snapshot(&store), before);

    // The whole range rebuilt again
    let run_id = engine
        .rebuild_range(dates.start, dates.end, Granularity::Yearly)
        .await
        .unwrap();
    engine.wait_for_run(run_id).await.unwrap();
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn test_filtered_rebuild_leaves_other_keys_alone() {
    let dates = range(d(2024, 6, 3), d(2024, 6, 9));
    let (engine, store) = rebuilt_engine(dates).await;
    let before = store.rows(DimensionShape::Store, Granularity::Weekly);

    let run_id = engine
        .rebuild_range_filtered(
            dates.start,
            dates.end,
            Granularity::Weekly,
            DimensionFilter::stores(["S2"]),
        )
        .await
        .unwrap();
    let status = engine.wait_for_run(run_id).await.unwrap();
    assert_eq!(status.state, RunState::Completed);
    assert_eq!(store.rows(DimensionShape::Store, Granularity::Weekly), before);
}
