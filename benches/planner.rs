//! Query Planner Benchmarks
//!
//! Plan generation across range lengths, and plan execution against an
//! in-memory store compared with a direct daily scan of the same range.

use std::sync::Arc;

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kuba_rollup::config::{Config, PlannerConfig};
use kuba_rollup::planner::{Optimizer, QueryPlanner, QueryRequest};
use kuba_rollup::source::{
    Channel, InMemorySourceReader, LineItem, PaymentMethod, ProductCategory, SourceTransaction,
};
use kuba_rollup::store::InMemoryRollupStore;
use kuba_rollup::types::{DateRange, DimensionShape, Granularity};
use kuba_rollup::RollupEngine;

// =============================================================================
// Test Data Generators
// =============================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// One order per store per day with a slowly drifting amount
fn create_source(stores: usize, range: DateRange) -> InMemorySourceReader {
    let reader = InMemorySourceReader::new();
    for (i, day) in range.iter_days().enumerate() {
        for s in 0..stores {
            reader.insert(SourceTransaction {
                order_id: format!("{}-{}", s, day),
                store_id: format!("S{:03}", s),
                business_date: day,
                hour: 12,
                channel: Channel::DineIn,
                payment: PaymentMethod::Card,
                digital: false,
                portal: None,
                discount: 0.0,
                lines: vec![LineItem {
                    item_id: "burger".to_string(),
                    category: ProductCategory::Food,
                    quantity: 1.0,
                    amount: 10.0 + (i % 17) as f64 + s as f64 * 0.25,
                }],
            });
        }
    }
    reader
}

fn create_engine(rt: &tokio::runtime::Runtime, stores: usize) -> RollupEngine {
    let range = DateRange::new(date(2023, 1, 1), date(2025, 2, 28)).unwrap();
    let mut config = Config::default();
    config.builder.shapes = vec![DimensionShape::Store];

    let engine = RollupEngine::builder()
        .with_store(InMemoryRollupStore::new())
        .with_source(create_source(stores, range))
        .with_config(config)
        .with_today(date(2025, 3, 1))
        .build()
        .unwrap();

    rt.block_on(async {
        let run_id = engine
            .rebuild_range(range.start, range.end, Granularity::Yearly)
            .await
            .unwrap();
        engine.wait_for_run(run_id).await.unwrap();
    });
    engine
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_plan_generation(c: &mut Criterion) {
    let config = PlannerConfig::default();
    let optimizer = Optimizer::new(&config);
    let mut group = c.benchmark_group("plan_generation");

    for days in [30u64, 120, 400, 1500, 3650] {
        let start = date(2015, 3, 17);
        let end = start + chrono::Days::new(days - 1);
        let range = DateRange::new(start, end).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(days), &range, |b, range| {
            b.iter(|| black_box(optimizer.optimize(black_box(range))));
        });
    }

    group.finish();
}

fn bench_query_execution(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = create_engine(&rt, 50);
    let request = QueryRequest::new(date(2023, 1, 22), date(2025, 1, 2), ["net_sales", "avg_ticket"]);

    let mut group = c.benchmark_group("query_execution");
    group.sample_size(20);

    group.bench_function("optimized", |b| {
        b.iter(|| rt.block_on(async { black_box(engine.query(&request).await.unwrap()) }));
    });

    // Same store, every range answered from the daily table
    let planner = QueryPlanner::new(
        Arc::clone(engine.store()),
        Arc::new(engine.schema().clone()),
        PlannerConfig {
            daily_fast_path_days: 10_000,
            ..PlannerConfig::default()
        },
    )
    .with_today(date(2025, 3, 1));
    group.bench_function("direct_daily", |b| {
        b.iter(|| rt.block_on(async { black_box(planner.query(&request).await.unwrap()) }));
    });

    group.finish();
}

criterion_group!(benches, bench_plan_generation, bench_query_execution);
criterion_main!(benches);
