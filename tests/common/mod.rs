//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};
use kuba_rollup::source::{
    Channel, InMemorySourceReader, LineItem, PaymentMethod, PortalInfo, ProductCategory,
    SourceTransaction,
};
use kuba_rollup::types::{DateRange, DimensionKey, RollupRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

/// Simple one-line card order
pub fn order(order_id: &str, store: &str, date: NaiveDate, hour: u32, amount: f64) -> SourceTransaction {
    SourceTransaction {
        order_id: order_id.to_string(),
        store_id: store.to_string(),
        business_date: date,
        hour,
        channel: Channel::DineIn,
        payment: PaymentMethod::Card,
        digital: false,
        portal: None,
        discount: 0.0,
        lines: vec![LineItem {
            item_id: "burger".to_string(),
            category: ProductCategory::Food,
            quantity: 1.0,
            amount,
        }],
    }
}

/// Populate a reader with reproducible random orders
///
/// `S1` and `S2` trade every day; `S3` only from 2024-06-01 and never on
/// Sundays, so ranges see keys with partial coverage.
pub fn seed_orders(reader: &InMemorySourceReader, dates: DateRange, seed: u64) -> usize {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut count = 0;
    let items = [
        ("burger", ProductCategory::Food),
        ("fries", ProductCategory::Food),
        ("cola", ProductCategory::Beverage),
        ("mug", ProductCategory::Merchandise),
    ];

    for date in dates.iter_days() {
        for store in ["S1", "S2", "S3"] {
            if store == "S3" && (date < d(2024, 6, 1) || date.weekday() == Weekday::Sun) {
                continue;
            }
            let orders = rng.gen_range(1..4);
            for n in 0..orders {
                let line_count = rng.gen_range(1..3);
                let lines = (0..line_count)
                    .map(|_| {
                        let (item, category) = items[rng.gen_range(0..items.len())];
                        LineItem {
                            item_id: item.to_string(),
                            category,
                            quantity: f64::from(rng.gen_range(1..4)),
                            amount: f64::from(rng.gen_range(100..2500)) / 100.0,
                        }
                    })
                    .collect::<Vec<_>>();
                let gross: f64 = lines.iter().map(|l| l.amount).sum();
                let channel = match rng.gen_range(0..4) {
                    0 => Channel::DineIn,
                    1 => Channel::Pickup,
                    2 => Channel::Delivery,
                    _ => Channel::Portal,
                };
                let portal = (channel == Channel::Portal).then(|| PortalInfo {
                    used: true,
                    on_time: rng.gen_bool(0.8),
                });
                reader.insert(SourceTransaction {
                    order_id: format!("{}-{}-{}", store, date, n),
                    store_id: store.to_string(),
                    business_date: date,
                    hour: rng.gen_range(7..22),
                    channel,
                    payment: if rng.gen_bool(0.6) {
                        PaymentMethod::Card
                    } else {
                        PaymentMethod::Cash
                    },
                    digital: channel == Channel::Portal || rng.gen_bool(0.2),
                    portal,
                    discount: if rng.gen_bool(0.1) {
                        (gross * 10.0).round() / 100.0
                    } else {
                        0.0
                    },
                    lines,
                });
                count += 1;
            }
        }
    }
    count
}

/// Sum of summable metrics over daily rows inside a range, per key
pub fn brute_force(
    daily: &[RollupRecord],
    dates: &DateRange,
    metrics: &[&str],
) -> BTreeMap<DimensionKey, BTreeMap<String, f64>> {
    let mut totals: BTreeMap<DimensionKey, BTreeMap<String, f64>> = BTreeMap::new();
    for row in daily.iter().filter(|r| dates.covers(&r.period.date_range())) {
        let entry = totals.entry(row.key.clone()).or_default();
        for metric in metrics {
            *entry.entry(metric.to_string()).or_insert(0.0) += row.metric(metric);
        }
    }
    totals
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}
