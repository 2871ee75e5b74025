//! Folds of finer rollup rows into one coarser row

use crate::error::BuildError;
use crate::schema::MetricSchema;
use crate::types::{DimensionKey, PeriodKey, RollupRecord};

/// SUM every summable metric across `rows` and recompute the derived rates
///
/// Rates carried by the finer rows are ignored. A non-finite input value fails
/// the key rather than poisoning the coarser row.
pub fn fold_records(
    schema: &MetricSchema,
    key: &DimensionKey,
    period: PeriodKey,
    rows: &[&RollupRecord],
) -> Result<RollupRecord, BuildError> {
    let mut record = RollupRecord::new(key.clone(), period);

    for def in schema.summable() {
        let mut total = 0.0;
        let mut seen = false;
        for row in rows {
            if let Some(&value) = row.metrics.get(&def.name) {
                if !value.is_finite() {
                    return Err(BuildError::NonFiniteMetric {
                        metric: def.name.clone(),
                        period: row.period.to_string(),
                    });
                }
                total += value;
                seen = true;
            }
        }
        if seen {
            record.metrics.insert(def.name.clone(), total);
        }
    }

    record.covered_days = rows.iter().map(|r| r.covered_days).sum();
    schema.apply_rates(&mut record.metrics);
    Ok(record)
}

/// Fill the growth fields of `record` against the prior period's row
///
/// With no prior row the fields stay absent. The percentage is also absent
/// when the prior value is zero.
pub fn apply_growth(schema: &MetricSchema, record: &mut RollupRecord, prior: Option<&RollupRecord>) {
    record.growth.clear();
    let Some(prior) = prior else {
        return;
    };

    let noun = record.granularity().period_noun();
    for metric in schema.growth_metrics() {
        let current = record.metric(metric);
        let previous = prior.metric(metric);
        let (vs_field, pct_field) = MetricSchema::growth_field_names(metric, noun);
        record.growth.insert(vs_field, current - previous);
        if previous != 0.0 {
            record
                .growth
                .insert(pct_field, (current - previous) / previous * 100.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(n: u32, sales: f64, used: f64, on_time: f64) -> RollupRecord {
        let date = NaiveDate::from_ymd_opt(2025, 1, n).unwrap();
        let mut r = RollupRecord::new(DimensionKey::store("S1"), PeriodKey::day(date));
        r.metrics.insert("net_sales".to_string(), sales);
        r.metrics.insert("order_count".to_string(), 1.0);
        r.metrics.insert("portal_used_orders".to_string(), used);
        r.metrics.insert("portal_on_time_orders".to_string(), on_time);
        MetricSchema::retail().apply_rates(&mut r.metrics);
        r.covered_days = 1;
        r
    }

    #[test]
    fn test_rate_recomputed_not_averaged() {
        let schema = MetricSchema::retail();
        // 1/1 on day one and 1/9 on day two: the mean of rates would be 55.6%
        let rows = [day(1, 10.0, 1.0, 1.0), day(2, 20.0, 9.0, 1.0)];
        let refs: Vec<&RollupRecord> = rows.iter().collect();
        let month = PeriodKey::month(2025, 1).unwrap();

        let folded = fold_records(&schema, &DimensionKey::store("S1"), month, &refs).unwrap();
        assert_eq!(folded.metric("net_sales"), 30.0);
        assert_eq!(folded.metric("portal_on_time_rate"), 20.0);
        assert_eq!(folded.covered_days, 2);
    }

    #[test]
    fn test_non_finite_value_fails() {
        let schema = MetricSchema::retail();
        let mut bad = day(1, 10.0, 1.0, 1.0);
        bad.metrics.insert("net_sales".to_string(), f64::INFINITY);
        let result = fold_records(
            &schema,
            &DimensionKey::store("S1"),
            PeriodKey::month(2025, 1).unwrap(),
            &[&bad],
        );
        assert!(matches!(result, Err(BuildError::NonFiniteMetric { .. })));
    }

    #[test]
    fn test_growth_absent_without_prior() {
        let schema = MetricSchema::retail();
        let mut jan = RollupRecord::new(DimensionKey::store("S1"), PeriodKey::month(2025, 1).unwrap());
        jan.metrics.insert("net_sales".to_string(), 100.0);

        apply_growth(&schema, &mut jan, None);
        assert_eq!(jan.growth_field("net_sales_vs_prior_month"), None);
        assert_eq!(jan.growth_field("net_sales_growth_percent"), None);
    }

    #[test]
    fn test_growth_against_prior() {
        let schema = MetricSchema::retail();
        let mut dec = RollupRecord::new(DimensionKey::store("S1"), PeriodKey::month(2024, 12).unwrap());
        dec.metrics.insert("net_sales".to_string(), 80.0);
        let mut jan = RollupRecord::new(DimensionKey::store("S1"), PeriodKey::month(2025, 1).unwrap());
        jan.metrics.insert("net_sales".to_string(), 100.0);

        apply_growth(&schema, &mut jan, Some(&dec));
        assert_eq!(jan.growth_field("net_sales_vs_prior_month"), Some(20.0));
        assert_eq!(jan.growth_field("net_sales_growth_percent"), Some(25.0));
        // prior order_count was zero: delta only
        assert_eq!(jan.growth_field("order_count_vs_prior_month"), Some(0.0));
        assert_eq!(jan.growth_field("order_count_growth_percent"), None);
    }
}
