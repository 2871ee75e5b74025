//! Metric catalog
//!
//! The engine is generic over "a dimension key and a set of metrics at a period
//! grain". A [`MetricSchema`] tells it which metrics exist and how each one
//! aggregates:
//!
//! - **Summable** metrics are folded with SUM across finer rows
//! - **Derived rates** are recomputed from their summed numerator and
//!   denominator at every level, never summed or averaged themselves
//!
//! The default [`MetricSchema::retail`] catalog covers store sales with channel,
//! payment, category and portal breakdowns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How a metric aggregates across finer rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    /// Aggregated with SUM
    Summable,
    /// `numerator / denominator * scale`, recomputed after every fold
    DerivedRate {
        /// Summable metric used as numerator
        numerator: String,
        /// Summable metric used as denominator
        denominator: String,
        /// Multiplier applied to the ratio (100 for percentages)
        scale: f64,
    },
}

/// One metric in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDef {
    /// Column name
    pub name: String,
    /// Aggregation behavior
    pub kind: MetricKind,
}

impl MetricDef {
    /// Summable metric
    pub fn summable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Summable,
        }
    }

    /// Derived-rate metric
    pub fn rate(
        name: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
        scale: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::DerivedRate {
                numerator: numerator.into(),
                denominator: denominator.into(),
                scale,
            },
        }
    }

    /// Whether the metric is folded with SUM
    pub fn is_summable(&self) -> bool {
        matches!(self.kind, MetricKind::Summable)
    }
}

/// SQL aggregate applied to a metric column when reading rollup tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateVerb {
    /// `SUM(column)`
    Sum,
    /// `AVG(column)`
    Avg,
}

impl AggregateVerb {
    /// Infer the verb from the column naming convention
    ///
    /// `avg_*`, `*_rate` and `*_penetration` columns average; everything else sums.
    pub fn infer(metric: &str) -> Self {
        if metric.starts_with("avg_") || metric.ends_with("_rate") || metric.ends_with("_penetration")
        {
            AggregateVerb::Avg
        } else {
            AggregateVerb::Sum
        }
    }

    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateVerb::Sum => "SUM",
            AggregateVerb::Avg => "AVG",
        }
    }
}

impl fmt::Display for AggregateVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Catalog of metrics tracked by a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSchema {
    metrics: Vec<MetricDef>,
    growth_metrics: Vec<String>,
}

impl MetricSchema {
    /// Build a schema, checking that every rate refers to summable metrics
    pub fn new(metrics: Vec<MetricDef>, growth_metrics: Vec<String>) -> Result<Self, ValidationError> {
        let schema = Self {
            metrics,
            growth_metrics,
        };

        for def in &schema.metrics {
            if let MetricKind::DerivedRate {
                numerator,
                denominator,
                ..
            } = &def.kind
            {
                for component in [numerator, denominator] {
                    match schema.get(component) {
                        Some(c) if c.is_summable() => {},
                        _ => return Err(ValidationError::UnknownMetric(component.clone())),
                    }
                }
            }
        }
        for name in &schema.growth_metrics {
            match schema.get(name) {
                Some(def) if def.is_summable() => {},
                _ => return Err(ValidationError::UnknownMetric(name.clone())),
            }
        }

        Ok(schema)
    }

    /// Default retail sales catalog
    pub fn retail() -> Self {
        let summable = [
            "net_sales",
            "gross_sales",
            "discount_amount",
            "order_count",
            "item_quantity",
            "dine_in_sales",
            "pickup_sales",
            "delivery_sales",
            "portal_sales",
            "cash_sales",
            "card_sales",
            "gift_card_sales",
            "food_sales",
            "beverage_sales",
            "merchandise_sales",
            "digital_orders",
            "portal_used_orders",
            "portal_on_time_orders",
        ];

        let mut metrics: Vec<MetricDef> = summable.iter().map(|m| MetricDef::summable(*m)).collect();
        metrics.push(MetricDef::rate(
            "portal_on_time_rate",
            "portal_on_time_orders",
            "portal_used_orders",
            100.0,
        ));
        metrics.push(MetricDef::rate(
            "digital_penetration",
            "digital_orders",
            "order_count",
            100.0,
        ));
        metrics.push(MetricDef::rate("avg_ticket", "net_sales", "order_count", 1.0));

        Self {
            metrics,
            growth_metrics: vec!["net_sales".to_string(), "order_count".to_string()],
        }
    }

    /// Look up a metric by name
    pub fn get(&self, name: &str) -> Option<&MetricDef> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// All metrics in catalog order
    pub fn metrics(&self) -> &[MetricDef] {
        &self.metrics
    }

    /// Summable metrics in catalog order
    pub fn summable(&self) -> impl Iterator<Item = &MetricDef> {
        self.metrics.iter().filter(|m| m.is_summable())
    }

    /// Derived-rate metrics in catalog order
    pub fn rates(&self) -> impl Iterator<Item = &MetricDef> {
        self.metrics.iter().filter(|m| !m.is_summable())
    }

    /// Metrics that get period-over-period growth fields
    pub fn growth_metrics(&self) -> &[String] {
        &self.growth_metrics
    }

    /// Recompute every derived rate from its (already summed) components
    ///
    /// A zero denominator leaves the rate out rather than writing 0 or NaN.
    pub fn apply_rates(&self, metrics: &mut BTreeMap<String, f64>) {
        for def in self.rates() {
            if let MetricKind::DerivedRate {
                numerator,
                denominator,
                scale,
            } = &def.kind
            {
                let num = metrics.get(numerator).copied().unwrap_or(0.0);
                let den = metrics.get(denominator).copied().unwrap_or(0.0);
                if den != 0.0 {
                    metrics.insert(def.name.clone(), num / den * scale);
                } else {
                    metrics.remove(&def.name);
                }
            }
        }
    }

    /// Growth field names for a metric at a granularity
    pub fn growth_field_names(metric: &str, period_noun: &str) -> (String, String) {
        (
            format!("{}_vs_prior_{}", metric, period_noun),
            format!("{}_growth_percent", metric),
        )
    }
}

impl Default for MetricSchema {
    fn default() -> Self {
        Self::retail()
    }
}
