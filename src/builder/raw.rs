//! Folds of raw transactions into hourly / daily rollup metrics
//!
//! Store rows fold whole transactions; store+item rows fold line items, with
//! the order-level discount spread over lines by amount.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::BuildError;
use crate::source::{Channel, PaymentMethod, ProductCategory, SourceTransaction};
use crate::types::{DimensionKey, DimensionShape};

/// Metric values for one dimension key
pub type MetricMap = BTreeMap<String, f64>;

/// Transactions grouped under one dimension key
pub type KeyedTransactions<'a> = BTreeMap<DimensionKey, Vec<&'a SourceTransaction>>;

fn add(metrics: &mut MetricMap, name: &str, value: f64) {
    *metrics.entry(name.to_string()).or_insert(0.0) += value;
}

fn channel_column(channel: Channel) -> &'static str {
    match channel {
        Channel::DineIn => "dine_in_sales",
        Channel::Pickup => "pickup_sales",
        Channel::Delivery => "delivery_sales",
        Channel::Portal => "portal_sales",
    }
}

fn payment_column(payment: PaymentMethod) -> &'static str {
    match payment {
        PaymentMethod::Cash => "cash_sales",
        PaymentMethod::Card => "card_sales",
        PaymentMethod::GiftCard => "gift_card_sales",
    }
}

fn category_column(category: ProductCategory) -> &'static str {
    match category {
        ProductCategory::Food => "food_sales",
        ProductCategory::Beverage => "beverage_sales",
        ProductCategory::Merchandise => "merchandise_sales",
    }
}

/// Group transactions by the dimension keys they contribute to
///
/// A store+item transaction lands under every item it contains.
pub fn group_by_key(shape: DimensionShape, txns: &[SourceTransaction]) -> KeyedTransactions<'_> {
    let mut groups: KeyedTransactions<'_> = BTreeMap::new();
    for txn in txns {
        match shape {
            DimensionShape::Store => {
                groups
                    .entry(DimensionKey::store(&txn.store_id))
                    .or_default()
                    .push(txn);
            },
            DimensionShape::StoreItem => {
                let items: BTreeSet<&str> = txn.lines.iter().map(|l| l.item_id.as_str()).collect();
                for item in items {
                    groups
                        .entry(DimensionKey::store_item(&txn.store_id, item))
                        .or_default()
                        .push(txn);
                }
            },
        }
    }
    groups
}

/// Fold the transactions of one dimension key
///
/// Any malformed transaction fails the whole key.
pub fn fold_key(key: &DimensionKey, txns: &[&SourceTransaction]) -> Result<MetricMap, BuildError> {
    for txn in txns {
        txn.validate()?;
    }
    Ok(match &key.item_id {
        None => fold_store(txns),
        Some(item) => fold_item(item, txns),
    })
}

fn fold_store(txns: &[&SourceTransaction]) -> MetricMap {
    let mut m = MetricMap::new();
    for txn in txns {
        let net = txn.net();
        add(&mut m, "net_sales", net);
        add(&mut m, "gross_sales", txn.gross());
        add(&mut m, "discount_amount", txn.discount);
        add(&mut m, "order_count", 1.0);
        add(
            &mut m,
            "item_quantity",
            txn.lines.iter().map(|l| l.quantity).sum(),
        );
        add(&mut m, channel_column(txn.channel), net);
        add(&mut m, payment_column(txn.payment), net);
        for line in &txn.lines {
            add(&mut m, category_column(line.category), line.amount);
        }
        add(&mut m, "digital_orders", if txn.digital { 1.0 } else { 0.0 });

        let (used, on_time) = match txn.portal {
            Some(p) => (p.used, p.used && p.on_time),
            None => (false, false),
        };
        add(&mut m, "portal_used_orders", if used { 1.0 } else { 0.0 });
        add(&mut m, "portal_on_time_orders", if on_time { 1.0 } else { 0.0 });
    }
    m
}

fn fold_item(item_id: &str, txns: &[&SourceTransaction]) -> MetricMap {
    let mut m = MetricMap::new();
    let mut orders = BTreeSet::new();
    for txn in txns {
        let gross = txn.gross();
        for line in txn.lines.iter().filter(|l| l.item_id == item_id) {
            let discount = if gross > 0.0 {
                txn.discount * line.amount / gross
            } else {
                0.0
            };
            let net = line.amount - discount;
            add(&mut m, "net_sales", net);
            add(&mut m, "gross_sales", line.amount);
            add(&mut m, "discount_amount", discount);
            add(&mut m, "item_quantity", line.quantity);
            add(&mut m, channel_column(txn.channel), net);
            add(&mut m, category_column(line.category), line.amount);
            orders.insert(txn.order_id.as_str());
        }
    }
    m.insert("order_count".to_string(), orders.len() as f64);
    m
}
