//! Raw transaction source
//!
//! The hourly and daily rollup levels are the only ones that read raw sales
//! data. The ingestion pipeline that populates it lives elsewhere; this module
//! defines the row model the builder folds and the [`SourceReader`] seam it
//! reads through.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, SourceError};
use crate::types::DimensionFilter;

/// Order channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Eaten in store
    DineIn,
    /// Picked up at the counter
    Pickup,
    /// Delivered
    Delivery,
    /// Ordered through the online portal
    Portal,
}

/// Tender type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash
    Cash,
    /// Credit or debit card
    Card,
    /// Gift card
    GiftCard,
}

/// Product category of a line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    /// Food items
    Food,
    /// Drinks
    Beverage,
    /// Merchandise
    Merchandise,
}

/// One line of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item identifier
    pub item_id: String,
    /// Product category
    pub category: ProductCategory,
    /// Units sold
    pub quantity: f64,
    /// Extended price before order-level discount
    pub amount: f64,
}

/// Portal fulfilment data (portal orders only)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortalInfo {
    /// Whether the portal was used to place the order
    pub used: bool,
    /// Whether the order was ready by the promised time
    pub on_time: bool,
}

/// One raw sales transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTransaction {
    /// Order identifier
    pub order_id: String,
    /// Store identifier
    pub store_id: String,
    /// Business date
    pub business_date: NaiveDate,
    /// Hour of day, 0..=23
    pub hour: u32,
    /// Order channel
    pub channel: Channel,
    /// Tender type
    pub payment: PaymentMethod,
    /// Placed through a digital surface (app, web, kiosk)
    pub digital: bool,
    /// Portal fulfilment data
    pub portal: Option<PortalInfo>,
    /// Order-level discount
    pub discount: f64,
    /// Line items
    pub lines: Vec<LineItem>,
}

impl SourceTransaction {
    /// Sum of line amounts
    pub fn gross(&self) -> f64 {
        self.lines.iter().map(|l| l.amount).sum()
    }

    /// Gross minus discount
    pub fn net(&self) -> f64 {
        self.gross() - self.discount
    }

    /// Reject rows that cannot be folded
    pub fn validate(&self) -> Result<(), BuildError> {
        let malformed = |reason: String| BuildError::MalformedRow {
            row: self.order_id.clone(),
            reason,
        };

        if self.store_id.trim().is_empty() {
            return Err(malformed("empty store id".to_string()));
        }
        if self.hour > 23 {
            return Err(malformed(format!("hour {} out of range", self.hour)));
        }
        if !self.discount.is_finite() || self.discount < 0.0 {
            return Err(malformed(format!("invalid discount {}", self.discount)));
        }
        for line in &self.lines {
            if line.item_id.trim().is_empty() {
                return Err(malformed("line with empty item id".to_string()));
            }
            if !line.amount.is_finite() || line.amount < 0.0 {
                return Err(malformed(format!(
                    "invalid amount {} for item {}",
                    line.amount, line.item_id
                )));
            }
            if !line.quantity.is_finite() || line.quantity <= 0.0 {
                return Err(malformed(format!(
                    "invalid quantity {} for item {}",
                    line.quantity, line.item_id
                )));
            }
        }
        Ok(())
    }
}

/// Read interface over raw sales data
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Fetch transactions for a business date, optionally one hour only
    async fn fetch_transactions(
        &self,
        date: NaiveDate,
        hour: Option<u32>,
        filter: &DimensionFilter,
    ) -> Result<Vec<SourceTransaction>, SourceError>;
}

/// In-memory source keyed by business date
///
/// Rows are returned as stored, malformed ones included, so the builder's
/// per-key validation sees exactly what ingestion wrote.
pub struct InMemorySourceReader {
    data: RwLock<BTreeMap<NaiveDate, Vec<SourceTransaction>>>,
}

impl InMemorySourceReader {
    /// Create an empty source
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
        }
    }

    /// Append a transaction
    pub fn insert(&self, txn: SourceTransaction) {
        self.data
            .write()
            .entry(txn.business_date)
            .or_default()
            .push(txn);
    }

    /// Append many transactions
    pub fn extend(&self, txns: impl IntoIterator<Item = SourceTransaction>) {
        let mut data = self.data.write();
        for txn in txns {
            data.entry(txn.business_date).or_default().push(txn);
        }
    }

    /// Total number of stored transactions
    pub fn len(&self) -> usize {
        self.data.read().values().map(Vec::len).sum()
    }

    /// Whether the source holds no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySourceReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceReader for InMemorySourceReader {
    async fn fetch_transactions(
        &self,
        date: NaiveDate,
        hour: Option<u32>,
        filter: &DimensionFilter,
    ) -> Result<Vec<SourceTransaction>, SourceError> {
        let data = self.data.read();
        let rows = data
            .get(&date)
            .map(|txns| {
                txns.iter()
                    .filter(|t| hour.map_or(true, |h| t.hour == h))
                    .filter(|t| filter.matches_store(&t.store_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}
