//! The stock ledger: per-product on-hand and reserved counters, and the
//! repository contract every storage backend honours.
//!
//! Invariant for every record: `0 <= reserved <= quantity`. Multi-item
//! operations are all-or-nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{Classify, ErrorKind, ItemWithQuantity};
use std::collections::HashSet;
use thiserror::Error;

use crate::lock::LockError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: String,
    pub quantity: i64,
    pub reserved: i64,
}

impl StockRecord {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            reserved: 0,
        }
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }
}

/// One product that could not satisfy a request. `have` is what was
/// available for the operation when it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub product_id: String,
    pub want: i64,
    pub have: i64,
}

fn describe(failed: &[FailedItem]) -> String {
    failed
        .iter()
        .map(|f| format!("product {} want {} have {}", f.product_id, f.want, f.have))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("products not found: [{}]", .missing.join(", "))]
pub struct NotFoundError {
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not enough stock: {}", describe(.failed_on))]
pub struct ExceedStockError {
    pub failed_on: Vec<FailedItem>,
}

/// A confirmation asked for more units than are currently reserved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("confirm exceeds reservation: {}", describe(.failed_on))]
pub struct ShortfallError {
    pub failed_on: Vec<FailedItem>,
}

#[derive(Debug, Error)]
pub enum StockError {
    #[error("invalid items: {0}")]
    Validation(String),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    ExceedStock(#[from] ExceedStockError),
    #[error(transparent)]
    ReservationShortfall(#[from] ShortfallError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("get price for product {product_id}: {reason}")]
    PriceLookup { product_id: String, reason: String },
    #[error("stock storage: {0:#}")]
    Storage(anyhow::Error),
}

impl Classify for StockError {
    fn kind(&self) -> ErrorKind {
        match self {
            StockError::Validation(_) => ErrorKind::Validation,
            StockError::NotFound(_) => ErrorKind::NotFound,
            StockError::ExceedStock(_) | StockError::ReservationShortfall(_) => ErrorKind::Conflict,
            StockError::Lock(_) | StockError::PriceLookup { .. } | StockError::Storage(_) => ErrorKind::Unavailable,
        }
    }
}

/// Ids requested but absent from `found`, in request order.
pub fn find_missing<'a>(items: &[ItemWithQuantity], found: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let found: HashSet<&str> = found.into_iter().collect();
    items
        .iter()
        .filter(|item| !found.contains(item.product_id.as_str()))
        .map(|item| item.product_id.clone())
        .collect()
}

#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Records for the ids that exist; unknown ids are omitted.
    async fn get_stock(&self, product_ids: &[String]) -> Result<Vec<StockRecord>, StockError>;

    /// Raises `reserved` by each item's quantity, or changes nothing.
    /// Items must already be merged by product id.
    async fn reserve_stock(&self, items: &[ItemWithQuantity]) -> Result<(), StockError>;

    /// Consumes reserved units: both `quantity` and `reserved` drop by each
    /// item's quantity, or nothing changes.
    async fn confirm_stock_reservation(&self, items: &[ItemWithQuantity]) -> Result<(), StockError>;
}
