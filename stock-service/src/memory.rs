use async_trait::async_trait;
use shared::{pack_items, ItemWithQuantity};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{
    find_missing, ExceedStockError, FailedItem, NotFoundError, ShortfallError, StockError, StockRecord,
    StockRepository,
};

/// Ledger kept in process memory. Each operation holds the mutex for its
/// whole duration and writes back only when every item succeeded.
#[derive(Default)]
pub struct InMemoryStockRepository {
    records: Mutex<HashMap<String, StockRecord>>,
}

impl InMemoryStockRepository {
    pub fn new(records: impl IntoIterator<Item = StockRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.product_id.clone(), r)).collect()),
        }
    }

    pub fn record(&self, product_id: &str) -> Option<StockRecord> {
        self.lock().get(product_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StockRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Applies `step` to a copy of every touched record. `step` returns the
    /// amount it had to work with when the item cannot be applied.
    fn apply<F>(&self, items: &[ItemWithQuantity], step: F) -> Result<(), Rejection>
    where
        F: Fn(&mut StockRecord, i64) -> Result<(), i64>,
    {
        let items = pack_items(items).map_err(Rejection::Invalid)?;
        let mut records = self.lock();

        let missing = find_missing(&items, records.keys().map(String::as_str));
        if !missing.is_empty() {
            return Err(Rejection::Missing(missing));
        }

        let mut staged = Vec::with_capacity(items.len());
        let mut failed = Vec::new();
        for item in &items {
            let mut record = records[&item.product_id].clone();
            match step(&mut record, item.quantity) {
                Ok(()) => staged.push(record),
                Err(have) => failed.push(FailedItem {
                    product_id: item.product_id.clone(),
                    want: item.quantity,
                    have,
                }),
            }
        }
        if !failed.is_empty() {
            return Err(Rejection::Insufficient(failed));
        }

        for record in staged {
            records.insert(record.product_id.clone(), record);
        }
        Ok(())
    }
}

enum Rejection {
    Invalid(String),
    Missing(Vec<String>),
    Insufficient(Vec<FailedItem>),
}

#[async_trait]
impl StockRepository for InMemoryStockRepository {
    async fn get_stock(&self, product_ids: &[String]) -> Result<Vec<StockRecord>, StockError> {
        let records = self.lock();
        Ok(product_ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn reserve_stock(&self, items: &[ItemWithQuantity]) -> Result<(), StockError> {
        let result = self.apply(items, |record, want| {
            if record.available() < want {
                return Err(record.available());
            }
            record.reserved += want;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(Rejection::Invalid(reason)) => Err(StockError::Validation(reason)),
            Err(Rejection::Missing(missing)) => Err(NotFoundError { missing }.into()),
            Err(Rejection::Insufficient(failed_on)) => Err(ExceedStockError { failed_on }.into()),
        }
    }

    async fn confirm_stock_reservation(&self, items: &[ItemWithQuantity]) -> Result<(), StockError> {
        let result = self.apply(items, |record, want| {
            if record.reserved < want || record.quantity < record.reserved {
                return Err(record.reserved);
            }
            record.quantity -= want;
            record.reserved -= want;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(Rejection::Invalid(reason)) => Err(StockError::Validation(reason)),
            Err(Rejection::Missing(missing)) => Err(NotFoundError { missing }.into()),
            Err(Rejection::Insufficient(failed_on)) => Err(ShortfallError { failed_on }.into()),
        }
    }
}
