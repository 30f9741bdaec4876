use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::StockRecord;

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::stock)]
pub struct Stock {
    pub product_id: String,
    pub quantity: i64,
    pub reserved: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Stock> for StockRecord {
    fn from(row: Stock) -> Self {
        StockRecord {
            product_id: row.product_id,
            quantity: row.quantity,
            reserved: row.reserved,
        }
    }
}
