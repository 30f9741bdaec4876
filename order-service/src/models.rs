use anyhow::Context;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::Order;

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderRow {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub payment_link: String,
    pub items: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = anyhow::Error;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            status: row.status.parse()?,
            items: serde_json::from_value(row.items)
                .with_context(|| format!("decode items of order {}", row.id))?,
            id: row.id,
            customer_id: row.customer_id,
            payment_link: row.payment_link,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub payment_link: String,
    pub items: serde_json::Value,
}

impl TryFrom<&Order> for NewOrder {
    type Error = serde_json::Error;

    fn try_from(order: &Order) -> Result<Self, Self::Error> {
        Ok(NewOrder {
            id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            status: order.status.to_string(),
            payment_link: order.payment_link.clone(),
            items: serde_json::to_value(&order.items)?,
        })
    }
}
