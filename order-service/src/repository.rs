use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::Order;
use std::fmt::Display;

use crate::domain::{OrderError, OrderRepository, UpdateFn};
use crate::models::{NewOrder, OrderRow};
use crate::schema::orders;

pub type DbPool = Pool<AsyncPgConnection>;

impl From<diesel::result::Error> for OrderError {
    fn from(err: diesel::result::Error) -> Self {
        OrderError::Storage(err.into())
    }
}

fn pool_error(err: impl Display) -> OrderError {
    OrderError::Storage(anyhow::anyhow!("get connection from pool: {err}"))
}

fn decode(row: OrderRow) -> Result<Order, OrderError> {
    Order::try_from(row).map_err(OrderError::Storage)
}

pub struct PgOrderRepository {
    pool: DbPool,
}

impl PgOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        let row = NewOrder::try_from(order).map_err(|e| OrderError::Storage(e.into()))?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        diesel::insert_into(orders::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, order_id: &str, customer_id: &str) -> Result<Order, OrderError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        let row = orders::table
            .filter(orders::id.eq(order_id))
            .filter(orders::customer_id.eq(customer_id))
            .first::<OrderRow>(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| OrderError::NotFound {
                order_id: order_id.to_string(),
                customer_id: customer_id.to_string(),
            })?;
        decode(row)
    }

    async fn update(&self, order_id: &str, customer_id: &str, update: UpdateFn) -> Result<Order, OrderError> {
        let order_id = order_id.to_string();
        let customer_id = customer_id.to_string();
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        conn.transaction::<_, OrderError, _>(|conn| {
            Box::pin(async move {
                let row = orders::table
                    .filter(orders::id.eq(&order_id))
                    .filter(orders::customer_id.eq(&customer_id))
                    .for_update()
                    .first::<OrderRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| OrderError::NotFound {
                        order_id: order_id.clone(),
                        customer_id: customer_id.clone(),
                    })?;

                let mut order = decode(row)?;
                update(&mut order)?;

                diesel::update(orders::table.filter(orders::id.eq(&order_id)))
                    .set((
                        orders::status.eq(order.status.as_str()),
                        orders::payment_link.eq(&order.payment_link),
                        orders::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;
                Ok(order)
            })
        })
        .await
    }
}
