use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{pack_items, ItemWithQuantity};
use std::fmt::Display;

use crate::domain::{
    find_missing, ExceedStockError, FailedItem, NotFoundError, ShortfallError, StockError, StockRecord,
    StockRepository,
};
use crate::models::Stock;
use crate::schema::stock;

pub type DbPool = Pool<AsyncPgConnection>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies pending migrations over a short-lived blocking connection.
pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let mut conn = diesel::PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    Ok(())
}

pub async fn connect_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder().build(config).await?)
}

impl From<diesel::result::Error> for StockError {
    fn from(err: diesel::result::Error) -> Self {
        StockError::Storage(err.into())
    }
}

fn pool_error(err: impl Display) -> StockError {
    StockError::Storage(anyhow::anyhow!("get connection from pool: {err}"))
}

/// Postgres ledger. Every multi-item operation runs in one transaction that
/// first takes `FOR UPDATE` locks on the touched rows, then applies guarded
/// updates whose WHERE clause re-checks the invariant.
pub struct PgStockRepository {
    pool: DbPool,
}

impl PgStockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn ids_of(items: &[ItemWithQuantity]) -> Vec<String> {
    items.iter().map(|i| i.product_id.clone()).collect()
}

/// Rows are locked in product id order so that overlapping item sets
/// cannot deadlock each other.
async fn lock_rows(conn: &mut AsyncPgConnection, items: &[ItemWithQuantity]) -> Result<(), StockError> {
    let ids = ids_of(items);
    let rows: Vec<Stock> = stock::table
        .filter(stock::product_id.eq_any(&ids))
        .order(stock::product_id.asc())
        .for_update()
        .load(conn)
        .await?;

    let missing = find_missing(items, rows.iter().map(|r| r.product_id.as_str()));
    if !missing.is_empty() {
        return Err(NotFoundError { missing }.into());
    }
    Ok(())
}

/// Re-reads the failed rows so the error can say what was there.
async fn describe_failures<F>(
    conn: &mut AsyncPgConnection,
    failed: Vec<&ItemWithQuantity>,
    have: F,
) -> Result<Vec<FailedItem>, StockError>
where
    F: Fn(&Stock) -> i64,
{
    let ids: Vec<String> = failed.iter().map(|i| i.product_id.clone()).collect();
    let rows: Vec<Stock> = stock::table.filter(stock::product_id.eq_any(&ids)).load(conn).await?;

    Ok(failed
        .into_iter()
        .map(|item| FailedItem {
            product_id: item.product_id.clone(),
            want: item.quantity,
            have: rows
                .iter()
                .find(|r| r.product_id == item.product_id)
                .map(&have)
                .unwrap_or(0),
        })
        .collect())
}

#[async_trait]
impl StockRepository for PgStockRepository {
    async fn get_stock(&self, product_ids: &[String]) -> Result<Vec<StockRecord>, StockError> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let rows: Vec<Stock> = stock::table
            .filter(stock::product_id.eq_any(product_ids))
            .order(stock::product_id.asc())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(StockRecord::from).collect())
    }

    async fn reserve_stock(&self, items: &[ItemWithQuantity]) -> Result<(), StockError> {
        let items = pack_items(items).map_err(StockError::Validation)?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        conn.transaction::<_, StockError, _>(|conn| {
            Box::pin(async move {
                lock_rows(conn, &items).await?;

                let mut failed = Vec::new();
                for item in &items {
                    let affected = diesel::update(
                        stock::table
                            .filter(stock::product_id.eq(&item.product_id))
                            .filter((stock::quantity - stock::reserved).ge(item.quantity)),
                    )
                    .set((
                        stock::reserved.eq(stock::reserved + item.quantity),
                        stock::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                    if affected == 0 {
                        failed.push(item);
                    }
                }

                if !failed.is_empty() {
                    let failed_on = describe_failures(conn, failed, |row| row.quantity - row.reserved).await?;
                    return Err(ExceedStockError { failed_on }.into());
                }
                Ok(())
            })
        })
        .await
    }

    async fn confirm_stock_reservation(&self, items: &[ItemWithQuantity]) -> Result<(), StockError> {
        let items = pack_items(items).map_err(StockError::Validation)?;
        let mut conn = self.pool.get().await.map_err(pool_error)?;

        conn.transaction::<_, StockError, _>(|conn| {
            Box::pin(async move {
                lock_rows(conn, &items).await?;

                let mut failed = Vec::new();
                for item in &items {
                    let affected = diesel::update(
                        stock::table
                            .filter(stock::product_id.eq(&item.product_id))
                            .filter(stock::quantity.ge(stock::reserved))
                            .filter(stock::reserved.ge(item.quantity)),
                    )
                    .set((
                        stock::quantity.eq(stock::quantity - item.quantity),
                        stock::reserved.eq(stock::reserved - item.quantity),
                        stock::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await?;

                    if affected == 0 {
                        failed.push(item);
                    }
                }

                if !failed.is_empty() {
                    let failed_on = describe_failures(conn, failed, |row| row.reserved).await?;
                    return Err(ShortfallError { failed_on }.into());
                }
                Ok(())
            })
        })
        .await
    }
}
