//! Reservation engine: validates and merges requested items, serializes
//! work on the same product set through the distributed lock, and prices
//! reserved lines.

use async_trait::async_trait;
use shared::handler::{apply_middleware, standard_layers, BoxedHandler, CommandHandler};
use shared::{pack_items, validate_items, Item, ItemWithQuantity};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::domain::{StockError, StockRecord, StockRepository};
use crate::lock::{lock_key, DistributedLock};

#[derive(Debug, Clone)]
pub struct ReserveStock {
    pub items: Vec<ItemWithQuantity>,
}

#[derive(Debug, Clone)]
pub struct ConfirmStockReservation {
    pub items: Vec<ItemWithQuantity>,
}

#[derive(Debug, Clone)]
pub struct GetStock {
    pub product_ids: Vec<String>,
}

/// Maps a product to the payment provider's price identifier.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn get_price_by_product_id(&self, product_id: &str) -> anyhow::Result<String>;
}

/// Derives price ids by prefixing the product id.
pub struct StaticPriceProvider {
    prefix: String,
}

impl StaticPriceProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

#[async_trait]
impl PriceProvider for StaticPriceProvider {
    async fn get_price_by_product_id(&self, product_id: &str) -> anyhow::Result<String> {
        Ok(format!("{}{}", self.prefix, product_id))
    }
}

fn prepare(items: &[ItemWithQuantity]) -> Result<Vec<ItemWithQuantity>, StockError> {
    validate_items(items).map_err(StockError::Validation)?;
    pack_items(items).map_err(StockError::Validation)
}

/// Runs `op` while holding the lock for `items`. The lock is released on
/// every path; a failed release is logged and left to expire.
async fn with_lock<T, F>(
    lock: &dyn DistributedLock,
    ttl: Duration,
    items: &[ItemWithQuantity],
    op: F,
) -> Result<T, StockError>
where
    F: Future<Output = Result<T, StockError>>,
{
    let guard = lock.acquire(&lock_key(items), ttl).await?;
    let result = op.await;
    let key = guard.key().to_string();
    if let Err(e) = lock.release(guard).await {
        warn!(key = %key, error = %e, "Failed to release stock lock");
    }
    result
}

pub struct ReserveStockHandler {
    repo: Arc<dyn StockRepository>,
    prices: Arc<dyn PriceProvider>,
    lock: Arc<dyn DistributedLock>,
    lock_ttl: Duration,
}

impl ReserveStockHandler {
    pub fn new(
        repo: Arc<dyn StockRepository>,
        prices: Arc<dyn PriceProvider>,
        lock: Arc<dyn DistributedLock>,
        lock_ttl: Duration,
    ) -> BoxedHandler<ReserveStock, Vec<Item>, StockError> {
        apply_middleware(
            Self {
                repo,
                prices,
                lock,
                lock_ttl,
            },
            standard_layers("ReserveStock"),
        )
    }

    async fn reserve(&self, items: &[ItemWithQuantity]) -> Result<Vec<Item>, StockError> {
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            let price_id = self
                .prices
                .get_price_by_product_id(&item.product_id)
                .await
                .map_err(|e| StockError::PriceLookup {
                    product_id: item.product_id.clone(),
                    reason: format!("{e:#}"),
                })?;
            priced.push(Item {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                price_id,
            });
        }

        self.repo.reserve_stock(items).await?;
        Ok(priced)
    }
}

#[async_trait]
impl CommandHandler<ReserveStock> for ReserveStockHandler {
    type Output = Vec<Item>;
    type Error = StockError;

    async fn handle(&self, cmd: ReserveStock) -> Result<Vec<Item>, StockError> {
        let items = prepare(&cmd.items)?;
        with_lock(self.lock.as_ref(), self.lock_ttl, &items, self.reserve(&items)).await
    }
}

pub struct ConfirmStockReservationHandler {
    repo: Arc<dyn StockRepository>,
    lock: Arc<dyn DistributedLock>,
    lock_ttl: Duration,
}

impl ConfirmStockReservationHandler {
    pub fn new(
        repo: Arc<dyn StockRepository>,
        lock: Arc<dyn DistributedLock>,
        lock_ttl: Duration,
    ) -> BoxedHandler<ConfirmStockReservation, (), StockError> {
        apply_middleware(Self { repo, lock, lock_ttl }, standard_layers("ConfirmStockReservation"))
    }
}

#[async_trait]
impl CommandHandler<ConfirmStockReservation> for ConfirmStockReservationHandler {
    type Output = ();
    type Error = StockError;

    async fn handle(&self, cmd: ConfirmStockReservation) -> Result<(), StockError> {
        let items = prepare(&cmd.items)?;
        with_lock(
            self.lock.as_ref(),
            self.lock_ttl,
            &items,
            self.repo.confirm_stock_reservation(&items),
        )
        .await
    }
}

pub struct GetStockHandler {
    repo: Arc<dyn StockRepository>,
}

impl GetStockHandler {
    pub fn new(repo: Arc<dyn StockRepository>) -> BoxedHandler<GetStock, Vec<StockRecord>, StockError> {
        apply_middleware(Self { repo }, standard_layers("GetStock"))
    }
}

#[async_trait]
impl CommandHandler<GetStock> for GetStockHandler {
    type Output = Vec<StockRecord>;
    type Error = StockError;

    async fn handle(&self, query: GetStock) -> Result<Vec<StockRecord>, StockError> {
        if query.product_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(StockError::Validation("product id must not be empty".into()));
        }
        self.repo.get_stock(&query.product_ids).await
    }
}

#[derive(Clone)]
pub struct Commands {
    pub reserve_stock: BoxedHandler<ReserveStock, Vec<Item>, StockError>,
    pub confirm_stock_reservation: BoxedHandler<ConfirmStockReservation, (), StockError>,
}

#[derive(Clone)]
pub struct Queries {
    pub get_stock: BoxedHandler<GetStock, Vec<StockRecord>, StockError>,
}

/// Every use case of the service, already wrapped in middleware.
#[derive(Clone)]
pub struct Application {
    pub commands: Commands,
    pub queries: Queries,
}

impl Application {
    pub fn new(
        repo: Arc<dyn StockRepository>,
        prices: Arc<dyn PriceProvider>,
        lock: Arc<dyn DistributedLock>,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            commands: Commands {
                reserve_stock: ReserveStockHandler::new(repo.clone(), prices, lock.clone(), lock_ttl),
                confirm_stock_reservation: ConfirmStockReservationHandler::new(repo.clone(), lock, lock_ttl),
            },
            queries: Queries {
                get_stock: GetStockHandler::new(repo),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExceedStockError, FailedItem, ShortfallError};
    use crate::lock::{InMemoryLock, LockError};
    use crate::memory::InMemoryStockRepository;

    const TTL: Duration = Duration::from_secs(300);

    struct Fixture {
        repo: Arc<InMemoryStockRepository>,
        lock: Arc<InMemoryLock>,
        app: Application,
    }

    fn fixture(records: Vec<StockRecord>) -> Fixture {
        let repo = Arc::new(InMemoryStockRepository::new(records));
        let lock = Arc::new(InMemoryLock::new());
        let app = Application::new(
            repo.clone(),
            Arc::new(StaticPriceProvider::new("price_")),
            lock.clone(),
            TTL,
        );
        Fixture { repo, lock, app }
    }

    fn reserve(items: &[(&str, i64)]) -> ReserveStock {
        ReserveStock {
            items: items.iter().map(|(id, q)| ItemWithQuantity::new(*id, *q)).collect(),
        }
    }

    #[tokio::test]
    async fn duplicate_lines_are_merged_before_reserving() {
        let split = fixture(vec![StockRecord::new("a", 10)]);
        let merged = fixture(vec![StockRecord::new("a", 10)]);

        let items = split.app.commands.reserve_stock.handle(reserve(&[("a", 2), ("a", 3)])).await.unwrap();
        merged.app.commands.reserve_stock.handle(reserve(&[("a", 5)])).await.unwrap();

        assert_eq!(
            items,
            vec![Item {
                product_id: "a".into(),
                quantity: 5,
                price_id: "price_a".into(),
            }]
        );
        assert_eq!(split.repo.record("a"), merged.repo.record("a"));
        assert_eq!(split.repo.record("a").unwrap().reserved, 5);
    }

    #[tokio::test]
    async fn invalid_items_are_rejected_without_locking() {
        let f = fixture(vec![StockRecord::new("a", 10)]);

        for cmd in [reserve(&[]), reserve(&[("a", 0)]), reserve(&[("", 1)]), reserve(&[("a", -2)])] {
            let err = f.app.commands.reserve_stock.handle(cmd).await.unwrap_err();
            assert!(matches!(err, StockError::Validation(_)), "{err}");
        }
        assert_eq!(f.repo.record("a").unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn merged_quantity_overflow_is_a_validation_error() {
        let f = fixture(vec![StockRecord::new("a", 10)]);

        let err = f
            .app
            .commands
            .reserve_stock
            .handle(reserve(&[("a", i64::MAX), ("a", 2)]))
            .await
            .unwrap_err();

        assert!(matches!(err, StockError::Validation(_)), "{err}");
        assert_eq!(f.repo.record("a"), Some(StockRecord::new("a", 10)));
        assert!(!f.lock.is_held(&lock_key(&[ItemWithQuantity::new("a", 1)])));
    }

    #[tokio::test]
    async fn insufficient_stock_reports_every_failed_product_and_changes_nothing() {
        let f = fixture(vec![
            StockRecord::new("a", 5),
            StockRecord::new("b", 1),
            StockRecord::new("c", 0),
        ]);

        let err = f
            .app
            .commands
            .reserve_stock
            .handle(reserve(&[("a", 2), ("b", 3), ("c", 1)]))
            .await
            .unwrap_err();

        match err {
            StockError::ExceedStock(ExceedStockError { failed_on }) => assert_eq!(
                failed_on,
                vec![
                    FailedItem {
                        product_id: "b".into(),
                        want: 3,
                        have: 1,
                    },
                    FailedItem {
                        product_id: "c".into(),
                        want: 1,
                        have: 0,
                    },
                ]
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.repo.record("a").unwrap().reserved, 0);
        assert!(!f.lock.is_held("reserve_stock_a_b_c"));
    }

    #[tokio::test]
    async fn held_lock_rejects_only_the_same_product_set() {
        let f = fixture(vec![StockRecord::new("a", 5), StockRecord::new("b", 5)]);
        let guard = f.lock.acquire("reserve_stock_a_b", TTL).await.unwrap();

        let err = f
            .app
            .commands
            .reserve_stock
            .handle(reserve(&[("b", 1), ("a", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::Lock(LockError::Contended { .. })));
        assert_eq!(shared::Classify::kind(&err), shared::ErrorKind::Unavailable);

        f.app.commands.reserve_stock.handle(reserve(&[("a", 1)])).await.unwrap();
        f.lock.release(guard).await.unwrap();
        f.app.commands.reserve_stock.handle(reserve(&[("a", 1), ("b", 1)])).await.unwrap();
        assert_eq!(f.repo.record("a").unwrap().reserved, 2);
    }

    struct FailingPrices;

    #[async_trait]
    impl PriceProvider for FailingPrices {
        async fn get_price_by_product_id(&self, product_id: &str) -> anyhow::Result<String> {
            anyhow::bail!("no price for {product_id}")
        }
    }

    #[tokio::test]
    async fn price_lookup_failure_reserves_nothing() {
        let repo = Arc::new(InMemoryStockRepository::new(vec![StockRecord::new("a", 5)]));
        let app = Application::new(repo.clone(), Arc::new(FailingPrices), Arc::new(InMemoryLock::new()), TTL);

        let err = app.commands.reserve_stock.handle(reserve(&[("a", 1)])).await.unwrap_err();

        assert!(matches!(err, StockError::PriceLookup { .. }));
        assert_eq!(repo.record("a").unwrap().reserved, 0);
    }

    #[tokio::test]
    async fn confirm_consumes_reserved_units() {
        let f = fixture(vec![StockRecord::new("a", 10)]);
        f.app.commands.reserve_stock.handle(reserve(&[("a", 4)])).await.unwrap();

        f.app
            .commands
            .confirm_stock_reservation
            .handle(ConfirmStockReservation {
                items: vec![ItemWithQuantity::new("a", 3)],
            })
            .await
            .unwrap();

        assert_eq!(
            f.repo.record("a"),
            Some(StockRecord {
                product_id: "a".into(),
                quantity: 7,
                reserved: 1,
            })
        );
    }

    #[tokio::test]
    async fn confirming_more_than_reserved_fails_and_changes_nothing() {
        let f = fixture(vec![StockRecord::new("a", 10), StockRecord::new("b", 10)]);
        f.app.commands.reserve_stock.handle(reserve(&[("a", 2), ("b", 2)])).await.unwrap();

        let err = f
            .app
            .commands
            .confirm_stock_reservation
            .handle(ConfirmStockReservation {
                items: vec![ItemWithQuantity::new("a", 1), ItemWithQuantity::new("b", 3)],
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StockError::ReservationShortfall(ShortfallError { ref failed_on }) if failed_on[0].have == 2
        ));
        assert_eq!(f.repo.record("a").unwrap().reserved, 2);
        assert_eq!(f.repo.record("b").unwrap().quantity, 10);
    }

    #[tokio::test]
    async fn get_stock_omits_unknown_products() {
        let f = fixture(vec![StockRecord::new("a", 3)]);
        let records = f
            .app
            .queries
            .get_stock
            .handle(GetStock {
                product_ids: vec!["a".into(), "zzz".into()],
            })
            .await
            .unwrap();
        assert_eq!(records, vec![StockRecord::new("a", 3)]);
    }
}
