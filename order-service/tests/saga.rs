//! The whole order flow with every service wired in process: stock is
//! reserved at creation, payment attaches a link, the paid event reaches
//! order, stock and kitchen through their own queues.

use async_trait::async_trait;
use shared::broker::{
    Consumer, EventHandler, InMemoryBroker, Outcome, RetryPolicy, Subscription, TraceContext, DLQ, EVENT_ORDER_CREATED,
    EVENT_ORDER_PAID,
};
use shared::client::{ClientError, OrderService, StockService};
use shared::{Classify, ErrorKind, Item, ItemWithQuantity, Order, OrderStatus};
use std::sync::Arc;
use std::time::Duration;

use order_service::commands::{self as orders, CreateOrder, GetCustomerOrder, UpdateOrder};
use order_service::memory::InMemoryOrderRepository;
use payment_service::commands::{self as payments, ConfirmPayment, PaymentConfirmation};
use payment_service::domain::InMemoryProcessor;
use stock_service::commands::{self as stock, ConfirmStockReservation, ReserveStock, StaticPriceProvider};
use stock_service::domain::StockRecord;
use stock_service::lock::InMemoryLock;
use stock_service::memory::InMemoryStockRepository;

fn rejected(service: &'static str, err: impl Classify + std::fmt::Display) -> ClientError {
    let kind = err.kind();
    ClientError::Rejected {
        service,
        status: kind.status_code().as_u16(),
        kind,
        message: err.to_string(),
    }
}

struct LocalStock(stock::Application);

#[async_trait]
impl StockService for LocalStock {
    async fn reserve_stock(&self, _trace: &TraceContext, items: &[ItemWithQuantity]) -> Result<Vec<Item>, ClientError> {
        self.0
            .commands
            .reserve_stock
            .handle(ReserveStock { items: items.to_vec() })
            .await
            .map_err(|e| rejected("stock-service", e))
    }

    async fn confirm_stock_reservation(&self, _trace: &TraceContext, items: &[ItemWithQuantity]) -> Result<(), ClientError> {
        self.0
            .commands
            .confirm_stock_reservation
            .handle(ConfirmStockReservation { items: items.to_vec() })
            .await
            .map_err(|e| rejected("stock-service", e))
    }
}

struct LocalOrders(orders::Application);

#[async_trait]
impl OrderService for LocalOrders {
    async fn update_order(&self, _trace: &TraceContext, order: &Order) -> Result<(), ClientError> {
        self.0
            .commands
            .update_order
            .handle(UpdateOrder { order: order.clone() })
            .await
            .map(|_| ())
            .map_err(|e| rejected("order-service", e))
    }
}

struct Saga {
    broker: InMemoryBroker,
    ledger: Arc<InMemoryStockRepository>,
    stock: stock::Application,
    orders: orders::Application,
    payments: payments::Application,
    policy: RetryPolicy,
}

impl Saga {
    fn new(stock_on_hand: i64) -> Self {
        let broker = InMemoryBroker::new();
        broker.declare(&Subscription::direct(EVENT_ORDER_CREATED));
        for subscriber in ["order", "stock", "kitchen"] {
            broker.declare(&Subscription::fan_out(EVENT_ORDER_PAID, subscriber));
        }

        let ledger = Arc::new(InMemoryStockRepository::new(vec![StockRecord::new("p1", stock_on_hand)]));
        let stock = stock::Application::new(
            ledger.clone(),
            Arc::new(StaticPriceProvider::new("price_")),
            Arc::new(InMemoryLock::new()),
            Duration::from_secs(300),
        );
        let orders = orders::Application::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(LocalStock(stock.clone())),
            Arc::new(broker.clone()),
        );
        let payments = payments::Application::new(
            Arc::new(InMemoryProcessor::new("http://localhost:8284")),
            Arc::new(LocalOrders(orders.clone())),
            Arc::new(broker.clone()),
        );

        Self {
            broker,
            ledger,
            stock,
            orders,
            payments,
            policy: RetryPolicy::new(3, Duration::from_secs(1)),
        }
    }

    async fn drain<H: EventHandler>(&self, subscription: Subscription, handler: H) -> Vec<Outcome> {
        let consumer = Consumer::new(subscription.queue, handler, Arc::new(self.broker.clone()), self.policy);
        self.broker.drain(&consumer).await.unwrap()
    }

    async fn order(&self, order_id: &str) -> Order {
        self.orders
            .queries
            .get_customer_order
            .handle(GetCustomerOrder {
                order_id: order_id.to_string(),
                customer_id: "c1".into(),
            })
            .await
            .unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn order_flows_from_reservation_to_ready() {
    let saga = Saga::new(10);
    let trace = TraceContext::new_root();

    let created = saga
        .orders
        .commands
        .create_order
        .handle(CreateOrder {
            customer_id: "c1".into(),
            items: vec![ItemWithQuantity::new("p1", 2)],
            trace: trace.clone(),
        })
        .await
        .unwrap();
    assert_eq!(saga.ledger.record("p1").unwrap().reserved, 2);
    assert_eq!(saga.order(&created.order_id).await.status, OrderStatus::Pending);

    let outcomes = saga
        .drain(
            Subscription::direct(EVENT_ORDER_CREATED),
            payment_service::handlers::OrderCreatedHandler::new(saga.payments.clone()),
        )
        .await;
    assert_eq!(outcomes, vec![Outcome::Acked]);
    let order = saga.order(&created.order_id).await;
    assert_eq!(order.status, OrderStatus::WaitingForPayment);
    assert_eq!(order.payment_link, format!("http://localhost:8284/checkout/{}", order.id));

    saga.payments
        .commands
        .confirm_payment
        .handle(ConfirmPayment {
            confirmation: PaymentConfirmation {
                order_id: order.id.clone(),
                customer_id: order.customer_id.clone(),
                payment_status: "paid".into(),
                items: order.items.clone(),
            },
            trace: trace.clone(),
        })
        .await
        .unwrap();

    let outcomes = saga
        .drain(
            Subscription::fan_out(EVENT_ORDER_PAID, order_service::handlers::SUBSCRIBER),
            order_service::handlers::OrderPaidHandler::new(saga.orders.clone()),
        )
        .await;
    assert_eq!(outcomes, vec![Outcome::Acked]);
    let paid = saga.order(&order.id).await;
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.payment_link.is_empty());

    let outcomes = saga
        .drain(
            Subscription::fan_out(EVENT_ORDER_PAID, stock_service::handlers::SUBSCRIBER),
            stock_service::handlers::OrderPaidHandler::new(saga.stock.clone()),
        )
        .await;
    assert_eq!(outcomes, vec![Outcome::Acked]);
    assert_eq!(
        saga.ledger.record("p1"),
        Some(StockRecord {
            product_id: "p1".into(),
            quantity: 8,
            reserved: 0,
        })
    );

    let cook = kitchen_service::CookOrderHandler::new(
        Arc::new(LocalOrders(saga.orders.clone())),
        Duration::from_secs(5),
    );
    let outcomes = saga
        .drain(
            Subscription::fan_out(EVENT_ORDER_PAID, kitchen_service::SUBSCRIBER),
            kitchen_service::OrderPaidHandler::new(cook),
        )
        .await;
    assert_eq!(outcomes, vec![Outcome::Acked]);
    assert_eq!(saga.order(&order.id).await.status, OrderStatus::Ready);

    assert_eq!(saga.broker.queue_len(DLQ), 0);
}

#[tokio::test]
async fn insufficient_stock_stops_the_saga_before_it_starts() {
    let saga = Saga::new(1);

    let err = saga
        .orders
        .commands
        .create_order
        .handle(CreateOrder {
            customer_id: "c1".into(),
            items: vec![ItemWithQuantity::new("p1", 1), ItemWithQuantity::new("p1", 1)],
            trace: TraceContext::new_root(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("product p1 want 2 have 1"), "{err}");
    assert_eq!(saga.ledger.record("p1").unwrap().reserved, 0);
    assert_eq!(saga.broker.queue_len(EVENT_ORDER_CREATED), 0);
}
