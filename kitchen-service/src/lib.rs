//! Prepares paid orders and reports them ready.

use anyhow::Context;
use async_trait::async_trait;
use shared::broker::{EventHandler, TraceContext};
use shared::client::{ClientError, OrderService};
use shared::handler::{apply_middleware, standard_layers, BoxedHandler, CommandHandler};
use shared::{Classify, ErrorKind, Order, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, info_span, Instrument};

pub const SUBSCRIBER: &str = "kitchen";

#[derive(Debug, Error)]
pub enum KitchenError {
    #[error("order {order_id} is {status}, only paid orders are cooked")]
    NotPaid { order_id: String, status: OrderStatus },
    #[error("mark order ready: {0}")]
    Order(#[from] ClientError),
}

impl Classify for KitchenError {
    fn kind(&self) -> ErrorKind {
        match self {
            KitchenError::NotPaid { .. } => ErrorKind::Conflict,
            KitchenError::Order(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookOrder {
    pub order: Order,
    pub trace: TraceContext,
}

pub struct CookOrderHandler {
    orders: Arc<dyn OrderService>,
    cook_duration: Duration,
}

impl CookOrderHandler {
    pub fn new(orders: Arc<dyn OrderService>, cook_duration: Duration) -> BoxedHandler<CookOrder, (), KitchenError> {
        apply_middleware(Self { orders, cook_duration }, standard_layers("CookOrder"))
    }
}

#[async_trait]
impl CommandHandler<CookOrder> for CookOrderHandler {
    type Output = ();
    type Error = KitchenError;

    async fn handle(&self, cmd: CookOrder) -> Result<(), KitchenError> {
        let CookOrder { order, trace } = cmd;
        if order.status != OrderStatus::Paid {
            return Err(KitchenError::NotPaid {
                order_id: order.id,
                status: order.status,
            });
        }

        info!(order_id = %order.id, "Cooking order");
        tokio::time::sleep(self.cook_duration).await;
        info!(order_id = %order.id, "Order done");

        let ready = Order {
            status: OrderStatus::Ready,
            ..order
        };
        self.orders.update_order(&trace, &ready).await?;
        Ok(())
    }
}

/// Consumes `order.paid` through the kitchen's private queue.
pub struct OrderPaidHandler {
    cook: BoxedHandler<CookOrder, (), KitchenError>,
}

impl OrderPaidHandler {
    pub fn new(cook: BoxedHandler<CookOrder, (), KitchenError>) -> Self {
        Self { cook }
    }
}

#[async_trait]
impl EventHandler for OrderPaidHandler {
    type Event = Order;

    async fn handle(&self, trace: &TraceContext, order: Order) -> anyhow::Result<()> {
        let order_id = order.id.clone();
        self.cook
            .handle(CookOrder {
                order,
                trace: trace.clone(),
            })
            .instrument(info_span!("cook_order", order_id = %order_id, trace_id = %trace.trace_id()))
            .await
            .with_context(|| format!("cook order {order_id}"))?;
        Ok(())
    }
}
