//! Order use cases. Each handler is wrapped in the shared middleware stack
//! when the `Application` is built.

use async_trait::async_trait;
use shared::broker::{publish_event, Publisher, Routing, TraceContext, EVENT_ORDER_CREATED};
use shared::client::StockService;
use shared::handler::{apply_middleware, standard_layers, BoxedHandler, CommandHandler};
use shared::{pack_items, validate_items, ItemWithQuantity, Order, OrderStatus};
use std::sync::Arc;
use tracing::info;

use crate::domain::{new_pending_order, OrderError, OrderRepository};

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: String,
    pub items: Vec<ItemWithQuantity>,
    pub trace: TraceContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderResult {
    pub order_id: String,
}

/// Full desired state of an order as submitted by another service.
#[derive(Debug, Clone)]
pub struct UpdateOrder {
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct ConfirmOrderPaid {
    pub order: Order,
}

#[derive(Debug, Clone)]
pub struct GetCustomerOrder {
    pub order_id: String,
    pub customer_id: String,
}

pub struct CreateOrderHandler {
    repo: Arc<dyn OrderRepository>,
    stock: Arc<dyn StockService>,
    publisher: Arc<dyn Publisher>,
}

impl CreateOrderHandler {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        stock: Arc<dyn StockService>,
        publisher: Arc<dyn Publisher>,
    ) -> BoxedHandler<CreateOrder, CreateOrderResult, OrderError> {
        apply_middleware(Self { repo, stock, publisher }, standard_layers("CreateOrder"))
    }
}

#[async_trait]
impl CommandHandler<CreateOrder> for CreateOrderHandler {
    type Output = CreateOrderResult;
    type Error = OrderError;

    async fn handle(&self, cmd: CreateOrder) -> Result<CreateOrderResult, OrderError> {
        validate_items(&cmd.items).map_err(OrderError::Validation)?;
        let items = pack_items(&cmd.items).map_err(OrderError::Validation)?;

        let reserved = self.stock.reserve_stock(&cmd.trace, &items).await?;
        let order = new_pending_order(&cmd.customer_id, reserved)?;
        self.repo.create(&order).await?;

        publish_event(
            self.publisher.as_ref(),
            &Routing::direct(EVENT_ORDER_CREATED),
            &order,
            &cmd.trace,
        )
        .await?;

        info!(order_id = %order.id, customer_id = %order.customer_id, "Order created");
        Ok(CreateOrderResult { order_id: order.id })
    }
}

/// Applies the status transition and overwrites the payment link with the
/// submitted value.
pub struct UpdateOrderHandler {
    repo: Arc<dyn OrderRepository>,
}

impl UpdateOrderHandler {
    pub fn new(repo: Arc<dyn OrderRepository>) -> BoxedHandler<UpdateOrder, Order, OrderError> {
        apply_middleware(Self { repo }, standard_layers("UpdateOrder"))
    }
}

#[async_trait]
impl CommandHandler<UpdateOrder> for UpdateOrderHandler {
    type Output = Order;
    type Error = OrderError;

    async fn handle(&self, cmd: UpdateOrder) -> Result<Order, OrderError> {
        let UpdateOrder { order: desired } = cmd;
        let (order_id, customer_id) = (desired.id.clone(), desired.customer_id.clone());

        self.repo
            .update(
                &order_id,
                &customer_id,
                Box::new(move |order: &mut Order| {
                    order.update_status_to(desired.status)?;
                    order.payment_link = desired.payment_link;
                    Ok(())
                }),
            )
            .await
    }
}

pub struct ConfirmOrderPaidHandler {
    repo: Arc<dyn OrderRepository>,
}

impl ConfirmOrderPaidHandler {
    pub fn new(repo: Arc<dyn OrderRepository>) -> BoxedHandler<ConfirmOrderPaid, Order, OrderError> {
        apply_middleware(Self { repo }, standard_layers("ConfirmOrderPaid"))
    }
}

#[async_trait]
impl CommandHandler<ConfirmOrderPaid> for ConfirmOrderPaidHandler {
    type Output = Order;
    type Error = OrderError;

    async fn handle(&self, cmd: ConfirmOrderPaid) -> Result<Order, OrderError> {
        if cmd.order.status != OrderStatus::Paid {
            return Err(OrderError::Validation(format!(
                "order {} is {}, only paid orders can be confirmed",
                cmd.order.id, cmd.order.status
            )));
        }

        self.repo
            .update(
                &cmd.order.id,
                &cmd.order.customer_id,
                Box::new(|order: &mut Order| {
                    order.update_status_to(OrderStatus::Paid)?;
                    order.payment_link.clear();
                    Ok(())
                }),
            )
            .await
    }
}

pub struct GetCustomerOrderHandler {
    repo: Arc<dyn OrderRepository>,
}

impl GetCustomerOrderHandler {
    pub fn new(repo: Arc<dyn OrderRepository>) -> BoxedHandler<GetCustomerOrder, Order, OrderError> {
        apply_middleware(Self { repo }, standard_layers("GetCustomerOrder"))
    }
}

#[async_trait]
impl CommandHandler<GetCustomerOrder> for GetCustomerOrderHandler {
    type Output = Order;
    type Error = OrderError;

    async fn handle(&self, query: GetCustomerOrder) -> Result<Order, OrderError> {
        self.repo.get(&query.order_id, &query.customer_id).await
    }
}

#[derive(Clone)]
pub struct Commands {
    pub create_order: BoxedHandler<CreateOrder, CreateOrderResult, OrderError>,
    pub update_order: BoxedHandler<UpdateOrder, Order, OrderError>,
    pub confirm_order_paid: BoxedHandler<ConfirmOrderPaid, Order, OrderError>,
}

#[derive(Clone)]
pub struct Queries {
    pub get_customer_order: BoxedHandler<GetCustomerOrder, Order, OrderError>,
}

#[derive(Clone)]
pub struct Application {
    pub commands: Commands,
    pub queries: Queries,
}

impl Application {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        stock: Arc<dyn StockService>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            commands: Commands {
                create_order: CreateOrderHandler::new(repo.clone(), stock, publisher),
                update_order: UpdateOrderHandler::new(repo.clone()),
                confirm_order_paid: ConfirmOrderPaidHandler::new(repo.clone()),
            },
            queries: Queries {
                get_customer_order: GetCustomerOrderHandler::new(repo),
            },
        }
    }
}
