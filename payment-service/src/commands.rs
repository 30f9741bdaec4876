use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::broker::{publish_event, Publisher, Routing, TraceContext, EVENT_ORDER_PAID};
use shared::client::OrderService;
use shared::handler::{apply_middleware, standard_layers, BoxedHandler, CommandHandler};
use shared::{Item, Order, OrderStatus};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{PaymentError, Processor};

pub const PAYMENT_STATUS_PAID: &str = "paid";

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub order: Order,
    pub trace: TraceContext,
}

/// What the payment provider reports once a checkout finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub customer_id: String,
    pub payment_status: String,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub struct ConfirmPayment {
    pub confirmation: PaymentConfirmation,
    pub trace: TraceContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Published,
    Ignored,
}

/// Creates the checkout link and moves the order to `waiting_for_payment`.
pub struct CreatePaymentHandler {
    processor: Arc<dyn Processor>,
    orders: Arc<dyn OrderService>,
}

impl CreatePaymentHandler {
    pub fn new(
        processor: Arc<dyn Processor>,
        orders: Arc<dyn OrderService>,
    ) -> BoxedHandler<CreatePayment, String, PaymentError> {
        apply_middleware(Self { processor, orders }, standard_layers("CreatePayment"))
    }
}

#[async_trait]
impl CommandHandler<CreatePayment> for CreatePaymentHandler {
    type Output = String;
    type Error = PaymentError;

    async fn handle(&self, cmd: CreatePayment) -> Result<String, PaymentError> {
        let link = self.processor.create_payment_link(&cmd.order).await?;
        info!(order_id = %cmd.order.id, payment_link = %link, "Created payment link for order");

        let order = Order {
            status: OrderStatus::WaitingForPayment,
            payment_link: link.clone(),
            ..cmd.order
        };
        debug!(order = ?order, "Updating order with payment link");
        self.orders.update_order(&cmd.trace, &order).await?;
        Ok(link)
    }
}

/// Announces a completed payment to every `order.paid` subscriber.
pub struct ConfirmPaymentHandler {
    publisher: Arc<dyn Publisher>,
}

impl ConfirmPaymentHandler {
    pub fn new(publisher: Arc<dyn Publisher>) -> BoxedHandler<ConfirmPayment, ConfirmOutcome, PaymentError> {
        apply_middleware(Self { publisher }, standard_layers("ConfirmPayment"))
    }
}

#[async_trait]
impl CommandHandler<ConfirmPayment> for ConfirmPaymentHandler {
    type Output = ConfirmOutcome;
    type Error = PaymentError;

    async fn handle(&self, cmd: ConfirmPayment) -> Result<ConfirmOutcome, PaymentError> {
        let ConfirmPayment { confirmation, trace } = cmd;
        if confirmation.order_id.is_empty() || confirmation.customer_id.is_empty() {
            return Err(PaymentError::Validation("order id and customer id are required".into()));
        }
        if confirmation.payment_status != PAYMENT_STATUS_PAID {
            info!(
                order_id = %confirmation.order_id,
                payment_status = %confirmation.payment_status,
                "Ignoring unpaid checkout"
            );
            return Ok(ConfirmOutcome::Ignored);
        }
        // Stock confirms its reservation from these lines.
        if confirmation.items.is_empty() {
            return Err(PaymentError::Validation(format!(
                "paid order {} carries no items",
                confirmation.order_id
            )));
        }

        let order = Order {
            id: confirmation.order_id,
            customer_id: confirmation.customer_id,
            status: OrderStatus::Paid,
            payment_link: String::new(),
            items: confirmation.items,
        };
        publish_event(self.publisher.as_ref(), &Routing::fan_out(EVENT_ORDER_PAID), &order, &trace).await?;
        Ok(ConfirmOutcome::Published)
    }
}

#[derive(Clone)]
pub struct Commands {
    pub create_payment: BoxedHandler<CreatePayment, String, PaymentError>,
    pub confirm_payment: BoxedHandler<ConfirmPayment, ConfirmOutcome, PaymentError>,
}

#[derive(Clone)]
pub struct Application {
    pub commands: Commands,
}

impl Application {
    pub fn new(processor: Arc<dyn Processor>, orders: Arc<dyn OrderService>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            commands: Commands {
                create_payment: CreatePaymentHandler::new(processor, orders),
                confirm_payment: ConfirmPaymentHandler::new(publisher),
            },
        }
    }
}
