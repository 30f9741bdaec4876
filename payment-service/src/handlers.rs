use anyhow::Context;
use async_trait::async_trait;
use shared::broker::{EventHandler, TraceContext};
use shared::Order;
use tracing::{info_span, Instrument};

use crate::commands::{Application, CreatePayment};

/// Starts checkout for every newly created order.
pub struct OrderCreatedHandler {
    app: Application,
}

impl OrderCreatedHandler {
    pub fn new(app: Application) -> Self {
        Self { app }
    }
}

#[async_trait]
impl EventHandler for OrderCreatedHandler {
    type Event = Order;

    async fn handle(&self, trace: &TraceContext, order: Order) -> anyhow::Result<()> {
        let order_id = order.id.clone();
        let span = info_span!("create_payment", order_id = %order_id, trace_id = %trace.trace_id());

        self.app
            .commands
            .create_payment
            .handle(CreatePayment {
                order,
                trace: trace.clone(),
            })
            .instrument(span)
            .await
            .with_context(|| format!("create payment for order {order_id}"))?;
        Ok(())
    }
}
