use anyhow::Context;
use async_trait::async_trait;
use shared::broker::{EventHandler, TraceContext};
use shared::Order;
use tracing::{info, info_span, Instrument};

use crate::commands::{Application, ConfirmOrderPaid};

pub const SUBSCRIBER: &str = "order";

/// Records the payment on the order aggregate.
pub struct OrderPaidHandler {
    app: Application,
}

impl OrderPaidHandler {
    pub fn new(app: Application) -> Self {
        Self { app }
    }
}

#[async_trait]
impl EventHandler for OrderPaidHandler {
    type Event = Order;

    async fn handle(&self, trace: &TraceContext, order: Order) -> anyhow::Result<()> {
        let order_id = order.id.clone();
        self.app
            .commands
            .confirm_order_paid
            .handle(ConfirmOrderPaid { order })
            .instrument(info_span!("confirm_order_paid", order_id = %order_id, trace_id = %trace.trace_id()))
            .await
            .with_context(|| format!("confirm order {order_id} paid"))?;

        info!(order_id = %order_id, "Order marked as paid");
        Ok(())
    }
}
