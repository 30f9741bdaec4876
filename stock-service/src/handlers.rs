use anyhow::{bail, Context};
use async_trait::async_trait;
use shared::broker::{EventHandler, TraceContext};
use shared::{Order, OrderStatus};
use tracing::{info, Instrument};

use crate::commands::{Application, ConfirmStockReservation};

pub const SUBSCRIBER: &str = "stock";

/// Turns the reservation of a paid order into a sale.
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
        if order.status != OrderStatus::Paid {
            bail!("order {} has status {}, expected paid", order.id, order.status);
        }

        self.app
            .commands
            .confirm_stock_reservation
            .handle(ConfirmStockReservation {
                items: order.items_with_quantity(),
            })
            .instrument(tracing::info_span!("confirm_stock", order_id = %order.id, trace_id = %trace.trace_id()))
            .await
            .with_context(|| format!("confirm stock reservation for order {}", order.id))?;

        info!(order_id = %order.id, "Stock reservation confirmed");
        Ok(())
    }
}
