use anyhow::Result;
use clap::Parser;
use shared::broker::{spawn_consumer, Consumer, KafkaBroker, Publisher, Subscription, EVENT_ORDER_PAID};
use shared::client::HttpOrderClient;
use shared::config::BrokerArgs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use kitchen_service::{CookOrderHandler, OrderPaidHandler, SUBSCRIBER};

#[derive(Parser)]
#[command(name = "kitchen-service")]
struct Args {
    #[arg(long, env = "ORDER_SERVICE_URL", default_value = "http://localhost:3001")]
    order_service_url: String,

    #[arg(long, env = "COOK_DURATION_MS", default_value_t = 5000)]
    cook_duration_ms: u64,

    #[command(flatten)]
    broker: BrokerArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let broker = Arc::new(KafkaBroker::connect(&args.broker.kafka_brokers)?);
    broker.declare_topology().await?;
    let publisher: Arc<dyn Publisher> = broker.clone();

    let cook = CookOrderHandler::new(
        Arc::new(HttpOrderClient::new(args.order_service_url)),
        Duration::from_millis(args.cook_duration_ms),
    );

    let subscription = Subscription::fan_out(EVENT_ORDER_PAID, SUBSCRIBER);
    let stream = broker.subscribe(&subscription).await?;
    let consumer = Consumer::new(
        subscription.queue,
        OrderPaidHandler::new(cook),
        publisher,
        args.broker.retry_policy(),
    );

    info!("Kitchen service started");
    let reason = spawn_consumer(stream, consumer).await?;
    error!("Consumer stopped: {}", reason);
    Err(reason.into())
}
