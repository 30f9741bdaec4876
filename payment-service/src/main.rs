use anyhow::Result;
use clap::Parser;
use shared::broker::{spawn_consumer, Consumer, KafkaBroker, Publisher, Subscription, EVENT_ORDER_CREATED};
use shared::client::HttpOrderClient;
use shared::config::BrokerArgs;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{error, info};

use payment_service::api::{self, AppState};
use payment_service::commands::Application;
use payment_service::domain::InMemoryProcessor;
use payment_service::handlers::OrderCreatedHandler;

#[derive(Parser)]
#[command(name = "payment-service")]
struct Args {
    #[arg(long, env = "ORDER_SERVICE_URL", default_value = "http://localhost:3001")]
    order_service_url: String,

    #[arg(long, env = "CHECKOUT_BASE_URL", default_value = "http://localhost:8284")]
    checkout_base_url: String,

    #[arg(long, env = "PORT", default_value = "8284")]
    port: u16,

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

    let app = Application::new(
        Arc::new(InMemoryProcessor::new(args.checkout_base_url)),
        Arc::new(HttpOrderClient::new(args.order_service_url)),
        publisher.clone(),
    );

    let subscription = Subscription::direct(EVENT_ORDER_CREATED);
    let stream = broker.subscribe(&subscription).await?;
    let consumer = Consumer::new(
        subscription.queue,
        OrderCreatedHandler::new(app.clone()),
        publisher,
        args.broker.retry_policy(),
    );
    let consumer_task = spawn_consumer(stream, consumer);

    let router = api::create_router(AppState { app });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!("Payment service listening on port {}", args.port);

    tokio::select! {
        stopped = consumer_task => {
            let reason = stopped?;
            error!("Consumer stopped: {}", reason);
            Err(reason.into())
        }
        served = axum::serve(listener, router).into_future() => {
            served?;
            Ok(())
        }
    }
}
