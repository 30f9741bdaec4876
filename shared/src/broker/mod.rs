//! Publish/consume primitives with a retry-count header protocol and
//! dead-letter routing.
//!
//! Topology is AMQP-shaped: a direct route addresses one named queue, a
//! fan-out route addresses an exchange and reaches every queue bound to it.
//! Retry and trace metadata travel in headers so body schemas stay stable
//! across redelivery.

mod consumer;
mod kafka;
mod memory;
mod retry;
mod trace;

pub use consumer::{Consumer, EventHandler, Outcome};
pub use kafka::{run_consumer, spawn_consumer, KafkaBroker};
pub use memory::InMemoryBroker;
pub use retry::{handle_retry, RetryOutcome, RetryPolicy};
pub use trace::TraceContext;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::{Classify, ErrorKind};

pub const EVENT_ORDER_CREATED: &str = "order.created";
pub const EVENT_ORDER_PAID: &str = "order.paid";

pub const DLX: &str = "dlx";
pub const DLQ: &str = "dlq";

pub const RETRY_HEADER: &str = "x-retry-count";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Routing {
    /// Deliver to exactly one named durable queue.
    Direct { queue: String },
    /// Deliver a copy to every queue bound to the exchange.
    FanOut { exchange: String },
}

impl Routing {
    pub fn direct(queue: impl Into<String>) -> Self {
        Routing::Direct { queue: queue.into() }
    }

    pub fn fan_out(exchange: impl Into<String>) -> Self {
        Routing::FanOut {
            exchange: exchange.into(),
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            Routing::Direct { queue } => queue,
            Routing::FanOut { exchange } => exchange,
        }
    }
}

/// Where a consumer reads from. A fan-out subscriber owns a private queue
/// named `<exchange>.<subscriber>`; a direct subscriber reads the named queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub queue: String,
    pub exchange: Option<String>,
}

impl Subscription {
    pub fn direct(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: None,
        }
    }

    pub fn fan_out(exchange: &str, subscriber: &str) -> Self {
        Self {
            queue: format!("{exchange}.{subscriber}"),
            exchange: Some(exchange.to_string()),
        }
    }

    /// The shared dead-letter queue, bound to the dead-letter exchange.
    pub fn dead_letter() -> Self {
        Self {
            queue: DLQ.to_string(),
            exchange: Some(DLX.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Zero when the header is absent or unreadable.
    pub fn retry_count(&self) -> i64 {
        self.get(RETRY_HEADER)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_retry_count(&mut self, count: i64) {
        self.insert(RETRY_HEADER, count.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Envelope {
    /// Serializes `body` as JSON and injects the trace context into headers.
    pub fn json<T: Serialize>(body: &T, trace: &TraceContext) -> Result<Self, BrokerError> {
        let body = serde_json::to_vec(body)?;
        let mut headers = Headers::new();
        trace.inject(&mut headers);
        Ok(Self { headers, body })
    }
}

/// A message handed to a consumer, tagged with the queue it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            queue: queue.into(),
            headers: envelope.headers,
            body: envelope.body,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("marshalling body in publish event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("publish event to {destination}: {reason}")]
    Publish { destination: String, reason: String },
    #[error("declare topology: {0}")]
    Topology(String),
    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("consumer for queue {0} stopped")]
    ConsumerStopped(String),
}

impl Classify for BrokerError {
    fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Serialize(_) => ErrorKind::Internal,
            _ => ErrorKind::Unavailable,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends one persistent message. Failures are returned, never retried here.
    async fn publish(&self, routing: &Routing, envelope: Envelope) -> Result<(), BrokerError>;
}

/// Serializes `body`, attaches the trace context and publishes it.
pub async fn publish_event<T: Serialize + Sync>(
    publisher: &dyn Publisher,
    routing: &Routing,
    body: &T,
    trace: &TraceContext,
) -> Result<(), BrokerError> {
    let envelope = Envelope::json(body, trace)?;
    match publisher.publish(routing, envelope).await {
        Ok(()) => {
            info!(destination = routing.destination(), trace_id = %trace.trace_id(), "Event published");
            Ok(())
        }
        Err(e) => {
            warn!(destination = routing.destination(), error = %e, "Failed to publish event");
            Err(e)
        }
    }
}
