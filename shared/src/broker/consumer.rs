use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use super::{handle_retry, BrokerError, Delivery, Publisher, RetryOutcome, RetryPolicy, TraceContext};

/// Business logic run for every decoded message.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Event: DeserializeOwned + Send;

    async fn handle(&self, trace: &TraceContext, event: Self::Event) -> anyhow::Result<()>;
}

/// What happened to a delivery. Every variant means the message may be
/// acknowledged on its origin queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Retried(i64),
    DeadLettered,
    /// The body could not be decoded; redelivery cannot fix that.
    Dropped,
}

pub struct Consumer<H> {
    queue: String,
    handler: H,
    publisher: Arc<dyn Publisher>,
    policy: RetryPolicy,
}

impl<H: EventHandler> Consumer<H> {
    pub fn new(queue: impl Into<String>, handler: H, publisher: Arc<dyn Publisher>, policy: RetryPolicy) -> Self {
        Self {
            queue: queue.into(),
            handler,
            publisher,
            policy,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Runs the handler on one delivery. Handler failures go through the
    /// retry/DLQ path; an error is returned only when that path itself could
    /// not publish, in which case the delivery must not be acknowledged.
    pub async fn process(&self, delivery: Delivery) -> Result<Outcome, BrokerError> {
        let trace = TraceContext::extract(&delivery.headers);
        let span = info_span!(
            "consume",
            queue = %delivery.queue,
            trace_id = %trace.trace_id(),
            retry_count = delivery.headers.retry_count(),
        );

        self.process_traced(&trace, &delivery).instrument(span).await
    }

    async fn process_traced(&self, trace: &TraceContext, delivery: &Delivery) -> Result<Outcome, BrokerError> {
        info!("Received message");

        let event: H::Event = match serde_json::from_slice(&delivery.body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, body = %String::from_utf8_lossy(&delivery.body), "Failed to unmarshal message body");
                return Ok(Outcome::Dropped);
            }
        };

        match self.handler.handle(trace, event).await {
            Ok(()) => {
                info!("Consume success");
                Ok(Outcome::Acked)
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Consume failed");
                match handle_retry(self.publisher.as_ref(), &self.policy, delivery).await? {
                    RetryOutcome::Retried(n) => Ok(Outcome::Retried(n)),
                    RetryOutcome::DeadLettered => Ok(Outcome::DeadLettered),
                }
            }
        }
    }
}
