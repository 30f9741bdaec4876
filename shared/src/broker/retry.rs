use std::time::Duration;
use tracing::{info, warn};

use super::{BrokerError, Delivery, Envelope, Publisher, Routing, DLX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i64,
    /// Delay before the n-th retry is `backoff_unit * n`.
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: i64, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
        }
    }

    pub fn backoff(&self, retry_count: i64) -> Duration {
        let factor = u32::try_from(retry_count.max(0)).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Retried(i64),
    DeadLettered,
}

/// Called after a handler failed on `delivery`. Bumps `x-retry-count`; while
/// the count stays within budget the message goes back to its queue after a
/// linear backoff, otherwise it is published once to the dead-letter
/// exchange, which routes to the dead-letter queue.
pub async fn handle_retry(
    publisher: &dyn Publisher,
    policy: &RetryPolicy,
    delivery: &Delivery,
) -> Result<RetryOutcome, BrokerError> {
    let mut headers = delivery.headers.clone();
    let retry_count = headers.retry_count() + 1;
    headers.set_retry_count(retry_count);

    let envelope = Envelope {
        headers,
        body: delivery.body.clone(),
    };

    if retry_count > policy.max_retries {
        info!(queue = %delivery.queue, retry_count, "Moving message to dlq");
        publisher
            .publish(&Routing::fan_out(DLX), envelope)
            .await
            .map_err(|e| {
                warn!(queue = %delivery.queue, error = %e, "Publish to dlq failed");
                e
            })?;
        return Ok(RetryOutcome::DeadLettered);
    }

    let delay = policy.backoff(retry_count);
    info!(queue = %delivery.queue, retry_count, delay_ms = delay.as_millis() as u64, "Retrying message");
    tokio::time::sleep(delay).await;

    publisher
        .publish(&Routing::direct(delivery.queue.clone()), envelope)
        .await?;
    Ok(RetryOutcome::Retried(retry_count))
}
