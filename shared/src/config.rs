use clap::Args;
use std::time::Duration;

use crate::broker::RetryPolicy;

/// Broker settings every service flattens into its own `Args`.
#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    /// Retries before a failing message is moved to the dead-letter queue.
    #[arg(long, env = "BROKER_MAX_RETRY", default_value_t = 3)]
    pub max_retry: i64,

    #[arg(long, env = "BROKER_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub retry_backoff_ms: u64,
}

impl BrokerArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry, Duration::from_millis(self.retry_backoff_ms))
    }
}
