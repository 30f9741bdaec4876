use async_trait::async_trait;
use shared::broker::BrokerError;
use shared::client::ClientError;
use shared::{Classify, ErrorKind, Order};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid payment: {0}")]
    Validation(String),
    #[error("create payment link: {0}")]
    Processor(String),
    #[error("update order: {0}")]
    Order(#[from] ClientError),
    #[error(transparent)]
    Publish(#[from] BrokerError),
}

impl Classify for PaymentError {
    fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Validation(_) => ErrorKind::Validation,
            PaymentError::Processor(_) | PaymentError::Publish(_) => ErrorKind::Unavailable,
            PaymentError::Order(e) => e.kind(),
        }
    }
}

/// Payment provider that turns an order into a checkout link.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn create_payment_link(&self, order: &Order) -> Result<String, PaymentError>;
}

/// Hands out links to a local checkout page instead of a real provider.
pub struct InMemoryProcessor {
    checkout_base_url: String,
}

impl InMemoryProcessor {
    pub fn new(checkout_base_url: impl Into<String>) -> Self {
        Self {
            checkout_base_url: checkout_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Processor for InMemoryProcessor {
    async fn create_payment_link(&self, order: &Order) -> Result<String, PaymentError> {
        if order.items.is_empty() {
            return Err(PaymentError::Processor(format!("order {} has no items to charge", order.id)));
        }
        Ok(format!("{}/checkout/{}", self.checkout_base_url, order.id))
    }
}
