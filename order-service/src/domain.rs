use async_trait::async_trait;
use shared::broker::BrokerError;
use shared::client::ClientError;
use shared::{Classify, ErrorKind, IllegalTransition, Item, Order, OrderStatus};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order: {0}")]
    Validation(String),
    #[error("order {order_id} not found for customer {customer_id}")]
    NotFound { order_id: String, customer_id: String },
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("reserve stock: {0}")]
    Stock(#[from] ClientError),
    #[error(transparent)]
    Publish(#[from] BrokerError),
    #[error("order storage: {0:#}")]
    Storage(anyhow::Error),
}

impl Classify for OrderError {
    fn kind(&self) -> ErrorKind {
        match self {
            OrderError::Validation(_) => ErrorKind::Validation,
            OrderError::NotFound { .. } => ErrorKind::NotFound,
            OrderError::IllegalTransition(_) => ErrorKind::Conflict,
            OrderError::Stock(e) => e.kind(),
            OrderError::Publish(_) | OrderError::Storage(_) => ErrorKind::Unavailable,
        }
    }
}

/// A fresh order for reserved, priced items.
pub fn new_pending_order(customer_id: &str, items: Vec<Item>) -> Result<Order, OrderError> {
    if customer_id.trim().is_empty() {
        return Err(OrderError::Validation("empty customer id".into()));
    }
    if items.is_empty() {
        return Err(OrderError::Validation("items cannot be empty".into()));
    }

    Ok(Order {
        id: Uuid::new_v4().to_string(),
        customer_id: customer_id.to_string(),
        status: OrderStatus::Pending,
        payment_link: String::new(),
        items,
    })
}

/// Mutation applied to the stored order under the repository's lock.
pub type UpdateFn = Box<dyn FnOnce(&mut Order) -> Result<(), OrderError> + Send>;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: &Order) -> Result<(), OrderError>;

    /// Orders are only visible to the customer that placed them.
    async fn get(&self, order_id: &str, customer_id: &str) -> Result<Order, OrderError>;

    /// Loads the order, applies `update` and persists the result atomically.
    /// Nothing is written when `update` fails.
    async fn update(&self, order_id: &str, customer_id: &str, update: UpdateFn) -> Result<Order, OrderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_order_needs_customer_and_items() {
        let items = vec![Item {
            product_id: "p1".into(),
            quantity: 1,
            price_id: "price_p1".into(),
        }];

        assert!(matches!(new_pending_order(" ", items.clone()), Err(OrderError::Validation(_))));
        assert!(matches!(new_pending_order("c1", vec![]), Err(OrderError::Validation(_))));

        let order = new_pending_order("c1", items).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.payment_link.is_empty());
        assert!(!order.id.is_empty());
    }
}
