use async_trait::async_trait;
use shared::Order;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::{OrderError, OrderRepository, UpdateFn};

#[derive(Default)]
pub struct InMemoryOrderRepository {
    store: Mutex<HashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Order>> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn not_found(order_id: &str, customer_id: &str) -> OrderError {
    OrderError::NotFound {
        order_id: order_id.to_string(),
        customer_id: customer_id.to_string(),
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        self.lock().insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get(&self, order_id: &str, customer_id: &str) -> Result<Order, OrderError> {
        self.lock()
            .get(order_id)
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .ok_or_else(|| not_found(order_id, customer_id))
    }

    async fn update(&self, order_id: &str, customer_id: &str, update: UpdateFn) -> Result<Order, OrderError> {
        let mut store = self.lock();
        let mut order = store
            .get(order_id)
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .ok_or_else(|| not_found(order_id, customer_id))?;

        update(&mut order)?;
        store.insert(order.id.clone(), order.clone());
        Ok(order)
    }
}
