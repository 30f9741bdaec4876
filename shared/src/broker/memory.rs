use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BrokerError, Consumer, Delivery, Envelope, EventHandler, Outcome, Publisher, Routing, Subscription};

/// Process-local broker with AMQP semantics: direct routes create and fill
/// the named queue, fan-out routes copy into every bound queue and drop the
/// message when nothing is bound. The dead-letter queue is bound from the
/// start.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Envelope>>,
    bindings: HashMap<String, Vec<String>>,
    unavailable: bool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        let broker = Self {
            state: Arc::default(),
        };
        broker.declare(&Subscription::dead_letter());
        broker
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // A poisoned lock only means a test panicked mid-publish.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Declares the subscription's queue and binds it to its exchange.
    pub fn declare(&self, subscription: &Subscription) {
        let mut state = self.state();
        state.queues.entry(subscription.queue.clone()).or_default();
        if let Some(exchange) = &subscription.exchange {
            let bound = state.bindings.entry(exchange.clone()).or_default();
            if !bound.contains(&subscription.queue) {
                bound.push(subscription.queue.clone());
            }
        }
    }

    /// Makes every publish fail, to exercise broker outages.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn pop(&self, queue: &str) -> Option<Delivery> {
        self.state()
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
            .map(|envelope| Delivery::new(queue, envelope))
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn messages(&self, queue: &str) -> Vec<Envelope> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Feeds the consumer until its queue is empty, including messages the
    /// consumer re-enqueues while retrying.
    pub async fn drain<H: EventHandler>(&self, consumer: &Consumer<H>) -> Result<Vec<Outcome>, BrokerError> {
        let mut outcomes = Vec::new();
        while let Some(delivery) = self.pop(consumer.queue()) {
            outcomes.push(consumer.process(delivery).await?);
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, routing: &Routing, envelope: Envelope) -> Result<(), BrokerError> {
        let mut state = self.state();
        if state.unavailable {
            return Err(BrokerError::Publish {
                destination: routing.destination().to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        match routing {
            Routing::Direct { queue } => {
                state.queues.entry(queue.clone()).or_default().push_back(envelope);
            }
            Routing::FanOut { exchange } => {
                let bound = state.bindings.get(exchange).cloned().unwrap_or_default();
                for queue in bound {
                    state.queues.entry(queue).or_default().push_back(envelope.clone());
                }
            }
        }
        Ok(())
    }
}
