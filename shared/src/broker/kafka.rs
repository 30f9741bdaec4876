use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Header, Headers as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{
    BrokerError, Consumer, Delivery, Envelope, EventHandler, Headers, Publisher, Routing, Subscription, DLQ, DLX,
    EVENT_ORDER_CREATED, EVENT_ORDER_PAID,
};

/// Kafka-backed broker. Every queue and exchange is a topic; a subscriber's
/// consumer group plays the role of its queue, and the topic named after
/// that queue receives the subscriber's retries.
pub struct KafkaBroker {
    brokers: String,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    declared: Mutex<HashSet<String>>,
}

impl KafkaBroker {
    pub fn connect(brokers: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()?;

        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .create()?;

        Ok(Self {
            brokers: brokers.to_string(),
            producer,
            admin,
            declared: Mutex::new(HashSet::new()),
        })
    }

    /// Declares the event exchanges plus the dead-letter exchange and queue.
    pub async fn declare_topology(&self) -> Result<(), BrokerError> {
        self.declare_topics(&[EVENT_ORDER_CREATED, EVENT_ORDER_PAID, DLX, DLQ]).await?;
        info!("Broker topology declared");
        Ok(())
    }

    async fn declare_topics(&self, names: &[&str]) -> Result<(), BrokerError> {
        let missing: Vec<&str> = {
            let declared = self.declared.lock().unwrap_or_else(|p| p.into_inner());
            names.iter().copied().filter(|n| !declared.contains(*n)).collect()
        };
        if missing.is_empty() {
            return Ok(());
        }

        let topics: Vec<NewTopic> = missing
            .iter()
            .map(|name| NewTopic::new(name, 1, TopicReplication::Fixed(1)))
            .collect();

        for result in self.admin.create_topics(&topics, &AdminOptions::new()).await? {
            match result {
                Ok(_) | Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((topic, code)) => {
                    return Err(BrokerError::Topology(format!("create topic {topic}: {code}")));
                }
            }
        }

        let mut declared = self.declared.lock().unwrap_or_else(|p| p.into_inner());
        declared.extend(missing.into_iter().map(str::to_string));
        Ok(())
    }

    /// Declares the subscriber's queue topic and returns a manual-commit
    /// consumer reading both the queue and, for fan-out, its exchange.
    pub async fn subscribe(&self, subscription: &Subscription) -> Result<StreamConsumer, BrokerError> {
        self.declare_topics(&[subscription.queue.as_str()]).await?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &subscription.queue)
            .set("bootstrap.servers", &self.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        let mut topics = vec![subscription.queue.as_str()];
        if let Some(exchange) = &subscription.exchange {
            topics.push(exchange.as_str());
        }
        consumer.subscribe(&topics)?;

        info!(queue = %subscription.queue, ?topics, "Subscribed");
        Ok(consumer)
    }
}

#[async_trait]
impl Publisher for KafkaBroker {
    async fn publish(&self, routing: &Routing, envelope: Envelope) -> Result<(), BrokerError> {
        let topic = routing.destination();
        if let Routing::Direct { queue } = routing {
            self.declare_topics(&[queue.as_str()]).await?;
        }

        let headers = envelope
            .headers
            .iter()
            .fold(OwnedHeaders::new_with_capacity(envelope.headers.len()), |acc, (key, value)| {
                acc.insert(Header {
                    key,
                    value: Some(value.as_str()),
                })
            });

        let record = FutureRecord::to(topic)
            .payload(envelope.body.as_slice())
            .key(topic)
            .headers(headers);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| BrokerError::Publish {
                destination: topic.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

fn delivery_from(queue: &str, m: &BorrowedMessage<'_>) -> Delivery {
    let mut headers = Headers::new();
    if let Some(raw) = m.headers() {
        for header in raw.iter() {
            if let Some(value) = header.value {
                headers.insert(header.key, String::from_utf8_lossy(value).into_owned());
            }
        }
    }

    Delivery {
        queue: queue.to_string(),
        headers,
        body: m.payload().unwrap_or_default().to_vec(),
    }
}

/// Consumes until the stream ends or a retry cannot be published. Offsets
/// are committed only after a delivery has been fully handled. Returning at
/// all is fatal for the owning service.
pub async fn run_consumer<H: EventHandler>(
    stream_consumer: StreamConsumer,
    consumer: &Consumer<H>,
) -> Result<(), BrokerError> {
    let mut message_stream = stream_consumer.stream();

    while let Some(message) = message_stream.next().await {
        match message {
            Ok(m) => {
                let delivery = delivery_from(consumer.queue(), &m);
                consumer.process(delivery).await?;
                if let Err(e) = stream_consumer.commit_message(&m, CommitMode::Async) {
                    error!("Error committing message: {}", e);
                }
            }
            Err(e) => error!("Error receiving message: {}", e),
        }
    }

    Err(BrokerError::ConsumerStopped(consumer.queue().to_string()))
}

/// Runs the consume loop on its own task. The task resolves only with the
/// reason the loop stopped; services treat that as fatal.
pub fn spawn_consumer<H: EventHandler + 'static>(
    stream_consumer: StreamConsumer,
    consumer: Consumer<H>,
) -> JoinHandle<BrokerError> {
    tokio::spawn(async move {
        match run_consumer(stream_consumer, &consumer).await {
            Ok(()) => BrokerError::ConsumerStopped(consumer.queue().to_string()),
            Err(e) => e,
        }
    })
}
