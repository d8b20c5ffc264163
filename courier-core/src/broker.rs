use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::{BorrowedMessage, Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use std::sync::Arc;
use std::time::Duration;
use tracing;

use crate::config::RedpandaConfig;
use crate::error::CourierError;
use crate::topology::{Category, QueueSpec, Topology};

pub type RedpandaProducer = Arc<FutureProducer>;

pub const ROUTING_KEY_HEADER: &str = "x-routing-key";
pub const DEATH_REASON_HEADER: &str = "x-death-reason";
pub const ORIGINAL_ROUTING_KEY_HEADER: &str = "x-original-routing-key";

fn build_client_config(config: &RedpandaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("metadata.request.timeout.ms", "30000")
        .set("socket.timeout.ms", "30000")
        .set("socket.keepalive.enable", "true")
        .set("broker.address.family", "v4");

    if let Ok(ssl_enabled) = std::env::var("REDPANDA_SSL_ENABLED") {
        if ssl_enabled == "true" || ssl_enabled == "1" {
            tracing::info!("SSL/TLS enabled for Redpanda connection");
            client_config.set("security.protocol", "ssl");

            if let Ok(ca_location) = std::env::var("REDPANDA_SSL_CA_LOCATION") {
                client_config.set("ssl.ca.location", &ca_location);
            }
            if let Ok(cert_location) = std::env::var("REDPANDA_SSL_CERT_LOCATION") {
                client_config.set("ssl.certificate.location", &cert_location);
            }
            if let Ok(key_location) = std::env::var("REDPANDA_SSL_KEY_LOCATION") {
                client_config.set("ssl.key.location", &key_location);
            }
        }
    }

    client_config
}

pub fn create_producer(config: &RedpandaConfig) -> Result<RedpandaProducer> {
    tracing::info!(brokers = %config.brokers, "Creating Redpanda producer");

    let producer: FutureProducer = build_client_config(config)
        .set("message.timeout.ms", "5000")
        .set("acks", "all")
        .set("retries", "3")
        .create()
        .map_err(|e| {
            tracing::error!("Failed to create Redpanda producer for {}: {}", config.brokers, e);
            anyhow!("Failed to create Redpanda producer: {}", e)
        })?;

    Ok(Arc::new(producer))
}

/// Creates a consumer with auto-commit disabled; callers commit after handling.
pub fn create_consumer(config: &RedpandaConfig, group_id: &str) -> Result<StreamConsumer> {
    tracing::info!(brokers = %config.brokers, group = group_id, "Creating Redpanda consumer");

    build_client_config(config)
        .set("group.id", group_id)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "30000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .map_err(|e| {
            tracing::error!("Failed to create Redpanda consumer (group {}): {}", group_id, e);
            anyhow!("Failed to create Redpanda consumer: {}", e)
        })
}

/// Creates every topic of the queue topology. Existing topics are left alone.
pub async fn provision_topics(config: &RedpandaConfig) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = build_client_config(config)
        .create()
        .map_err(|e| anyhow!("Failed to create Redpanda admin client: {}", e))?;

    let names = Topology::topics();
    let new_topics: Vec<NewTopic<'_>> = names
        .iter()
        .map(|name| {
            NewTopic::new(
                name,
                config.topic_partitions,
                TopicReplication::Fixed(config.topic_replication),
            )
        })
        .collect();

    let results = admin
        .create_topics(&new_topics, &AdminOptions::new())
        .await
        .map_err(|e| anyhow!("Failed to provision topics: {}", e))?;

    for result in results {
        match result {
            Ok(topic) => tracing::info!("Created topic {}", topic),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                tracing::debug!("Topic {} already exists", topic)
            }
            Err((topic, code)) => return Err(anyhow!("Failed to create topic {}: {}", topic, code)),
        }
    }

    Ok(())
}

pub async fn produce_message(
    producer: &FutureProducer,
    topic: &str,
    key: Option<&str>,
    payload: &[u8],
    headers: OwnedHeaders,
) -> std::result::Result<(), CourierError> {
    let mut record = FutureRecord::to(topic).payload(payload).headers(headers);
    if let Some(k) = key {
        record = record.key(k);
    }

    match producer.send(record, Duration::from_secs(5)).await {
        Ok((partition, offset)) => {
            tracing::debug!(
                "Message delivered to topic {} partition {} offset {}",
                topic,
                partition,
                offset
            );
            Ok(())
        }
        Err((e, _)) => {
            tracing::error!("Failed to deliver message to topic {}: {:?}", topic, e);
            Err(CourierError::Broker(format!("delivery to {} failed: {}", topic, e)))
        }
    }
}

/// Publishes onto the topology: `(exchange, routing_key)` pairs resolve to topics.
#[derive(Clone)]
pub struct Publisher {
    producer: RedpandaProducer,
}

impl Publisher {
    pub fn new(producer: RedpandaProducer) -> Self {
        Self { producer }
    }

    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> std::result::Result<(), CourierError> {
        let route = Topology::route(exchange, routing_key).ok_or_else(|| {
            CourierError::Broker(format!("no binding for {} / {}", exchange, routing_key))
        })?;
        let headers = OwnedHeaders::new().insert(Header {
            key: ROUTING_KEY_HEADER,
            value: Some(routing_key),
        });
        produce_message(&self.producer, &route.topic(), key, payload, headers).await
    }

    /// Publishes to the work queue of a category through its exchange.
    pub async fn publish_to(
        &self,
        category: Category,
        key: Option<&str>,
        payload: &[u8],
    ) -> std::result::Result<(), CourierError> {
        let spec = Topology::queue(category);
        self.publish(spec.exchange, spec.routing_key, key, payload).await
    }

    async fn dead_letter(
        &self,
        spec: &QueueSpec,
        key: Option<&str>,
        payload: &[u8],
        reason: &str,
        original_key: &str,
    ) -> std::result::Result<(), CourierError> {
        let dlq_key = spec.dead_letter_routing_key();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: ROUTING_KEY_HEADER,
                value: Some(dlq_key.as_str()),
            })
            .insert(Header {
                key: DEATH_REASON_HEADER,
                value: Some(reason),
            })
            .insert(Header {
                key: ORIGINAL_ROUTING_KEY_HEADER,
                value: Some(original_key),
            });
        produce_message(&self.producer, &spec.dead_letter_queue(), key, payload, headers).await
    }
}

/// Handles one message body from a work queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

/// True when a message stamped at `timestamp_ms` outlived the queue TTL.
pub fn is_expired(timestamp_ms: Option<i64>, now_ms: i64, ttl: Duration) -> bool {
    match timestamp_ms {
        Some(ts) => now_ms.saturating_sub(ts) > ttl.as_millis() as i64,
        None => false,
    }
}

/// Consumes a work queue with TTL expiry, dead-lettering and manual commits.
pub struct QueueConsumer {
    spec: &'static QueueSpec,
    consumer: StreamConsumer,
    publisher: Publisher,
}

impl QueueConsumer {
    pub fn new(config: &RedpandaConfig, category: Category, publisher: Publisher) -> Result<Self> {
        let spec = Topology::queue(category);
        let group = format!("{}.{}", config.consumer_group, spec.queue);
        let consumer = create_consumer(config, &group)?;
        consumer.subscribe(&[spec.queue])?;
        tracing::info!("Subscribed to queue {}", spec.queue);

        Ok(Self {
            spec,
            consumer,
            publisher,
        })
    }

    pub async fn run<H: MessageHandler>(&self, handler: &H) -> Result<()> {
        let mut error_count = 0u32;
        let mut last_error_log = std::time::Instant::now();

        loop {
            match self.consumer.recv().await {
                Ok(message) => {
                    error_count = 0;
                    if let Err(e) = self.process(&message, handler).await {
                        // Offset stays uncommitted; the message is redelivered after a rebalance or restart.
                        tracing::error!("Failed to settle message on {}: {}", self.spec.queue, e);
                        continue;
                    }
                    if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!("Failed to commit offset on {}: {}", self.spec.queue, e);
                    }
                }
                Err(e) => {
                    error_count += 1;
                    if last_error_log.elapsed().as_secs() >= 30 {
                        tracing::warn!(
                            "Error receiving from {} (error count: {}): {}",
                            self.spec.queue,
                            error_count,
                            e
                        );
                        last_error_log = std::time::Instant::now();
                    }
                    let backoff = Duration::from_secs(1 << error_count.min(5)).min(Duration::from_secs(30));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn process<H: MessageHandler>(
        &self,
        message: &BorrowedMessage<'_>,
        handler: &H,
    ) -> std::result::Result<(), CourierError> {
        let payload = message.payload().unwrap_or_default();
        let key = message.key().and_then(|k| std::str::from_utf8(k).ok());
        let routing_key = routing_key_of(message).unwrap_or_else(|| self.spec.routing_key.to_string());

        if is_expired(message.timestamp().to_millis(), Utc::now().timestamp_millis(), self.spec.ttl) {
            tracing::warn!("Message on {} outlived its TTL, dead-lettering", self.spec.queue);
            return self
                .publisher
                .dead_letter(self.spec, key, payload, "expired", &routing_key)
                .await;
        }

        match handler.handle(payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Handler rejected message on {}: {}", self.spec.queue, e);
                self.publisher
                    .dead_letter(self.spec, key, payload, "rejected", &routing_key)
                    .await
            }
        }
    }
}

fn routing_key_of(message: &BorrowedMessage<'_>) -> Option<String> {
    let headers = message.headers()?;
    headers
        .iter()
        .find(|h| h.key == ROUTING_KEY_HEADER)
        .and_then(|h| h.value)
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_past_ttl_expire() {
        let ttl = Duration::from_secs(600);
        let now = 1_700_000_000_000;
        assert!(!is_expired(Some(now - 600_000), now, ttl));
        assert!(is_expired(Some(now - 600_001), now, ttl));
    }

    #[test]
    fn messages_without_timestamp_never_expire() {
        assert!(!is_expired(None, 1_700_000_000_000, Duration::from_secs(1)));
    }
}
