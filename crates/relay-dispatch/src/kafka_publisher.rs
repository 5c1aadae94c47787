//! The production [`DispatchPublisher`], backed by `rdkafka`'s
//! `FutureProducer`. Partitioning is computed explicitly via
//! [`crate::partitioner::partition_for`] rather than delegated to
//! librdkafka's internal partitioner, so the publisher and the stress
//! key-set generator (§4.8) agree bit-for-bit on where a key lands.
//!
//! Retries are bounded; exhaustion routes the record to the configured
//! dead-letter topic (unpartitioned — DLQ ordering is not a core guarantee).

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::headers::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory, RetryBudget};

use crate::partitioner::partition_for;
use crate::publisher::{Delivered, DispatchPublisher, Headers};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PUBLISH_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(100);

pub struct KafkaDispatchPublisher {
    producer: FutureProducer,
    topic: String,
    dlq_topic: String,
    partition_count: i32,
}

impl KafkaDispatchPublisher {
    pub fn new(
        brokers: &str,
        client_id: &str,
        topic: impl Into<String>,
        dlq_topic: impl Into<String>,
        partition_count: i32,
    ) -> Result<Self, CoreError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("message.timeout.ms", "30000")
            .set("acks", "all")
            .create()
            .map_err(|err| CoreError::transport(codes::DISPATCH_PUBLISH, err))?;

        Ok(Self {
            producer,
            topic: topic.into(),
            dlq_topic: dlq_topic.into(),
            partition_count,
        })
    }

    async fn send_once(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        partition: Option<i32>,
        headers: &Headers,
    ) -> Result<Delivered, CoreError> {
        let mut owned_headers = OwnedHeaders::new();
        for (name, value) in headers {
            owned_headers = owned_headers.insert(rdkafka::message::Header {
                key: name.as_str(),
                value: Some(value.as_slice()),
            });
        }

        let mut record = FutureRecord::to(topic).key(key).payload(payload).headers(owned_headers);
        if let Some(p) = partition {
            record = record.partition(p);
        }

        match self.producer.send(record, Timeout::After(SEND_TIMEOUT)).await {
            Ok((partition, offset)) => Ok(Delivered { partition, offset }),
            Err((err, _owned_message)) => Err(CoreError::transport(codes::DISPATCH_PUBLISH, err)),
        }
    }

    async fn route_to_dlq(&self, key: &str, payload: &[u8], headers: Headers) -> Result<Delivered, CoreError> {
        tracing::warn!(key, "dispatch publish exhausted retries, routing to dead-letter topic");
        metrics::counter!("relay_dispatch_dlq_total").increment(1);
        self.send_once(&self.dlq_topic, key, payload, None, &headers).await
    }
}

#[async_trait]
impl DispatchPublisher for KafkaDispatchPublisher {
    async fn publish(&self, key: &str, payload: &[u8], headers: Headers) -> Result<Delivered, CoreError> {
        let partition = partition_for(key.as_bytes(), self.partition_count);
        let mut budget = RetryBudget::new(MAX_PUBLISH_RETRIES);
        let seed = partition as u64;

        loop {
            match self
                .send_once(&self.topic, key, payload, Some(partition), &headers)
                .await
            {
                Ok(delivered) => return Ok(delivered),
                Err(err) if err.category() == ErrorCategory::Transport => match budget.next(RETRY_BASE, seed) {
                    Some(delay) => {
                        tracing::debug!(key, attempt = budget.attempts_spent(), "retrying dispatch publish");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    None => return self.route_to_dlq(key, payload, headers).await,
                },
                Err(err) => return Err(err),
            }
        }
    }
}
