//! At-least-once dispatch publisher (component D): hashes `external_user_id`
//! to a partition via the Kafka default partitioner and publishes through
//! `rdkafka`, with bounded retries and dead-letter routing on exhaustion.

pub mod kafka_publisher;
pub mod mock_publisher;
pub mod partitioner;
pub mod publisher;

pub use kafka_publisher::KafkaDispatchPublisher;
pub use mock_publisher::MockDispatchPublisher;
pub use partitioner::{murmur2, partition_for};
pub use publisher::{Delivered, DispatchPublisher, Headers};
