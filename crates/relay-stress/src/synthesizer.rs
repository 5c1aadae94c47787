//! Batch synthesizer (§4.8): on each trigger, produces one record per key in
//! the fixed key-set and publishes it through the normal dispatch publisher
//! under test, exactly as the raw-callback pipeline would for a real vendor
//! payload.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use relay_core::CoreError;
use relay_dispatch::DispatchPublisher;
use relay_vendor::{MessageOrigin, Payload, UserMessage};

const PAYLOAD_WORD_COUNT: usize = 8;

/// Synthesizes one `UserMessage` per key and publishes it via the configured
/// dispatch publisher. Per-key `msg_id` counters start at 1 and increase by
/// one on every batch, independent of how many batches have run.
pub struct BatchSynthesizer {
    keys: Vec<String>,
    next_msg_id: DashMap<String, u64>,
    publisher: Arc<dyn DispatchPublisher>,
    open_kf_id: String,
}

/// Outcome of one triggered batch: how many records were accepted by the
/// publisher versus how many failed after retry/DLQ exhaustion.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOutcome {
    pub published: usize,
    pub failed: usize,
}

impl BatchSynthesizer {
    pub fn new(keys: Vec<String>, publisher: Arc<dyn DispatchPublisher>, open_kf_id: impl Into<String>) -> Self {
        Self {
            keys,
            next_msg_id: DashMap::new(),
            publisher,
            open_kf_id: open_kf_id.into(),
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Produce and publish one batch: one record per key.
    pub async fn trigger_batch(&self) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for key in &self.keys {
            let msg_id = self.next_msg_id_for(key);
            let message = self.synthesize(key, msg_id);
            let payload = match serde_json::to_vec(&message) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!(key, error = %err, "failed to serialize synthesized message");
                    outcome.failed += 1;
                    continue;
                }
            };

            match self.publisher.publish(key, &payload, Vec::new()).await {
                Ok(delivered) => {
                    tracing::debug!(key, msg_id, partition = delivered.partition, offset = delivered.offset, "stress record published");
                    outcome.published += 1;
                }
                Err(err) => {
                    self.on_publish_failure(key, err);
                    outcome.failed += 1;
                }
            }
        }

        metrics::counter!("relay_stress_batches_total").increment(1);
        metrics::counter!("relay_stress_records_published_total").increment(outcome.published as u64);
        if outcome.failed > 0 {
            metrics::counter!("relay_stress_records_failed_total").increment(outcome.failed as u64);
        }

        outcome
    }

    fn next_msg_id_for(&self, key: &str) -> u64 {
        let mut counter = self.next_msg_id.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn on_publish_failure(&self, key: &str, err: CoreError) {
        tracing::warn!(key, error = %err, "stress batch record failed to publish");
    }

    fn synthesize(&self, key: &str, msg_id: u64) -> UserMessage {
        let send_time = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        UserMessage {
            msg_id: msg_id.to_string(),
            external_user_id: key.to_string(),
            open_kf_id: self.open_kf_id.clone(),
            send_time,
            origin: MessageOrigin::Customer,
            payload: Payload::Text { content: random_text() },
        }
    }
}

fn random_text() -> String {
    let mut rng = rand::thread_rng();
    (0..PAYLOAD_WORD_COUNT)
        .map(|_| {
            let len = rng.gen_range(3..=9);
            (&mut rng).sample_iter(&Alphanumeric).take(len).map(char::from).collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_dispatch::MockDispatchPublisher;

    #[tokio::test]
    async fn each_batch_advances_every_key_msg_id_by_one() {
        let publisher = Arc::new(MockDispatchPublisher::new(4));
        let keys = vec!["user-a".to_string(), "user-b".to_string()];
        let synthesizer = BatchSynthesizer::new(keys, publisher.clone(), "kf-1");

        synthesizer.trigger_batch().await;
        synthesizer.trigger_batch().await;

        let records = publisher.records();
        let user_a_ids: Vec<_> = records
            .iter()
            .filter(|r| r.key == "user-a")
            .map(|r| {
                let msg: UserMessage = serde_json::from_slice(&r.payload).unwrap();
                msg.msg_id
            })
            .collect();
        assert_eq!(user_a_ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn publish_failure_is_counted_without_stopping_the_batch() {
        let publisher = Arc::new(MockDispatchPublisher::new(4));
        publisher.fail_next_calls(1);
        let keys = vec!["user-a".to_string(), "user-b".to_string()];
        let synthesizer = BatchSynthesizer::new(keys, publisher.clone(), "kf-1");

        let outcome = synthesizer.trigger_batch().await;
        assert_eq!(outcome.published, 1);
        assert_eq!(outcome.failed, 1);
    }
}
