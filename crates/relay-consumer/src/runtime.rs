//! Consumer runtime (component F, §4.6): subscribes to the dispatch topic,
//! routes polled records into per-partition sequencers, drives rebalance
//! lifecycle, and commits the highest contiguous acked offset per partition.
//!
//! Grounded on the corpus's `ConsumerContext`/rebalance-hook pattern
//! (`kafka_consumer::CustomContext`): rebalance callbacks fire synchronously
//! on librdkafka's internal thread, so they only forward the event over an
//! unbounded channel; all the actual sequencer lifecycle work happens on the
//! async poll-loop task that drains that channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use relay_core::error::codes;
use relay_core::CoreError;
use relay_dispatch::DispatchPublisher;
use relay_vendor::UserMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commit::CommitTracker;
use crate::sequencer::{AckFn, DrainOutcome, GlobalInflight, PartitionSequencer};
use crate::router::UserRouter;

const SEQUENCER_WAIT_ATTEMPTS: u32 = 100;
const SEQUENCER_WAIT_INTERVAL: Duration = Duration::from_millis(10);
const COMMIT_INTERVAL: Duration = Duration::from_secs(5);
const COMMIT_BATCH_SIZE: u64 = 500;

#[derive(Debug, Clone)]
enum RebalanceEvent {
    Assigned(Vec<(String, i32)>),
    Revoked(Vec<(String, i32)>),
}

struct RuntimeContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl ClientContext for RuntimeContext {}

impl ConsumerContext for RuntimeContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        tracing::info!(?rebalance, "consumer rebalance starting");
        metrics::counter!("relay_consumer_rebalances_total").increment(1);
        let event = match rebalance {
            Rebalance::Revoke(tpl) => Some(RebalanceEvent::Revoked(topic_partitions(tpl))),
            _ => None,
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance) {
        tracing::info!(?rebalance, "consumer rebalance complete");
        let event = match rebalance {
            Rebalance::Assign(tpl) => Some(RebalanceEvent::Assigned(topic_partitions(tpl))),
            _ => None,
        };
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}

fn topic_partitions(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements().iter().map(|e| (e.topic().to_string(), e.partition())).collect()
}

type RuntimeConsumer = StreamConsumer<RuntimeContext>;

pub struct ConsumerRuntimeConfig {
    pub brokers: String,
    pub group_id: String,
    pub client_id: String,
    pub topics: Vec<String>,
    pub max_inflight_per_partition: usize,
    pub max_inflight_global: usize,
}

/// One assigned partition's live state: its sequencer plus the commit
/// tracker the committer task reads from.
struct PartitionState {
    sequencer: Arc<PartitionSequencer>,
    commit_tracker: Arc<CommitTracker>,
    paused: std::sync::atomic::AtomicBool,
}

pub struct ConsumerRuntime {
    config: ConsumerRuntimeConfig,
    consumer: Arc<RuntimeConsumer>,
    partitions: DashMap<(String, i32), Arc<PartitionState>>,
    key_partitions: DashMap<String, i32>,
    router: Arc<dyn UserRouter>,
    dlq: Arc<dyn DispatchPublisher>,
    dlq_topic: String,
    global: Arc<GlobalInflight>,
    cancel: CancellationToken,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<RebalanceEvent>>>,
    acked_since_commit: AtomicI64,
}

impl ConsumerRuntime {
    pub fn new(
        config: ConsumerRuntimeConfig,
        router: Arc<dyn UserRouter>,
        dlq: Arc<dyn DispatchPublisher>,
        dlq_topic: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, CoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = RuntimeContext { events: tx };

        let consumer: RuntimeConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("client.id", &config.client_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "10000")
            .create_with_context(context)
            .map_err(|err| CoreError::transport(codes::CONSUMER_FATAL, err))?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|err| CoreError::transport(codes::CONSUMER_FATAL, err))?;

        let global = GlobalInflight::new(config.max_inflight_global);

        Ok(Arc::new(Self {
            config,
            consumer: Arc::new(consumer),
            partitions: DashMap::new(),
            key_partitions: DashMap::new(),
            router,
            dlq,
            dlq_topic: dlq_topic.into(),
            global,
            cancel,
            events_rx: parking_lot::Mutex::new(Some(rx)),
            acked_since_commit: AtomicI64::new(0),
        }))
    }

    /// Drive the poll loop until cancellation. Intended to be spawned as its
    /// own task (§5 "Consumer polling runs on one task per consumer
    /// client").
    pub async fn run(self: &Arc<Self>) {
        let mut events_rx = self.events_rx.lock().take().expect("run() called more than once");
        let mut commit_ticker = tokio::time::interval(COMMIT_INTERVAL);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("consumer runtime cancelled, committing current offsets and exiting");
                    self.commit_all(true).await;
                    return;
                }
                Some(event) = events_rx.recv() => {
                    self.handle_rebalance_event(event).await;
                }
                _ = commit_ticker.tick() => {
                    self.commit_all(false).await;
                }
                recv_result = self.consumer.recv() => {
                    match recv_result {
                        Ok(message) => self.handle_message(message).await,
                        Err(err) => {
                            tracing::error!(error = %err, code = codes::CONSUMER_FATAL, "fatal log-client error, exiting consumer loop");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_rebalance_event(self: &Arc<Self>, event: RebalanceEvent) {
        match event {
            RebalanceEvent::Assigned(tps) => {
                for (topic, partition) in tps {
                    self.install_sequencer(topic, partition).await;
                }
            }
            RebalanceEvent::Revoked(tps) => {
                for (topic, partition) in tps {
                    if let Some((_, state)) = self.partitions.remove(&(topic, partition)) {
                        state.sequencer.drain_on_revoke();
                        metrics::counter!("relay_consumer_partitions_revoked_total").increment(1);
                    }
                }
            }
        }
    }

    /// Resolve `start_offset` per §4.5 precedence: committed offset, then
    /// low watermark, then (for the lazy-install race, §4.6) the first
    /// observed message's offset supplied by the caller.
    fn resolve_start_offset(&self, topic: &str, partition: i32, fallback: Option<i64>) -> i64 {
        let mut tpl = TopicPartitionList::new();
        let _ = tpl.add_partition(topic, partition);

        if let Ok(committed) = self.consumer.committed_offsets(tpl.clone(), Duration::from_secs(5)) {
            if let Some(element) = committed.elements().iter().find(|e| e.partition() == partition) {
                if let Offset::Offset(offset) = element.offset() {
                    return offset;
                }
            }
        }

        if let Ok((low, _high)) = self.consumer.fetch_watermarks(topic, partition, Duration::from_secs(5)) {
            return low;
        }

        fallback.unwrap_or(0)
    }

    async fn install_sequencer(self: &Arc<Self>, topic: String, partition: i32) {
        let start_offset = self.resolve_start_offset(&topic, partition, None);
        let commit_tracker = Arc::new(CommitTracker::new(start_offset));
        let sequencer = Arc::new(PartitionSequencer::new(
            topic.clone(),
            partition,
            start_offset,
            self.config.max_inflight_per_partition,
            Arc::clone(&self.global),
            Arc::clone(&self.router),
        ));

        self.partitions.insert(
            (topic, partition),
            Arc::new(PartitionState {
                sequencer,
                commit_tracker,
                paused: std::sync::atomic::AtomicBool::new(false),
            }),
        );
    }

    /// Lazily install a sequencer if the assignment hook hasn't fired yet
    /// (§4.6 "race between first record and the assignment hook"): a
    /// bounded spin wait, then install using the same resolution rule,
    /// seeded with this record's own offset as the last-resort fallback.
    async fn sequencer_for(self: &Arc<Self>, topic: &str, partition: i32, first_seen_offset: i64) -> Arc<PartitionState> {
        for _ in 0..SEQUENCER_WAIT_ATTEMPTS {
            if let Some(state) = self.partitions.get(&(topic.to_string(), partition)) {
                return Arc::clone(&state);
            }
            tokio::time::sleep(SEQUENCER_WAIT_INTERVAL).await;
        }

        tracing::warn!(topic, partition, "installing sequencer lazily after assignment-hook race");
        let start_offset = self.resolve_start_offset(topic, partition, Some(first_seen_offset));
        let commit_tracker = Arc::new(CommitTracker::new(start_offset));
        let sequencer = Arc::new(PartitionSequencer::new(
            topic.to_string(),
            partition,
            start_offset,
            self.config.max_inflight_per_partition,
            Arc::clone(&self.global),
            Arc::clone(&self.router),
        ));
        let state = Arc::new(PartitionState {
            sequencer,
            commit_tracker,
            paused: std::sync::atomic::AtomicBool::new(false),
        });
        self.partitions.insert((topic.to_string(), partition), Arc::clone(&state));
        state
    }

    async fn handle_message(self: &Arc<Self>, message: BorrowedMessage<'_>) {
        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();

        let key = message.key().map(|k| String::from_utf8_lossy(k).into_owned());
        let payload = message.payload().map(|p| p.to_vec());

        let (Some(key), Some(payload)) = (key, payload) else {
            self.dead_letter(&topic, partition, offset, key, payload, "missing key or payload").await;
            return;
        };

        let decoded: Result<UserMessage, _> = serde_json::from_slice(&payload);
        let user_message = match decoded {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(topic = %topic, partition, offset, error = %err, code = codes::RECORD_DECODE, "log record decode failure, dead-lettering");
                self.dead_letter(&topic, partition, offset, Some(key), Some(payload), "decode failure").await;
                return;
            }
        };

        self.detect_partition_drift(&key, partition);

        let state = self.sequencer_for(&topic, partition, offset).await;
        let commit_tracker = Arc::clone(&state.commit_tracker);
        let ack: AckFn = Arc::new(move |acked_offset| commit_tracker.ack(acked_offset));

        let outcome = state.sequencer.push(offset, key, user_message, ack);
        if let DrainOutcome::Backpressured = outcome {
            self.pause_partition(&topic, partition, &state);
        }

        self.acked_since_commit.fetch_add(1, Ordering::Relaxed);
        if self.acked_since_commit.load(Ordering::Relaxed) as u64 >= COMMIT_BATCH_SIZE {
            self.acked_since_commit.store(0, Ordering::Relaxed);
            self.commit_all(false).await;
        }
    }

    /// §4.6 "Detect key-to-partition drift": a key observed on more than one
    /// partition means ordering guarantees no longer hold for it.
    fn detect_partition_drift(&self, key: &str, partition: i32) {
        if let Some(previous) = self.key_partitions.get(key) {
            if *previous != partition {
                tracing::error!(
                    key,
                    previous_partition = *previous,
                    observed_partition = partition,
                    "key-to-partition drift detected; ordering guarantee no longer holds for this key"
                );
                metrics::counter!("relay_consumer_partition_drift_total").increment(1);
            }
            return;
        }
        self.key_partitions.entry(key.to_string()).or_insert(partition);
    }

    fn pause_partition(&self, topic: &str, partition: i32, state: &PartitionState) {
        if state.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tpl = TopicPartitionList::new();
        let _ = tpl.add_partition(topic, partition);
        if let Err(err) = self.consumer.pause(&tpl) {
            tracing::warn!(topic, partition, error = %err, "failed to pause partition under backpressure");
        } else {
            tracing::debug!(topic, partition, "partition paused: mailbox at capacity");
            metrics::counter!("relay_consumer_pauses_total").increment(1);
        }
    }

    /// Resume any partition whose sequencer has drained below capacity.
    /// Called periodically alongside the commit ticker; cheap since it's
    /// just a capacity check per assigned partition.
    fn resume_drained_partitions(&self) {
        for entry in self.partitions.iter() {
            let ((topic, partition), state) = (entry.key().clone(), entry.value().clone());
            if state.paused.load(Ordering::SeqCst) {
                state.sequencer.retry_drain();
                if !state.sequencer.is_over_capacity() {
                    let mut tpl = TopicPartitionList::new();
                    let _ = tpl.add_partition(&topic, partition);
                    if self.consumer.resume(&tpl).is_ok() {
                        state.paused.store(false, Ordering::SeqCst);
                        tracing::debug!(topic = %topic, partition, "partition resumed after drain");
                    }
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        key: Option<String>,
        payload: Option<Vec<u8>>,
        reason: &str,
    ) {
        metrics::counter!("relay_consumer_dead_letters_total").increment(1);
        let key = key.unwrap_or_default();
        let payload = payload.unwrap_or_default();
        let headers = vec![
            ("original_topic".to_string(), topic.as_bytes().to_vec()),
            ("original_partition".to_string(), partition.to_string().into_bytes()),
            ("original_offset".to_string(), offset.to_string().into_bytes()),
            ("reason".to_string(), reason.as_bytes().to_vec()),
        ];
        if let Err(err) = self.dlq.publish(&key, &payload, headers).await {
            tracing::error!(topic, partition, offset, dlq_topic = %self.dlq_topic, error = %err, "failed to publish to dead-letter topic");
        }

        // ACK true regardless: the log service will not redeliver this
        // record (§7 "decode of log record": loses the record).
        if let Some(state) = self.partitions.get(&(topic.to_string(), partition)) {
            state.commit_tracker.ack(offset);
        }
    }

    /// Writes the highest contiguous acked offset per partition back to the
    /// log service, never an offset whose predecessors are still pending
    /// (§4.6, §8 "No offset gap in commits").
    async fn commit_all(&self, sync: bool) {
        self.resume_drained_partitions();

        let mut tpl = TopicPartitionList::new();
        let mut any = false;
        let snapshot: HashMap<(String, i32), i64> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().commit_tracker.advance()))
            .collect();

        for ((topic, partition), offset) in snapshot {
            if offset <= 0 {
                continue;
            }
            let _ = tpl.add_partition_offset(&topic, partition, Offset::Offset(offset));
            any = true;
        }

        if !any {
            return;
        }

        let mode = if sync { CommitMode::Sync } else { CommitMode::Async };
        if let Err(err) = self.consumer.commit(&tpl, mode) {
            tracing::warn!(error = %err, "partition offset commit failed");
        }
    }
}
