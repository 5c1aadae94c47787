//! Partition sequencer (component E, §4.5): the heart of the consumer.
//! One instance per assigned `(topic, partition)`. Re-orders records that
//! arrive out of offset order (Kafka polls within a partition in offset
//! order already, but §8 S5 exercises out-of-order `push` calls directly to
//! pin down the contract) and hands them to the user router strictly by
//! ascending offset.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use relay_processor::MailboxItem;
use relay_vendor::UserMessage;

use crate::router::UserRouter;

/// Ack for one offset. Partition commit tracking (§4.6) is the only
/// consumer; the same closure is reused for every record on a partition.
pub type AckFn = Arc<dyn Fn(i64) + Send + Sync>;

struct PendingEntry {
    item: MailboxItem,
    key: String,
    ack: AckFn,
    #[allow(dead_code)] // surfaced via polled_at() for stress-mode timeout enforcement
    polled_at: Instant,
}

/// Shared across every partition sequencer in one consumer runtime so the
/// global inflight cap (§4.5 "Bounds") is enforced symmetrically with the
/// per-partition one.
pub struct GlobalInflight {
    count: AtomicUsize,
    cap: usize,
}

impl GlobalInflight {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self { count: AtomicUsize::new(0), cap })
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_over_capacity(&self) -> bool {
        self.count() >= self.cap
    }
}

/// Result of a `push` or drain attempt, telling the consumer runtime's
/// poller whether this partition should keep polling or pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    Backpressured,
}

pub struct PartitionSequencer {
    topic: String,
    partition: i32,
    max_inflight: usize,
    global: Arc<GlobalInflight>,
    router: Arc<dyn UserRouter>,
    state: Mutex<State>,
}

struct State {
    next_expected_offset: i64,
    pending: BTreeMap<i64, PendingEntry>,
    inflight_count: usize,
}

impl PartitionSequencer {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        start_offset: i64,
        max_inflight: usize,
        global: Arc<GlobalInflight>,
        router: Arc<dyn UserRouter>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            max_inflight,
            global,
            router,
            state: Mutex::new(State {
                next_expected_offset: start_offset,
                pending: BTreeMap::new(),
                inflight_count: 0,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn next_expected_offset(&self) -> i64 {
        self.state.lock().next_expected_offset
    }

    pub fn inflight_count(&self) -> usize {
        self.state.lock().inflight_count
    }

    /// Whether the consumer runtime's poller should pause this partition:
    /// either this partition's own cap or the shared global cap is hit.
    pub fn is_over_capacity(&self) -> bool {
        self.inflight_count() >= self.max_inflight || self.global.is_over_capacity()
    }

    /// Push one polled record. `offset < next_expected_offset` is a
    /// re-delivery after a restart before commit (§4.5 step 1): ack
    /// immediately, do not re-dispatch. Otherwise queue and drain whatever
    /// is now contiguous.
    pub fn push(&self, offset: i64, key: String, message: UserMessage, ack: AckFn) -> DrainOutcome {
        let mut state = self.state.lock();

        if offset < state.next_expected_offset {
            tracing::debug!(
                topic = %self.topic,
                partition = self.partition,
                offset,
                "duplicate record below next_expected_offset, acking without redispatch"
            );
            ack(offset);
            return DrainOutcome::Drained;
        }

        state.pending.insert(
            offset,
            PendingEntry {
                item: MailboxItem { partition: self.partition, offset, message },
                key,
                ack,
                polled_at: Instant::now(),
            },
        );
        state.inflight_count += 1;
        self.global.count.fetch_add(1, Ordering::AcqRel);

        self.drain_locked(&mut state)
    }

    fn drain_locked(&self, state: &mut State) -> DrainOutcome {
        loop {
            let next = state.next_expected_offset;
            let Some(entry) = state.pending.remove(&next) else {
                return DrainOutcome::Drained;
            };

            match self.router.route(&entry.key, entry.item) {
                Ok(()) => {
                    (entry.ack)(next);
                    state.inflight_count -= 1;
                    self.global.count.fetch_sub(1, Ordering::AcqRel);
                    state.next_expected_offset += 1;
                    metrics::gauge!("relay_sequencer_inflight", "partition" => self.partition.to_string())
                        .set(state.inflight_count as f64);
                }
                Err((_err, item)) => {
                    state.pending.insert(
                        next,
                        PendingEntry {
                            item,
                            key: entry.key,
                            ack: entry.ack,
                            polled_at: entry.polled_at,
                        },
                    );
                    metrics::counter!("relay_sequencer_backpressure_total", "partition" => self.partition.to_string())
                        .increment(1);
                    return DrainOutcome::Backpressured;
                }
            }
        }
    }

    /// Re-attempt draining without pushing a new record — called after the
    /// consumer runtime observes the mailbox has drained and resumes the
    /// partition (§8 S6).
    pub fn retry_drain(&self) -> DrainOutcome {
        let mut state = self.state.lock();
        self.drain_locked(&mut state)
    }

    /// On `partition_revoked`/`partition_lost` (§4.5 "Assignment lifecycle"):
    /// every still-pending record has its ack fired with `true` so the log
    /// service redelivers it under the new assignment.
    pub fn drain_on_revoke(&self) {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        self.global.count.fetch_sub(pending.len(), Ordering::AcqRel);
        for (offset, entry) in pending {
            (entry.ack)(offset);
        }
        state.inflight_count = 0;
    }
}

impl PendingEntry {
    #[allow(dead_code)]
    fn polled_at(&self) -> Instant {
        self.polled_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PLMutex;
    use relay_vendor::{MessageOrigin, Payload};

    struct RecordingRouter {
        delivered: PLMutex<Vec<(String, i32, i64)>>,
        fail_next: PLMutex<usize>,
    }

    impl RecordingRouter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: PLMutex::new(Vec::new()),
                fail_next: PLMutex::new(0),
            })
        }
    }

    impl UserRouter for RecordingRouter {
        fn route(&self, external_user_id: &str, item: MailboxItem) -> Result<(), (relay_processor::EnqueueError, MailboxItem)> {
            let mut fail_next = self.fail_next.lock();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err((relay_processor::EnqueueError::Full, item));
            }
            self.delivered.lock().push((external_user_id.to_string(), item.partition, item.offset));
            Ok(())
        }
    }

    fn message(msg_id: &str) -> UserMessage {
        UserMessage {
            msg_id: msg_id.to_string(),
            external_user_id: "user-1".to_string(),
            open_kf_id: "kf".to_string(),
            send_time: 0,
            origin: MessageOrigin::Customer,
            payload: Payload::Text { content: "hi".to_string() },
        }
    }

    fn noop_ack(acked: Arc<PLMutex<Vec<i64>>>) -> AckFn {
        Arc::new(move |offset| acked.lock().push(offset))
    }

    #[test]
    fn out_of_order_push_drains_in_offset_order() {
        let router = RecordingRouter::new();
        let global = GlobalInflight::new(4096);
        let seq = PartitionSequencer::new("t", 0, 100, 256, global, router.clone());
        let acked = Arc::new(PLMutex::new(Vec::new()));

        seq.push(102, "user-1".into(), message("3"), noop_ack(acked.clone()));
        seq.push(100, "user-1".into(), message("1"), noop_ack(acked.clone()));
        seq.push(101, "user-1".into(), message("2"), noop_ack(acked.clone()));

        assert_eq!(seq.next_expected_offset(), 103);
        assert_eq!(*acked.lock(), vec![100, 101, 102]);
        let delivered = router.delivered.lock();
        assert_eq!(*delivered, vec![
            ("user-1".to_string(), 0, 100),
            ("user-1".to_string(), 0, 101),
            ("user-1".to_string(), 0, 102),
        ]);
    }

    #[test]
    fn duplicate_below_next_expected_is_acked_without_redispatch() {
        let router = RecordingRouter::new();
        let global = GlobalInflight::new(4096);
        let seq = PartitionSequencer::new("t", 0, 5, 256, global, router.clone());
        let acked = Arc::new(PLMutex::new(Vec::new()));

        seq.push(5, "user-1".into(), message("1"), noop_ack(acked.clone()));
        seq.push(4, "user-1".into(), message("0"), noop_ack(acked.clone()));

        assert_eq!(*acked.lock(), vec![5, 4]);
        assert_eq!(router.delivered.lock().len(), 1, "duplicate must not redispatch");
    }

    #[test]
    fn backpressure_stops_draining_and_resumes_after_retry() {
        let router = RecordingRouter::new();
        *router.fail_next.lock() = 1;
        let global = GlobalInflight::new(4096);
        let seq = PartitionSequencer::new("t", 0, 0, 256, global, router.clone());
        let acked = Arc::new(PLMutex::new(Vec::new()));

        let outcome = seq.push(0, "user-1".into(), message("1"), noop_ack(acked.clone()));
        assert_eq!(outcome, DrainOutcome::Backpressured);
        assert!(acked.lock().is_empty());

        let outcome = seq.retry_drain();
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(*acked.lock(), vec![0]);
    }

    #[test]
    fn revoke_acks_all_pending_without_dispatch() {
        let router = RecordingRouter::new();
        *router.fail_next.lock() = 10;
        let global = GlobalInflight::new(4096);
        let seq = PartitionSequencer::new("t", 0, 0, 256, global.clone(), router.clone());
        let acked = Arc::new(PLMutex::new(Vec::new()));

        seq.push(0, "user-1".into(), message("1"), noop_ack(acked.clone()));
        seq.push(1, "user-1".into(), message("2"), noop_ack(acked.clone()));
        assert_eq!(global.count(), 2);

        seq.drain_on_revoke();
        let mut values = acked.lock().clone();
        values.sort();
        assert_eq!(values, vec![0, 1]);
        assert_eq!(seq.inflight_count(), 0);
        assert_eq!(global.count(), 0, "revoke must release the shared inflight counter too");
    }
}
