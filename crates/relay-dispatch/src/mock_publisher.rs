//! An in-process [`DispatchPublisher`] that captures every published record
//! instead of talking to a real broker, used by pipeline and consumer tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory};

use crate::partitioner::partition_for;
use crate::publisher::{Delivered, DispatchPublisher, Headers};

#[derive(Debug, Clone)]
pub struct CapturedRecord {
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub partition: i32,
    pub offset: i64,
}

/// Assigns strictly increasing per-partition offsets, just like a real log,
/// so sequencer tests can exercise real ordering semantics end to end.
pub struct MockDispatchPublisher {
    partition_count: i32,
    records: Mutex<Vec<CapturedRecord>>,
    next_offset: Mutex<Vec<i64>>,
    fail_next: Mutex<u32>,
}

impl MockDispatchPublisher {
    pub fn new(partition_count: i32) -> Self {
        Self {
            partition_count,
            records: Mutex::new(Vec::new()),
            next_offset: Mutex::new(vec![0; partition_count.max(0) as usize]),
            fail_next: Mutex::new(0),
        }
    }

    /// Make the next `count` publish calls fail with a transport error,
    /// to exercise the raw-callback pipeline's retry/dirty-shadow paths.
    pub fn fail_next_calls(&self, count: u32) {
        *self.fail_next.lock() = count;
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    pub fn records_for_key(&self, key: &str) -> Vec<CapturedRecord> {
        self.records.lock().iter().filter(|r| r.key == key).cloned().collect()
    }
}

#[async_trait]
impl DispatchPublisher for MockDispatchPublisher {
    async fn publish(&self, key: &str, payload: &[u8], headers: Headers) -> Result<Delivered, CoreError> {
        {
            let mut fail_next = self.fail_next.lock();
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(CoreError::new(
                    codes::DISPATCH_PUBLISH,
                    ErrorCategory::Transport,
                    "simulated publish failure",
                ));
            }
        }

        let partition = partition_for(key.as_bytes(), self.partition_count);
        let offset = {
            let mut offsets = self.next_offset.lock();
            let slot = &mut offsets[partition as usize];
            let offset = *slot;
            *slot += 1;
            offset
        };

        self.records.lock().push(CapturedRecord {
            key: key.to_string(),
            payload: payload.to_vec(),
            headers,
            partition,
            offset,
        });

        Ok(Delivered { partition, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assigns_strictly_increasing_offsets_per_partition() {
        let publisher = MockDispatchPublisher::new(4);
        let first = publisher.publish("user-1", b"a", Vec::new()).await.unwrap();
        let second = publisher.publish("user-1", b"b", Vec::new()).await.unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn simulated_failure_surfaces_transport_error() {
        let publisher = MockDispatchPublisher::new(1);
        publisher.fail_next_calls(1);
        let err = publisher.publish("user-1", b"a", Vec::new()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);

        let ok = publisher.publish("user-1", b"a", Vec::new()).await;
        assert!(ok.is_ok());
    }
}
