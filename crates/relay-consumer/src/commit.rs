//! Per-partition commit tracking (§4.6 "Bundle per-partition commit"):
//! offsets are marked ready by acks fired from the sequencer hand-off, and
//! the committable offset is the highest one whose predecessors have *all*
//! acked too — never a gap.

use std::collections::BTreeSet;

use parking_lot::Mutex;

#[derive(Default)]
struct State {
    acked: BTreeSet<i64>,
    next_to_commit: i64,
}

/// Tracks acked offsets for one partition and exposes the highest
/// contiguous offset ready to commit (§8 "No offset gap in commits").
pub struct CommitTracker {
    state: Mutex<State>,
}

impl CommitTracker {
    pub fn new(start_offset: i64) -> Self {
        Self {
            state: Mutex::new(State { acked: BTreeSet::new(), next_to_commit: start_offset }),
        }
    }

    /// Mark `offset` acked. Safe to call more than once for the same offset
    /// (e.g. a duplicate ack on a re-delivered record).
    pub fn ack(&self, offset: i64) {
        let mut state = self.state.lock();
        if offset < state.next_to_commit {
            return;
        }
        state.acked.insert(offset);
    }

    /// Advance `next_to_commit` past every contiguous acked offset and
    /// return the new value — the offset the log client should commit as
    /// "next to read" if it differs from what was last committed.
    pub fn advance(&self) -> i64 {
        let mut state = self.state.lock();
        loop {
            let next = state.next_to_commit;
            if state.acked.remove(&next) {
                state.next_to_commit = next + 1;
            } else {
                break;
            }
        }
        state.next_to_commit
    }

    pub fn committable_offset(&self) -> i64 {
        self.state.lock().next_to_commit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_through_contiguous_acks() {
        let tracker = CommitTracker::new(100);
        tracker.ack(102);
        tracker.ack(100);
        assert_eq!(tracker.advance(), 101, "101 is still missing, commit must not skip it");

        tracker.ack(101);
        assert_eq!(tracker.advance(), 103);
    }

    #[test]
    fn out_of_order_acks_never_produce_a_gap() {
        let tracker = CommitTracker::new(0);
        for offset in [3, 1, 0, 4, 2] {
            tracker.ack(offset);
        }
        assert_eq!(tracker.advance(), 5);
    }

    #[test]
    fn ack_below_already_committed_offset_is_ignored() {
        let tracker = CommitTracker::new(10);
        tracker.ack(9);
        assert_eq!(tracker.advance(), 10);
    }
}
