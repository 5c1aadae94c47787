//! Process readiness, surfaced by the admin HTTP surface's `/readyz`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared readiness flags. Cloned cheaply (it's an `Arc` internally) and
/// updated independently by the leader driver and the consumer runtime;
/// `/readyz` reports ready only once both are true.
#[derive(Clone, Default)]
pub struct Readiness {
    inner: Arc<Flags>,
}

#[derive(Default)]
struct Flags {
    leader_initialized: AtomicBool,
    consumer_initialized: AtomicBool,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_leader_initialized(&self) {
        self.inner.leader_initialized.store(true, Ordering::Release);
    }

    pub fn mark_consumer_initialized(&self) {
        self.inner.consumer_initialized.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.leader_ready() && self.consumer_ready()
    }

    pub fn leader_ready(&self) -> bool {
        self.inner.leader_initialized.load(Ordering::Acquire)
    }

    pub fn consumer_ready(&self) -> bool {
        self.inner.consumer_initialized.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_only_once_both_flags_set() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
        readiness.mark_leader_initialized();
        assert!(!readiness.is_ready());
        readiness.mark_consumer_initialized();
        assert!(readiness.is_ready());
    }
}
