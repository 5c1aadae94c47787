//! The per-user processor actor (§3 "Processor", §4.7): owns a bounded
//! mailbox, runs the business transition in FIFO order, and exits after
//! `idle_timeout` of inactivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::mailbox::{EnqueueError, MailboxItem};
use crate::transition::BusinessTransition;

/// Handle kept in the pool map for one live processor. Cloning is cheap —
/// it's just the mailbox sender plus bookkeeping.
#[derive(Clone)]
pub struct ProcessorHandle {
    pub(crate) generation: u64,
    sender: mpsc::Sender<MailboxItem>,
    last_activity: Arc<Mutex<Instant>>,
    alive: Arc<AtomicBool>,
}

impl ProcessorHandle {
    /// Attempt to hand `item` off, returning the item back on failure so the
    /// caller can retry it against a freshly created processor.
    pub fn try_enqueue(&self, item: MailboxItem) -> Result<(), (EnqueueError, MailboxItem)> {
        match self.sender.try_send(item) {
            Ok(()) => {
                *self.last_activity.lock() = Instant::now();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(item)) => Err((EnqueueError::Full, item)),
            Err(mpsc::error::TrySendError::Closed(item)) => Err((EnqueueError::Closed, item)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }
}

/// Spawn a fresh processor for `external_user_id`. Returns the handle the
/// pool stores; the worker task runs until the mailbox closes or
/// `idle_timeout` elapses with no message.
pub fn spawn(
    external_user_id: String,
    generation: u64,
    mailbox_capacity: usize,
    idle_timeout: Duration,
    transition: Arc<dyn BusinessTransition>,
    on_idle_exit: impl FnOnce(&str, u64) + Send + 'static,
) -> ProcessorHandle {
    let (sender, mut receiver) = mpsc::channel::<MailboxItem>(mailbox_capacity.max(1));
    let alive = Arc::new(AtomicBool::new(true));
    let last_activity = Arc::new(Mutex::new(Instant::now()));

    let handle = ProcessorHandle {
        generation,
        sender,
        last_activity: Arc::clone(&last_activity),
        alive: Arc::clone(&alive),
    };

    tokio::spawn(async move {
        loop {
            match tokio::time::timeout(idle_timeout, receiver.recv()).await {
                Ok(Some(item)) => {
                    if let Err(err) = transition.handle(&external_user_id, &item.message).await {
                        tracing::warn!(
                            external_user_id = %external_user_id,
                            partition = item.partition,
                            offset = item.offset,
                            error = %err,
                            "business transition failed"
                        );
                    }
                }
                Ok(None) => {
                    tracing::debug!(external_user_id = %external_user_id, "processor mailbox closed, exiting");
                    break;
                }
                Err(_elapsed) => {
                    tracing::debug!(external_user_id = %external_user_id, "processor idle, exiting");
                    metrics::counter!("relay_processor_idle_evictions_total").increment(1);
                    break;
                }
            }
        }
        alive.store(false, Ordering::Release);
        on_idle_exit(&external_user_id, generation);
    });

    handle
}
