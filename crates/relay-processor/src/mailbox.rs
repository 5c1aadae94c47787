//! The bounded per-processor mailbox (§3 "Processor", §4.7).
//!
//! Ack semantics are decided in §9: the dispatch-topic ACK fires at
//! mailbox-accepted time, not after the business transition completes. So
//! `MailboxItem` carries only what the processor needs to run the
//! transition — the caller (the consumer runtime's router, §4.5/§4.6) fires
//! the Kafka ack itself the instant `try_send` succeeds.

use relay_vendor::UserMessage;

#[derive(Debug)]
pub struct MailboxItem {
    pub partition: i32,
    pub offset: i64,
    pub message: UserMessage,
}

/// Why a hand-off to a processor's mailbox failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Mailbox is at capacity (§4.7, §8 S6): caller must apply backpressure
    /// and retry later, not treat this as a terminal failure.
    Full,
    /// The processor's worker has already exited (idle eviction race or pool
    /// shutdown); caller should create a fresh processor and retry.
    Closed,
}
