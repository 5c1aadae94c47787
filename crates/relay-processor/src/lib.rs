//! Per-end-user processor lifecycle (component G): lazily created,
//! idle-expiring actors that own one end-user's conversation state behind a
//! bounded FIFO mailbox.

pub mod mailbox;
pub mod pool;
pub mod processor;
pub mod transition;

pub use mailbox::{EnqueueError, MailboxItem};
pub use pool::ProcessorPool;
pub use processor::ProcessorHandle;
pub use transition::{BusinessTransition, NoopTransition};
