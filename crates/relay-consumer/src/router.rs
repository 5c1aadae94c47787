//! The seam between the partition sequencer (E) and the user processor pool
//! (G): "hand it to the user router with its ACK" (§4.5 step 3).

use relay_processor::{EnqueueError, MailboxItem, ProcessorPool};
use std::sync::Arc;

pub trait UserRouter: Send + Sync + 'static {
    /// Attempt the hand-off. Returns the item back on failure so the caller
    /// can re-queue it in the sequencer's `pending` map unchanged.
    fn route(&self, external_user_id: &str, item: MailboxItem) -> Result<(), (EnqueueError, MailboxItem)>;
}

/// Adapts [`ProcessorPool`] (whose methods take `self: &Arc<Self>`) to the
/// plain `&self` shape [`UserRouter`] needs so the sequencer can hold it as
/// a trait object without a double `Arc`.
pub struct ProcessorPoolRouter(pub Arc<ProcessorPool>);

impl UserRouter for ProcessorPoolRouter {
    fn route(&self, external_user_id: &str, item: MailboxItem) -> Result<(), (EnqueueError, MailboxItem)> {
        self.0.try_enqueue(external_user_id, item)
    }
}
