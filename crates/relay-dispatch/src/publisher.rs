//! Dispatch publisher contract (§4.4): at-least-once publish keyed by
//! `external_user_id`, with a terminal per-record delivery outcome so
//! "published" is an observable fact rather than a fire-and-forget call.

use async_trait::async_trait;
use relay_core::CoreError;

/// A record's headers: vendor schema tags or, for the recorder topic,
/// `schema`/`user_id`/`occurred_epoch_seconds`/`pair_count`/`produced_at_epoch_seconds`.
pub type Headers = Vec<(String, Vec<u8>)>;

/// Outcome of a single publish, observed after the producer's terminal
/// delivery callback fires (§4.4: "surfaces a terminal delivery callback per
/// record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait DispatchPublisher: Send + Sync + 'static {
    /// Publish `payload` keyed by `key` to the publisher's configured topic.
    /// Resolves only once the broker has acknowledged the write (or the
    /// publisher has exhausted its retry budget and routed the record to
    /// the dead-letter topic, in which case this returns `Err`).
    async fn publish(
        &self,
        key: &str,
        payload: &[u8],
        headers: Headers,
    ) -> Result<Delivered, CoreError>;
}
