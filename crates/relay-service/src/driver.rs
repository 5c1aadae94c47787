//! Drives the raw-callback pipeline (component C) as a leader-election body
//! (component B): pulls `RawEvent`s off a shared channel and feeds them to
//! the pipeline until leadership is lost or the channel closes.
//!
//! The channel is the seam where the (out-of-scope, §1) vendor webhook would
//! feed events in a complete deployment; `relay-service` only owns the
//! sending half internally today (used by its own bootstrap and, in stress
//! mode, left idle since the stress harness publishes past this stage).

use std::sync::Arc;

use relay_core::{CoreError, ErrorCategory};
use relay_election::BodyOutcome;
use relay_vendor::RawEvent;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::pipeline::RawCallbackPipeline;

/// Runs one leadership term of the raw-callback pipeline. Shared behind an
/// `Arc<Mutex<_>>` so the same receiver survives across repeated leadership
/// acquisitions (`relay_election::run` invokes its body more than once over
/// a process lifetime).
pub async fn run_pipeline_body(
    pipeline: RawCallbackPipeline,
    events: Arc<Mutex<mpsc::Receiver<RawEvent>>>,
    leader_cancel: CancellationToken,
) -> Result<BodyOutcome, CoreError> {
    let mut pipeline = pipeline;
    let mut events = events.lock().await;

    loop {
        tokio::select! {
            _ = leader_cancel.cancelled() => return Ok(BodyOutcome::Completed),
            event = events.recv() => {
                match event {
                    None => return Ok(BodyOutcome::Completed),
                    Some(event) => {
                        if let Err(err) = pipeline.handle_event(&event).await {
                            if err.category() == ErrorCategory::NotLeader {
                                return Ok(BodyOutcome::NotLeader);
                            }
                            tracing::warn!(code = err.code(), error = %err, "raw-callback pipeline event failed, continuing");
                        }
                    }
                }
            }
        }
    }
}
