//! Partition sequencer and consumer runtime (components E and F): re-orders
//! polled records back into per-partition ascending-offset order and routes
//! them to the user processor pool, committing only contiguous acked
//! offsets back to the log service.

pub mod commit;
pub mod router;
pub mod runtime;
pub mod sequencer;

pub use commit::CommitTracker;
pub use router::{ProcessorPoolRouter, UserRouter};
pub use runtime::{ConsumerRuntime, ConsumerRuntimeConfig};
pub use sequencer::{AckFn, DrainOutcome, GlobalInflight, PartitionSequencer};
