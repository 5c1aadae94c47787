//! Stress harness (component H, §4.8): an in-process stand-in for the
//! vendor-side raw-callback pipeline, used to drive end-to-end ordering
//! verification without a real vendor tenant.

pub mod keyset;
pub mod sequence_checker;
pub mod synthesizer;

pub use keyset::{generate_key_set, partition_deviation, KEY_COUNT};
pub use sequence_checker::{SequenceChecker, SequenceCheckingTransition};
pub use synthesizer::{BatchOutcome, BatchSynthesizer};
