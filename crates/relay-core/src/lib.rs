//! Shared contracts for the messaging relay: error taxonomy, layered
//! configuration, adaptive retry/backoff, an injectable clock and process
//! readiness. Every other `relay-*` crate depends on this one and nothing
//! flows the other way.

pub mod clock;
pub mod config;
pub mod error;
pub mod readiness;
pub mod retry;

pub use clock::{system_clock, Clock, SystemClock};
pub use config::AppConfig;
pub use error::{CoreError, CoreResult, ErrorCategory};
pub use readiness::Readiness;
pub use retry::RetryBudget;
