//! Injectable clock so TTL expiry, leader renewal and idle-eviction logic can
//! be driven by virtual time in tests instead of real wall time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Abstract "what time is it / wait this long" so timing-sensitive components
/// (lease TTL, idle eviction, backoff) can be tested without real sleeps.
///
/// There is deliberately no `MockClock`: Tokio's own paused-time test clock
/// (`#[tokio::test(start_paused = true)]` + `tokio::time::advance`) already
/// drives `SystemClock` deterministically in tests, so components should
/// depend on `Arc<dyn Clock>` but tests just pause the runtime clock instead
/// of injecting a second one.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Production clock backed by the Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
