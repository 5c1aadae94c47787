//! Single-leader election (component B), modeled directly on an etcd CAS
//! leader-election loop: repeatedly try to acquire, run the caller's body
//! while a keepalive task renews the lease, and fall back to bounded
//! jittered retry whenever acquisition or renewal fails.
//!
//! Unlike a bare etcd client driver, this one acquires through
//! [`relay_cursor::CursorBackend`] so the same CAS semantics used for cursor
//! commits back the leader key.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory, RetryBudget};
use relay_cursor::{AcquireOutcome, CursorBackend, LeaderLease, RenewOutcome};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub app_id: String,
    pub holder_id: String,
    pub lease_ttl: Duration,
    /// Recommended TTL/3; must be strictly less than `lease_ttl`.
    pub renew_interval: Duration,
    pub retry_base: Duration,
}

impl LeaderElectionConfig {
    pub fn new(app_id: impl Into<String>, holder_id: impl Into<String>, lease_ttl: Duration) -> Self {
        Self {
            app_id: app_id.into(),
            holder_id: holder_id.into(),
            lease_ttl,
            renew_interval: lease_ttl / 3,
            retry_base: Duration::from_millis(200),
        }
    }
}

/// What the leadership body reports when it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyOutcome {
    /// The body finished on its own (e.g. process shutdown requested).
    Completed,
    /// The body detected it no longer holds a valid lease.
    NotLeader,
}

/// Run `body` under leadership of `config.app_id` until `cancel` fires.
///
/// `body` receives a child `CancellationToken` (cancelled the instant
/// leadership is lost, so the body never executes side effects past that
/// point beyond the CAS race window already bounded by the lease TTL) and
/// the acquired [`LeaderLease`].
pub async fn run<F, Fut>(
    backend: Arc<dyn CursorBackend>,
    config: LeaderElectionConfig,
    cancel: CancellationToken,
    body: F,
) -> Result<(), CoreError>
where
    F: Fn(CancellationToken, LeaderLease) -> Fut,
    Fut: Future<Output = Result<BodyOutcome, CoreError>>,
{
    let mut retry_budget_attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            outcome = try_lead(&backend, &config, &cancel, &body) => {
                match outcome {
                    Ok(true) => {
                        // Held leadership at least once; reset contention backoff.
                        retry_budget_attempt = 0;
                    }
                    Ok(false) => {
                        tracing::debug!(app_id = %config.app_id, "lost the leadership race, standing by");
                    }
                    Err(err) => {
                        tracing::warn!(app_id = %config.app_id, error = %err, "leadership term ended with an error");
                    }
                }

                let wait = relay_core::retry::backoff(retry_budget_attempt.min(10), config.retry_base, seed(&config));
                retry_budget_attempt = retry_budget_attempt.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }
}

fn seed(config: &LeaderElectionConfig) -> u64 {
    config.holder_id.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

/// Returns `Ok(true)` if leadership was actually held for some duration,
/// `Ok(false)` if the acquisition attempt simply lost the race.
async fn try_lead<F, Fut>(
    backend: &Arc<dyn CursorBackend>,
    config: &LeaderElectionConfig,
    cancel: &CancellationToken,
    body: &F,
) -> Result<bool, CoreError>
where
    F: Fn(CancellationToken, LeaderLease) -> Fut,
    Fut: Future<Output = Result<BodyOutcome, CoreError>>,
{
    let lease = match backend
        .acquire_lease(&config.app_id, &config.holder_id, config.lease_ttl)
        .await?
    {
        AcquireOutcome::Ok(lease) => lease,
        AcquireOutcome::Lost => return Ok(false),
    };

    tracing::info!(app_id = %config.app_id, epoch = lease.epoch, "acquired leadership");

    let leadership_cancel = cancel.child_token();
    let keepalive_handle = {
        let backend = Arc::clone(backend);
        let app_id = config.app_id.clone();
        let epoch = lease.epoch;
        let interval = config.renew_interval;
        let token = leadership_cancel.clone();
        tokio::spawn(async move { run_keepalive(backend, app_id, epoch, interval, token).await })
    };

    let result = body(leadership_cancel.clone(), lease).await;
    leadership_cancel.cancel();
    let _ = keepalive_handle.await;

    match result {
        Ok(BodyOutcome::Completed) => Ok(true),
        Ok(BodyOutcome::NotLeader) => {
            tracing::info!(app_id = %config.app_id, epoch = lease.epoch, "leadership lost mid-term");
            Ok(true)
        }
        Err(err) if err.category() == ErrorCategory::NotLeader => {
            tracing::info!(app_id = %config.app_id, epoch = lease.epoch, "leadership lost mid-term");
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

async fn run_keepalive(
    backend: Arc<dyn CursorBackend>,
    app_id: String,
    epoch: i64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut budget = RetryBudget::new(3);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        match backend.renew_lease(&app_id, epoch).await {
            Ok(RenewOutcome::Ok) => {
                budget = RetryBudget::new(3);
            }
            Ok(RenewOutcome::Lost) => {
                tracing::warn!(app_id = %app_id, epoch, "lease renewal reports leadership lost");
                cancel.cancel();
                return;
            }
            Err(err) if err.category() == ErrorCategory::Transport => {
                if budget.next(Duration::from_millis(100), epoch as u64).is_none() {
                    tracing::error!(
                        app_id = %app_id,
                        epoch,
                        code = codes::LEADER_LOST,
                        "exhausted renewal retries after repeated transport errors"
                    );
                    cancel.cancel();
                    return;
                }
            }
            Err(err) => {
                tracing::error!(app_id = %app_id, epoch, error = %err, "unexpected renewal error");
                cancel.cancel();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_cursor::MemoryCursorBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn acquires_and_completes_one_term() {
        let backend: Arc<dyn CursorBackend> = Arc::new(MemoryCursorBackend::new());
        let config = LeaderElectionConfig::new("tenant", "host-1", Duration::from_millis(300));
        let cancel = CancellationToken::new();
        let runs = Arc::new(AtomicU32::new(0));

        let runs_clone = Arc::clone(&runs);
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(run(backend, config, cancel.clone(), move |_leader_cancel, _lease| {
            let runs = Arc::clone(&runs_clone);
            let cancel = cancel_clone.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                cancel.cancel();
                Ok(BodyOutcome::Completed)
            }
        }));

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("election loop should exit promptly after cancellation")
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_candidate_stands_by_while_first_holds_lease() {
        let backend = Arc::new(MemoryCursorBackend::new());
        let held = backend
            .acquire_lease("tenant", "host-1", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(matches!(held, AcquireOutcome::Ok(_)));

        let backend_dyn: Arc<dyn CursorBackend> = backend;
        let config = LeaderElectionConfig::new("tenant", "host-2", Duration::from_millis(50));
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = tokio::spawn(run(backend_dyn, config, cancel.clone(), move |_leader_cancel, _lease| {
            async { Ok(BodyOutcome::Completed) }
        }));

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel_clone.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("election loop should exit promptly after cancellation")
            .unwrap()
            .unwrap();
    }
}
