//! The remote authoritative cursor store contract (§4.1). Expressed as a
//! trait so an in-memory backend can stand in for etcd in tests without
//! conditional compilation inside the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::CoreError;

use crate::model::{AcquireOutcome, CasOutcome, RenewOutcome};

#[async_trait]
pub trait CursorBackend: Send + Sync + 'static {
    /// Atomically acquire the leadership lease for `app_id`. Contention
    /// yields [`AcquireOutcome::Lost`], never an error.
    async fn acquire_lease(
        &self,
        app_id: &str,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, CoreError>;

    /// Renew a previously acquired lease. Fails with `Lost` if the storage's
    /// held epoch no longer matches.
    async fn renew_lease(&self, app_id: &str, epoch: i64) -> Result<RenewOutcome, CoreError>;

    /// Non-blocking read of the current `(cursor, version)`.
    async fn load_cursor(&self, app_id: &str) -> Result<(String, i64), CoreError>;

    /// The only mutation path for the remote copy of the cursor.
    async fn update_cursor_cas(
        &self,
        app_id: &str,
        epoch: i64,
        expected_version: i64,
        new_cursor: &str,
    ) -> Result<CasOutcome, CoreError>;
}
