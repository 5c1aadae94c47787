//! An in-memory [`CursorBackend`] with the same CAS/lease semantics as the
//! etcd-backed one, so the raw-callback pipeline and leader election can be
//! exercised in tests without a real etcd cluster (§4.1, §8 S3/S4).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::CoreError;

use crate::backend::CursorBackend;
use crate::model::{AcquireOutcome, CasOutcome, LeaderLease, RenewOutcome};

struct Tenant {
    held_epoch: Option<i64>,
    cursor: String,
    version: i64,
}

/// Deterministic, in-process stand-in for etcd. `simulate_disconnect` lets
/// tests exercise the transport-error path without a real network.
pub struct MemoryCursorBackend {
    tenants: Mutex<HashMap<String, Tenant>>,
    next_epoch: AtomicI64,
    disconnected: std::sync::atomic::AtomicBool,
}

impl Default for MemoryCursorBackend {
    fn default() -> Self {
        Self {
            tenants: Mutex::new(HashMap::new()),
            next_epoch: AtomicI64::new(1),
            disconnected: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl MemoryCursorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    fn check_connected(&self) -> Result<(), CoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(CoreError::new(
                relay_core::error::codes::CURSOR_TRANSPORT,
                relay_core::ErrorCategory::Transport,
                "simulated etcd disconnect",
            ));
        }
        Ok(())
    }

    /// Seed a tenant directly, bypassing lease acquisition — used to set up
    /// the "remote already has version N" boundary scenarios.
    pub fn seed(&self, app_id: &str, epoch: Option<i64>, cursor: &str, version: i64) {
        let mut tenants = self.tenants.lock();
        tenants.insert(
            app_id.to_string(),
            Tenant {
                held_epoch: epoch,
                cursor: cursor.to_string(),
                version,
            },
        );
    }
}

#[async_trait]
impl CursorBackend for MemoryCursorBackend {
    async fn acquire_lease(
        &self,
        app_id: &str,
        _holder_id: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome, CoreError> {
        self.check_connected()?;
        let mut tenants = self.tenants.lock();
        let tenant = tenants
            .entry(app_id.to_string())
            .or_insert_with(|| Tenant {
                held_epoch: None,
                cursor: String::new(),
                version: 0,
            });

        if tenant.held_epoch.is_some() {
            return Ok(AcquireOutcome::Lost);
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        tenant.held_epoch = Some(epoch);
        Ok(AcquireOutcome::Ok(LeaderLease { epoch, ttl }))
    }

    async fn renew_lease(&self, app_id: &str, epoch: i64) -> Result<RenewOutcome, CoreError> {
        self.check_connected()?;
        let tenants = self.tenants.lock();
        match tenants.get(app_id) {
            Some(tenant) if tenant.held_epoch == Some(epoch) => Ok(RenewOutcome::Ok),
            _ => Ok(RenewOutcome::Lost),
        }
    }

    async fn load_cursor(&self, app_id: &str) -> Result<(String, i64), CoreError> {
        self.check_connected()?;
        let tenants = self.tenants.lock();
        match tenants.get(app_id) {
            Some(tenant) => Ok((tenant.cursor.clone(), tenant.version)),
            None => Ok((String::new(), 0)),
        }
    }

    async fn update_cursor_cas(
        &self,
        app_id: &str,
        epoch: i64,
        expected_version: i64,
        new_cursor: &str,
    ) -> Result<CasOutcome, CoreError> {
        self.check_connected()?;
        let mut tenants = self.tenants.lock();
        let tenant = tenants
            .entry(app_id.to_string())
            .or_insert_with(|| Tenant {
                held_epoch: None,
                cursor: String::new(),
                version: 0,
            });

        if tenant.held_epoch != Some(epoch) {
            return Ok(CasOutcome::NotLeader);
        }
        if tenant.version != expected_version {
            return Ok(CasOutcome::Conflict(tenant.version));
        }

        tenant.cursor = new_cursor.to_string();
        tenant.version += 1;
        Ok(CasOutcome::Committed(tenant.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_is_lost_while_first_holds_lease() {
        let backend = MemoryCursorBackend::new();
        let first = backend
            .acquire_lease("tenant-a", "host-1", Duration::from_secs(15))
            .await
            .unwrap();
        assert!(matches!(first, AcquireOutcome::Ok(_)));

        let second = backend
            .acquire_lease("tenant-a", "host-2", Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(second, AcquireOutcome::Lost);
    }

    #[tokio::test]
    async fn cas_conflict_reports_actual_version() {
        let backend = MemoryCursorBackend::new();
        let AcquireOutcome::Ok(lease) = backend
            .acquire_lease("tenant-b", "host-1", Duration::from_secs(15))
            .await
            .unwrap()
        else {
            panic!("expected acquisition to succeed");
        };

        backend.seed("tenant-b", Some(lease.epoch), "X", 5);

        let outcome = backend
            .update_cursor_cas("tenant-b", lease.epoch, 4, "Y")
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict(5));

        let outcome = backend
            .update_cursor_cas("tenant-b", lease.epoch, 5, "Y")
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Committed(6));
    }

    #[tokio::test]
    async fn cas_from_stale_epoch_is_not_leader() {
        let backend = MemoryCursorBackend::new();
        let AcquireOutcome::Ok(lease) = backend
            .acquire_lease("tenant-c", "host-1", Duration::from_secs(15))
            .await
            .unwrap()
        else {
            panic!("expected acquisition to succeed");
        };

        let outcome = backend
            .update_cursor_cas("tenant-c", lease.epoch + 999, 0, "Z")
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::NotLeader);
    }
}
