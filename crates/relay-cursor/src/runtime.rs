//! Combines the remote [`CursorBackend`] with the local [`ShadowStore`] into
//! the in-memory state the raw-callback pipeline (component C) consumes:
//! current `cursor`, the CAS `version` to present next, and whether the
//! local copy is ahead of the remote one (§4.3).

use std::sync::Arc;
use std::time::Duration;

use relay_core::error::codes;
use relay_core::{Clock, CoreError, ErrorCategory, RetryBudget};

use crate::backend::CursorBackend;
use crate::model::{CasOutcome, CursorRecord};
use crate::shadow::ShadowStore;

const CONFLICT_RETRY_BUDGET: u32 = 5;
const CONFLICT_RETRY_BASE: Duration = Duration::from_millis(50);

pub struct CursorRuntime {
    app_id: String,
    epoch: i64,
    cursor: String,
    version: i64,
    dirty: bool,
    backend: Arc<dyn CursorBackend>,
    shadow: ShadowStore,
    clock: Arc<dyn Clock>,
}

impl CursorRuntime {
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reconcile local shadow against remote state when this process takes
    /// over as leader for `app_id`, per §4.3 "On leader (re)start".
    pub async fn setup_cursor_state(
        app_id: impl Into<String>,
        epoch: i64,
        backend: Arc<dyn CursorBackend>,
        shadow: ShadowStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        let app_id = app_id.into();
        let shadow_record = shadow.load().await?;
        let (remote_cursor, remote_version) = backend.load_cursor(&app_id).await?;

        let (cursor, version, dirty) = match shadow_record {
            Some(record) if record.dirty && !record.cursor.is_empty() => {
                match backend
                    .update_cursor_cas(&app_id, epoch, remote_version, &record.cursor)
                    .await
                {
                    Ok(CasOutcome::Committed(v)) => (record.cursor, v, false),
                    Ok(CasOutcome::Conflict(_)) if remote_cursor == record.cursor => {
                        (record.cursor, remote_version, false)
                    }
                    Ok(CasOutcome::Conflict(_)) => (record.cursor, remote_version, true),
                    Ok(CasOutcome::NotLeader) => {
                        return Err(CoreError::new(
                            codes::CURSOR_NOT_LEADER,
                            ErrorCategory::NotLeader,
                            format!("lost leadership for {app_id} during shadow reconciliation"),
                        ))
                    }
                    Err(err) if err.category() == ErrorCategory::Transport => {
                        (record.cursor, remote_version, true)
                    }
                    Err(err) => return Err(err),
                }
            }
            Some(record) => (record.cursor, remote_version, false),
            None => (remote_cursor, remote_version, false),
        };

        let runtime = Self {
            app_id,
            epoch,
            cursor,
            version,
            dirty,
            backend,
            shadow,
            clock,
        };
        runtime.persist_shadow().await?;
        Ok(runtime)
    }

    /// Advance the cursor to `new_cursor`, retrying conflicts a bounded
    /// number of times before falling through to the dirty-shadow path
    /// (§4.3 step 2, §8 S4).
    pub async fn commit(&mut self, new_cursor: &str) -> Result<(), CoreError> {
        let mut budget = RetryBudget::new(CONFLICT_RETRY_BUDGET);
        let mut expected_version = self.version;

        loop {
            match self
                .backend
                .update_cursor_cas(&self.app_id, self.epoch, expected_version, new_cursor)
                .await
            {
                Ok(CasOutcome::Committed(v)) => {
                    self.cursor = new_cursor.to_string();
                    self.version = v;
                    self.dirty = false;
                    return self.persist_shadow().await;
                }
                Ok(CasOutcome::Conflict(actual)) => {
                    let (remote_cursor, remote_version) =
                        self.backend.load_cursor(&self.app_id).await?;
                    if remote_cursor == new_cursor {
                        self.cursor = new_cursor.to_string();
                        self.version = remote_version;
                        self.dirty = false;
                        return self.persist_shadow().await;
                    }
                    match budget.next(CONFLICT_RETRY_BASE, self.epoch as u64) {
                        Some(delay) => {
                            self.clock.sleep(delay).await;
                            expected_version = actual.max(remote_version);
                            continue;
                        }
                        None => {
                            return self.fall_through_to_dirty(new_cursor).await;
                        }
                    }
                }
                Ok(CasOutcome::NotLeader) => {
                    return Err(CoreError::new(
                        codes::CURSOR_NOT_LEADER,
                        ErrorCategory::NotLeader,
                        format!("lost leadership for {} mid-commit", self.app_id),
                    ));
                }
                Err(err) if err.category() == ErrorCategory::Transport => {
                    return self.fall_through_to_dirty(new_cursor).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fall_through_to_dirty(&mut self, attempted_cursor: &str) -> Result<(), CoreError> {
        self.cursor = attempted_cursor.to_string();
        self.version += 1;
        self.dirty = true;
        self.persist_shadow().await
    }

    async fn persist_shadow(&self) -> Result<(), CoreError> {
        let record = CursorRecord {
            app_id: self.app_id.clone(),
            epoch: self.epoch,
            version: self.version,
            cursor: self.cursor.clone(),
            dirty: self.dirty,
        };
        self.shadow.save(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::MemoryCursorBackend;
    use crate::model::AcquireOutcome;
    use relay_core::system_clock;

    #[tokio::test]
    async fn fast_forwards_dirty_shadow_on_leader_restart() {
        let backend = Arc::new(MemoryCursorBackend::new());
        let AcquireOutcome::Ok(lease) = backend
            .acquire_lease("tenant", "host", Duration::from_secs(15))
            .await
            .unwrap()
        else {
            panic!("expected acquisition");
        };

        let dir = tempfile::tempdir().unwrap();
        let shadow_path = dir.path().join("cursor.json");
        let shadow = ShadowStore::new(&shadow_path);
        shadow
            .save(&CursorRecord {
                app_id: "tenant".to_string(),
                epoch: 7,
                version: 42,
                cursor: "abc".to_string(),
                dirty: true,
            })
            .await
            .unwrap();

        let runtime = CursorRuntime::setup_cursor_state(
            "tenant",
            lease.epoch,
            backend,
            ShadowStore::new(&shadow_path),
            system_clock(),
        )
        .await
        .unwrap();

        assert_eq!(runtime.cursor(), "abc");
        assert!(!runtime.is_dirty());
    }

    #[tokio::test]
    async fn commit_retries_conflict_with_refreshed_version() {
        let backend = Arc::new(MemoryCursorBackend::new());
        let AcquireOutcome::Ok(lease) = backend
            .acquire_lease("tenant", "host", Duration::from_secs(15))
            .await
            .unwrap()
        else {
            panic!("expected acquisition");
        };
        backend.seed("tenant", Some(lease.epoch), "X", 5);

        let dir = tempfile::tempdir().unwrap();
        let shadow_path = dir.path().join("cursor.json");
        let mut runtime = CursorRuntime::setup_cursor_state(
            "tenant",
            lease.epoch,
            backend.clone(),
            ShadowStore::new(&shadow_path),
            system_clock(),
        )
        .await
        .unwrap();
        assert_eq!(runtime.version(), 5);

        // Stage a stale expected_version to force one conflict round before
        // converging on the real remote state.
        runtime.version = 4;
        runtime.commit("Y").await.unwrap();
        assert_eq!(runtime.cursor(), "Y");
        assert!(!runtime.is_dirty());
    }

    #[tokio::test]
    async fn transport_failure_falls_through_to_dirty_shadow() {
        let backend = Arc::new(MemoryCursorBackend::new());
        let AcquireOutcome::Ok(lease) = backend
            .acquire_lease("tenant", "host", Duration::from_secs(15))
            .await
            .unwrap()
        else {
            panic!("expected acquisition");
        };

        let dir = tempfile::tempdir().unwrap();
        let shadow_path = dir.path().join("cursor.json");
        let mut runtime = CursorRuntime::setup_cursor_state(
            "tenant",
            lease.epoch,
            backend.clone(),
            ShadowStore::new(&shadow_path),
            system_clock(),
        )
        .await
        .unwrap();

        backend.set_disconnected(true);
        runtime.commit("Z").await.unwrap();
        assert!(runtime.is_dirty());
        assert_eq!(runtime.cursor(), "Z");

        let persisted = ShadowStore::new(&shadow_path).load().await.unwrap().unwrap();
        assert!(persisted.dirty);
        assert_eq!(persisted.cursor, "Z");
    }
}
