//! Data model for §3 "CursorRecord" and "LeaderLease".

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The per-tenant synchronization position.
///
/// The remote copy is authoritative iff `dirty == false`. `version` is
/// strictly monotonic per `app_id` and only ever advances through a
/// successful CAS write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub app_id: String,
    pub epoch: i64,
    pub version: i64,
    pub cursor: String,
    pub dirty: bool,
}

impl CursorRecord {
    pub fn initial(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            epoch: 0,
            version: 0,
            cursor: String::new(),
            dirty: false,
        }
    }
}

/// A transient token held while this process is leader for `app_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderLease {
    pub epoch: i64,
    pub ttl: Duration,
}

/// Outcome of [`crate::backend::CursorBackend::acquire_lease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ok(LeaderLease),
    Lost,
}

/// Outcome of [`crate::backend::CursorBackend::renew_lease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Ok,
    Lost,
}

/// Outcome of [`crate::backend::CursorBackend::update_cursor_cas`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Committed(i64),
    Conflict(i64),
    NotLeader,
}
