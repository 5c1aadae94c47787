//! Local dirty-shadow file (§4.1 "Local shadow"): a JSON snapshot of the
//! last cursor write attempted against etcd, written *before* the remote
//! commit actually lands. If the process crashes between the local write and
//! the remote CAS, [`crate::runtime::CursorRuntime::setup_cursor_state`]
//! reconciles the two on restart (§8 S3, S4).

use std::path::{Path, PathBuf};

use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory};

use crate::model::CursorRecord;

pub struct ShadowStore {
    path: PathBuf,
}

impl ShadowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Result<Option<CursorRecord>, CoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let record: CursorRecord = serde_json::from_slice(&bytes).map_err(|err| {
                    CoreError::new(
                        codes::CURSOR_SHADOW_IO,
                        ErrorCategory::Invalid,
                        format!("malformed shadow file {}: {err}", self.path.display()),
                    )
                })?;
                Ok(Some(record))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CoreError::new(
                codes::CURSOR_SHADOW_IO,
                ErrorCategory::Transport,
                format!("reading shadow file {}", self.path.display()),
            )
            .with_source(err)),
        }
    }

    /// Atomic write-temp-then-rename so a crash mid-write never leaves a
    /// half-written shadow file behind.
    pub async fn save(&self, record: &CursorRecord) -> Result<(), CoreError> {
        let json = serde_json::to_vec_pretty(record).map_err(|err| {
            CoreError::new(
                codes::CURSOR_SHADOW_IO,
                ErrorCategory::Invalid,
                "serializing cursor record",
            )
            .with_source(err)
        })?;

        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &json).await.map_err(|err| {
            CoreError::new(
                codes::CURSOR_SHADOW_IO,
                ErrorCategory::Transport,
                format!("writing shadow temp file {}", tmp_path.display()),
            )
            .with_source(err)
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|err| {
            CoreError::new(
                codes::CURSOR_SHADOW_IO,
                ErrorCategory::Transport,
                format!("renaming shadow temp file into {}", self.path.display()),
            )
            .with_source(err)
        })
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShadowStore::new(dir.path().join("cursor.json"));

        assert!(store.load().await.unwrap().is_none());

        let record = CursorRecord {
            app_id: "tenant-a".to_string(),
            epoch: 7,
            version: 3,
            cursor: "abc123".to_string(),
            dirty: true,
        };
        store.save(&record).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn malformed_file_is_reported_as_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = ShadowStore::new(path);
        let err = store.load().await.unwrap_err();
        assert_eq!(err.code(), codes::CURSOR_SHADOW_IO);
    }
}
