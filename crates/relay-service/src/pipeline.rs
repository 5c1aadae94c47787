//! Raw-callback pipeline (component C, §4.3): the leader-only loop that
//! turns one `RawEvent` into a vendor pull, a batch of dispatch publishes,
//! and a cursor commit.
//!
//! Strengthened per an open design decision: every publish in step 4 is
//! awaited to completion (its delivery future resolved) before step 6 issues
//! the cursor CAS, so the cursor never advances past a message that has not
//! actually landed on the dispatch topic. See `DESIGN.md`.

use std::sync::Arc;

use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory};
use relay_cursor::CursorRuntime;
use relay_dispatch::DispatchPublisher;
use relay_vendor::{RawEvent, TenantCredentials, VendorClient};

pub struct RawCallbackPipeline {
    cursor: CursorRuntime,
    vendor: Arc<dyn VendorClient>,
    dispatch: Arc<dyn DispatchPublisher>,
    credentials: TenantCredentials,
    access_token: Option<String>,
    sync_limit: u32,
}

impl RawCallbackPipeline {
    pub fn new(
        cursor: CursorRuntime,
        vendor: Arc<dyn VendorClient>,
        dispatch: Arc<dyn DispatchPublisher>,
        credentials: TenantCredentials,
        sync_limit: u32,
    ) -> Self {
        Self {
            cursor,
            vendor,
            dispatch,
            credentials,
            access_token: None,
            sync_limit,
        }
    }

    pub fn cursor(&self) -> &CursorRuntime {
        &self.cursor
    }

    /// Run the §4.3 steps 2-6 for one `RawEvent`. Step 1 ("if the in-memory
    /// `CursorRuntime` is missing, drop") is enforced by construction here —
    /// a pipeline only exists once `setup_cursor_state` has succeeded.
    pub async fn handle_event(&mut self, event: &RawEvent) -> Result<(), CoreError> {
        let access_token = self.access_token().await?;

        let next_cursor = if self.cursor.cursor().is_empty() {
            match self
                .vendor
                .bootstrap_cursor(&event.tenant_kf_id, &event.token, &access_token)
                .await
            {
                Ok(bootstrap) => bootstrap.next_cursor,
                Err(err) => return Err(self.clear_token_on_auth_failure(err).await),
            }
        } else {
            self.cursor.cursor().to_string()
        };

        let sync = match self
            .vendor
            .sync_messages(&next_cursor, &event.tenant_kf_id, self.sync_limit, &access_token)
            .await
        {
            Ok(sync) => sync,
            Err(err) => return Err(self.clear_token_on_auth_failure(err).await),
        };

        for message in &sync.messages {
            let payload = serde_json::to_vec(message).map_err(|err| {
                CoreError::new(codes::RECORD_DECODE, ErrorCategory::Decode, format!("failed to serialize user message: {err}"))
            })?;
            // Awaited individually: the strengthened decision requires every
            // delivery future to resolve before the CAS below runs.
            self.dispatch.publish(&message.external_user_id, &payload, Vec::new()).await?;
        }

        let commit_cursor = if sync.next_cursor.is_empty() { next_cursor } else { sync.next_cursor };
        if commit_cursor == self.cursor.cursor() {
            return Ok(());
        }

        self.cursor.commit(&commit_cursor).await
    }

    async fn access_token(&mut self) -> Result<String, CoreError> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }
        let token = self.vendor.fetch_access_token(&self.credentials).await?;
        self.access_token = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached access token on an auth rejection so the next event
    /// fetches a fresh one, then hand the error back to the caller.
    async fn clear_token_on_auth_failure(&mut self, err: CoreError) -> CoreError {
        if err.code() == codes::VENDOR_AUTH {
            tracing::warn!(code = err.code(), "vendor rejected cached access token, refreshing next call");
            self.access_token = None;
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_cursor::{MemoryCursorBackend, ShadowStore};
    use relay_dispatch::MockDispatchPublisher;
    use relay_vendor::{MessageOrigin, MockVendorClient, Payload, SyncResponse, UserMessage};
    use std::time::Duration;

    fn event() -> RawEvent {
        RawEvent {
            tenant_kf_id: "kf-1".to_string(),
            token: "tok".to_string(),
            event_kind: "msg".to_string(),
            msg_type: "text".to_string(),
            create_time: 0,
        }
    }

    fn message(msg_id: &str, user: &str) -> UserMessage {
        UserMessage {
            msg_id: msg_id.to_string(),
            external_user_id: user.to_string(),
            open_kf_id: "kf-1".to_string(),
            send_time: 0,
            origin: MessageOrigin::Customer,
            payload: Payload::Text { content: "hi".to_string() },
        }
    }

    async fn cursor_runtime(backend: Arc<MemoryCursorBackend>) -> (CursorRuntime, i64) {
        let lease = match backend.acquire_lease("tenant", "host", Duration::from_secs(30)).await.unwrap() {
            relay_cursor::AcquireOutcome::Ok(lease) => lease,
            relay_cursor::AcquireOutcome::Lost => panic!("expected acquisition"),
        };
        let dir = tempfile::tempdir().unwrap();
        let shadow = ShadowStore::new(dir.path().join("cursor.json"));
        let runtime = CursorRuntime::setup_cursor_state("tenant", lease.epoch, backend, shadow, relay_core::system_clock())
            .await
            .unwrap();
        (runtime, lease.epoch)
    }

    #[tokio::test]
    async fn publishes_every_message_then_commits_the_new_cursor() {
        let backend = Arc::new(MemoryCursorBackend::new());
        let (runtime, _epoch) = cursor_runtime(backend.clone()).await;

        let vendor = Arc::new(MockVendorClient::new(vec![SyncResponse {
            messages: vec![message("1", "user-a"), message("2", "user-b")],
            next_cursor: "cursor-2".to_string(),
        }]));
        let dispatch = Arc::new(MockDispatchPublisher::new(4));

        let mut pipeline = RawCallbackPipeline::new(
            runtime,
            vendor,
            dispatch.clone(),
            TenantCredentials { corp_id: "c".to_string(), corp_secret: "s".to_string() },
            100,
        );

        pipeline.handle_event(&event()).await.unwrap();

        assert_eq!(dispatch.records().len(), 2);
        assert_eq!(pipeline.cursor().cursor(), "cursor-2");
        assert!(!pipeline.cursor().is_dirty());
    }

    #[tokio::test]
    async fn unchanged_cursor_skips_the_commit() {
        let backend = Arc::new(MemoryCursorBackend::new());
        backend.seed("tenant", None, "cursor-1", 3);
        let (runtime, _epoch) = cursor_runtime(backend.clone()).await;
        let starting_version = runtime.version();

        let vendor = Arc::new(MockVendorClient::new(vec![SyncResponse { messages: vec![], next_cursor: String::new() }]));
        let dispatch = Arc::new(MockDispatchPublisher::new(4));

        let mut pipeline = RawCallbackPipeline::new(
            runtime,
            vendor,
            dispatch,
            TenantCredentials { corp_id: "c".to_string(), corp_secret: "s".to_string() },
            100,
        );

        pipeline.handle_event(&event()).await.unwrap();
        assert_eq!(pipeline.cursor().version(), starting_version);
    }

    #[tokio::test]
    async fn transport_failure_on_publish_leaves_cursor_dirty_on_next_commit() {
        let backend = Arc::new(MemoryCursorBackend::new());
        let (runtime, _epoch) = cursor_runtime(backend.clone()).await;

        let vendor = Arc::new(MockVendorClient::new(vec![SyncResponse {
            messages: vec![message("1", "user-a")],
            next_cursor: "cursor-2".to_string(),
        }]));
        let dispatch = Arc::new(MockDispatchPublisher::new(4));
        dispatch.fail_next_calls(1);

        let mut pipeline = RawCallbackPipeline::new(
            runtime,
            vendor,
            dispatch,
            TenantCredentials { corp_id: "c".to_string(), corp_secret: "s".to_string() },
            100,
        );

        let err = pipeline.handle_event(&event()).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transport);
    }
}
