//! An in-process [`VendorClient`] used by pipeline tests so they don't need
//! a real vendor endpoint.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::CoreError;

use crate::client::VendorClient;
use crate::model::{BootstrapResponse, SyncResponse, TenantCredentials, UserMessage};

/// Replays a fixed schedule of `sync_messages` responses, one per call, and
/// repeats the last entry once exhausted (an empty batch with an unchanged
/// cursor, so the pipeline naturally idles).
pub struct MockVendorClient {
    batches: Mutex<Vec<SyncResponse>>,
    calls: AtomicU32,
}

impl MockVendorClient {
    pub fn new(batches: Vec<SyncResponse>) -> Self {
        Self {
            batches: Mutex::new(batches),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorClient for MockVendorClient {
    async fn fetch_access_token(&self, _credentials: &TenantCredentials) -> Result<String, CoreError> {
        Ok("mock-access-token".to_string())
    }

    async fn bootstrap_cursor(
        &self,
        _open_kf_id: &str,
        _token: &str,
        _access_token: &str,
    ) -> Result<BootstrapResponse, CoreError> {
        Ok(BootstrapResponse {
            external_user_id: None,
            next_cursor: String::new(),
        })
    }

    async fn sync_messages(
        &self,
        cursor: &str,
        _open_kf_id: &str,
        _limit: u32,
        _access_token: &str,
    ) -> Result<SyncResponse, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut batches = self.batches.lock();
        if batches.is_empty() {
            return Ok(SyncResponse {
                messages: Vec::new(),
                next_cursor: cursor.to_string(),
            });
        }
        Ok(batches.remove(0))
    }
}

pub fn text_message(external_user_id: &str, msg_id: &str) -> UserMessage {
    use crate::model::{MessageOrigin, Payload};
    UserMessage {
        msg_id: msg_id.to_string(),
        external_user_id: external_user_id.to_string(),
        open_kf_id: "kf-default".to_string(),
        send_time: 0,
        origin: MessageOrigin::Customer,
        payload: Payload::Text {
            content: format!("message {msg_id}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_batches_then_idles() {
        let client = MockVendorClient::new(vec![SyncResponse {
            messages: vec![text_message("user-1", "1")],
            next_cursor: "cursor-1".to_string(),
        }]);

        let first = client.sync_messages("", "kf", 10, "tok").await.unwrap();
        assert_eq!(first.messages.len(), 1);
        assert_eq!(first.next_cursor, "cursor-1");

        let second = client.sync_messages("cursor-1", "kf", 10, "tok").await.unwrap();
        assert!(second.messages.is_empty());
        assert_eq!(second.next_cursor, "cursor-1");
        assert_eq!(client.calls(), 2);
    }
}
