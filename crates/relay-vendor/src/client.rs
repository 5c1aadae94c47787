//! The vendor HTTP API contract consumed by the raw-callback pipeline (§6).

use async_trait::async_trait;
use relay_core::CoreError;

use crate::model::{BootstrapResponse, SyncResponse, TenantCredentials};

#[async_trait]
pub trait VendorClient: Send + Sync + 'static {
    async fn fetch_access_token(&self, credentials: &TenantCredentials) -> Result<String, CoreError>;

    async fn bootstrap_cursor(
        &self,
        open_kf_id: &str,
        token: &str,
        access_token: &str,
    ) -> Result<BootstrapResponse, CoreError>;

    async fn sync_messages(
        &self,
        cursor: &str,
        open_kf_id: &str,
        limit: u32,
        access_token: &str,
    ) -> Result<SyncResponse, CoreError>;
}
