//! `reqwest`-backed [`VendorClient`]. Maps HTTP status/transport failures
//! into `ErrorCategory` at the client seam (§4.10): 401/403 → auth, 429 →
//! rate-limit, connect/timeout → transport, body that fails to parse →
//! malformed. None of these are retried here — retry is the pipeline's job
//! (§4.11), driven by `ErrorCategory::is_retryable`.

use async_trait::async_trait;
use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory};
use serde::Deserialize;

use crate::client::VendorClient;
use crate::model::{BootstrapResponse, SyncResponse, TenantCredentials};

pub struct HttpVendorClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpVendorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, CoreError> {
        let response = request
            .send()
            .await
            .map_err(|err| CoreError::new(codes::VENDOR_TRANSPORT, ErrorCategory::Transport, err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CoreError::new(
                codes::VENDOR_AUTH,
                ErrorCategory::Invalid,
                format!("vendor rejected credentials: {status}"),
            ));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CoreError::new(
                codes::VENDOR_RATE_LIMIT,
                ErrorCategory::Transport,
                format!("vendor rate-limited the request: {status}"),
            ));
        }
        if !status.is_success() {
            return Err(CoreError::new(
                codes::VENDOR_TRANSPORT,
                ErrorCategory::Transport,
                format!("vendor returned {status}"),
            ));
        }

        response.json::<T>().await.map_err(|err| {
            CoreError::new(
                codes::VENDOR_MALFORMED,
                ErrorCategory::Decode,
                format!("vendor response failed to decode: {err}"),
            )
        })
    }
}

#[async_trait]
impl VendorClient for HttpVendorClient {
    async fn fetch_access_token(&self, credentials: &TenantCredentials) -> Result<String, CoreError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let request = self.http.get(format!("{}/cgi-bin/gettoken", self.base_url)).query(&[
            ("corpid", credentials.corp_id.as_str()),
            ("corpsecret", credentials.corp_secret.as_str()),
        ]);
        let resp: TokenResponse = self.send_json(request).await?;
        Ok(resp.access_token)
    }

    async fn bootstrap_cursor(
        &self,
        open_kf_id: &str,
        token: &str,
        access_token: &str,
    ) -> Result<BootstrapResponse, CoreError> {
        let request = self
            .http
            .post(format!("{}/cgi-bin/kf/sync_msg", self.base_url))
            .query(&[("access_token", access_token)])
            .json(&serde_json::json!({ "open_kfid": open_kf_id, "token": token, "cursor": "" }));
        self.send_json(request).await
    }

    async fn sync_messages(
        &self,
        cursor: &str,
        open_kf_id: &str,
        limit: u32,
        access_token: &str,
    ) -> Result<SyncResponse, CoreError> {
        let request = self
            .http
            .post(format!("{}/cgi-bin/kf/sync_msg", self.base_url))
            .query(&[("access_token", access_token)])
            .json(&serde_json::json!({
                "open_kfid": open_kf_id,
                "cursor": cursor,
                "limit": limit,
            }));
        self.send_json(request).await
    }
}
