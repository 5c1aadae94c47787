//! Vendor-facing data model (§3 "RawEvent", "UserMessage").

use serde::{Deserialize, Serialize};

/// The vendor callback envelope that triggers one raw-callback pipeline run.
/// Ephemeral — consumed exactly once per dispatch-topic offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub tenant_kf_id: String,
    pub token: String,
    pub event_kind: String,
    pub msg_type: String,
    pub create_time: i64,
}

/// Who originated a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Customer,
    System,
    Servicer,
}

/// The typed payload carried by a [`UserMessage`]. `Other` covers vendor
/// payload kinds this core does not need to interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Payload {
    Text { content: String },
    Image { media_id: String },
    Voice { media_id: String, length_secs: u32 },
    Video { media_id: String },
    File { media_id: String, filename: String },
    Location { latitude: f64, longitude: f64, name: String },
    Link { title: String, url: String },
    Event { event_name: String },
    #[serde(other)]
    Other,
}

/// A single end-user message, keyed for dispatch by `external_user_id`.
///
/// Invariant: for a fixed `external_user_id`, the sequence of `msg_id`s this
/// type appears in must preserve the order the vendor emitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub msg_id: String,
    pub external_user_id: String,
    pub open_kf_id: String,
    pub send_time: i64,
    pub origin: MessageOrigin,
    #[serde(flatten)]
    pub payload: Payload,
}

/// Response from the vendor's `sync_messages` RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub messages: Vec<UserMessage>,
    pub next_cursor: String,
}

/// Response from the vendor's `bootstrap_cursor` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub external_user_id: Option<String>,
    pub next_cursor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCredentials {
    pub corp_id: String,
    pub corp_secret: String,
}
