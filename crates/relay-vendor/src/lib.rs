//! Vendor HTTP API client (§6): access tokens, cursor bootstrap, and message
//! sync. An external collaborator from the core's point of view — this crate
//! only shapes the wire contract and maps vendor errors into `CoreError`.

pub mod client;
pub mod http_client;
pub mod mock;
pub mod model;

pub use client::VendorClient;
pub use http_client::HttpVendorClient;
pub use mock::{text_message, MockVendorClient};
pub use model::{
    BootstrapResponse, MessageOrigin, Payload, RawEvent, SyncResponse, TenantCredentials, UserMessage,
};
