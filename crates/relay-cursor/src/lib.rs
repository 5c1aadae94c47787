//! Durable vendor-sync cursor: a CAS-guarded remote store plus a local
//! dirty-shadow, combined into the `CursorRuntime` the raw-callback pipeline
//! drives (§4.1, §4.3).

pub mod backend;
pub mod etcd_backend;
pub mod memory_backend;
pub mod model;
pub mod runtime;
pub mod shadow;

pub use backend::CursorBackend;
pub use etcd_backend::EtcdCursorBackend;
pub use memory_backend::MemoryCursorBackend;
pub use model::{AcquireOutcome, CasOutcome, CursorRecord, LeaderLease, RenewOutcome};
pub use runtime::CursorRuntime;
pub use shadow::ShadowStore;
