//! Process wiring for the messaging relay binary: leader election over the
//! raw-callback pipeline (components B/C), the consumer runtime (components
//! E/F/G), and the dev-only admin HTTP surface (`/healthz`, `/readyz`,
//! `/stress`, `/stop`). Exposed as a library so the wiring itself is
//! testable without a live broker or etcd cluster.

pub mod driver;
pub mod http;
pub mod pipeline;
