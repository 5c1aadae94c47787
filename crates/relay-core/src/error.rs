//! Shared error taxonomy threaded through every fallible boundary in the relay.
//!
//! Every component converts its local error type `Into<CoreError>` at the seam so
//! call sites never match on foreign error types; only `ErrorCategory` matters for
//! deciding retry/backoff and log level.

use std::fmt;

/// Stable error codes, namespaced `<domain>.<reason>`.
///
/// Codes are referenced by log queries and alerts, so once published they are
/// never renamed or reused for a different meaning.
pub mod codes {
    pub const CURSOR_TRANSPORT: &str = "cursor.transport";
    pub const CURSOR_CAS_CONFLICT: &str = "cursor.cas_conflict";
    pub const CURSOR_NOT_LEADER: &str = "cursor.not_leader";
    pub const CURSOR_SHADOW_IO: &str = "cursor.shadow_io";
    pub const LEADER_LOST: &str = "leader.lost";
    pub const LEADER_ACQUIRE_FAILED: &str = "leader.acquire_failed";
    pub const VENDOR_TRANSPORT: &str = "vendor.transport";
    pub const VENDOR_AUTH: &str = "vendor.auth";
    pub const VENDOR_RATE_LIMIT: &str = "vendor.rate_limit";
    pub const VENDOR_MALFORMED: &str = "vendor.malformed";
    pub const DISPATCH_PUBLISH: &str = "dispatch.publish";
    pub const RECORD_DECODE: &str = "record.decode";
    pub const MAILBOX_FULL: &str = "processor.mailbox_full";
    pub const CONFIG_PARSE: &str = "config.parse";
    pub const CONSUMER_FATAL: &str = "consumer.fatal";
}

/// Coarse category driving retry policy and log severity. Every `CoreError`
/// carries exactly one; components match on this, never on `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network/IO failure talking to an external system. Retryable with backoff.
    Transport,
    /// Payload failed to parse/decode. Not retryable; drop or dead-letter.
    Decode,
    /// A compare-and-swap lost a race against a fresher writer. Retryable
    /// a bounded number of times after reloading the authoritative value.
    Conflict,
    /// The caller no longer holds the leadership lease. Not retryable locally;
    /// the leader driver must abandon the current body and re-acquire.
    NotLeader,
    /// A bounded resource (mailbox, inflight window) is full. Caller should
    /// apply backpressure and try again later, not treat this as failure.
    Backpressure,
    /// Caller-supplied input or configuration was invalid. Not recoverable
    /// without a code or config change.
    Invalid,
    /// Unrecoverable within this process; the component exits and relies on
    /// a supervisor to restart it.
    Fatal,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Transport | ErrorCategory::Conflict)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Decode => "decode",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotLeader => "not_leader",
            ErrorCategory::Backpressure => "backpressure",
            ErrorCategory::Invalid => "invalid",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

/// The relay's single error type. Carries a stable code, a message meant for
/// operators, an optional source, and the category that decides what happens
/// next.
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: String,
    category: ErrorCategory,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CoreError {
    pub fn new(code: &'static str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn transport(code: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(code, ErrorCategory::Transport, source.to_string()).with_source(source)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.category.as_str(), self.message)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
