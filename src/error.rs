//! Error types for payload-tier.

use thiserror::Error;

use crate::queue::request::{RequestId, RequestStatus};

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Which tenant limit rejected an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// `max_concurrent_requests` (Pending + Processing).
    Concurrent,
    /// `max_queued_requests` (Pending only).
    Queued,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaKind::Concurrent => write!(f, "concurrent"),
            QuotaKind::Queued => write!(f, "queued"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Admission rejected; the request was never created.
    #[error("Quota exceeded for tenant {tenant_id}: {kind} limit {limit}")]
    QuotaExceeded {
        tenant_id: String,
        kind: QuotaKind,
        limit: usize,
    },

    /// Unknown tenant, request or payload id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a dequeue race. Recovered inside the scheduler.
    #[error("Claim conflict on request {0}")]
    ClaimConflict(RequestId),

    /// The item is paused by the throttle gate.
    #[error("Request {0} is throttled")]
    Throttled(RequestId),

    /// The item exceeded its lifetime while Pending or stuck in Processing.
    #[error("Request {0} timed out")]
    Timeout(RequestId),

    /// Blob load/store failed during promotion or demotion.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A status change was requested from the wrong state or by the wrong worker.
    #[error("Request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<crate::blob::BlobError> for Error {
    fn from(e: crate::blob::BlobError) -> Self {
        Error::BackendUnavailable(e.to_string())
    }
}
