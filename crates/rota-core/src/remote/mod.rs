//! Remote order ledger: the authoritative store courier actions are applied to.

mod memory;
mod rest;

use thiserror::Error;

use crate::models::{ActionFields, OrderStatus, RemoteOrder, RemoteRef};

pub use memory::MemoryLedger;
pub use rest::RestLedgerClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote ledger unreachable: {0}")]
    Network(String),
    #[error("Remote ledger error: {message} ({status})")]
    Http { status: u16, message: String },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Transport failures, timeouts, throttling and server errors are
    /// transient; other HTTP errors and bad payloads are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            Self::InvalidPayload(_) => false,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A conditional status transition sent to the ledger.
///
/// The ledger only applies it while the order is still in `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub barcode: String,
    pub expected: OrderStatus,
    pub new_status: OrderStatus,
    pub fields: ActionFields,
    pub photo_ref: Option<RemoteRef>,
    pub courier_id: String,
    /// Capture time (Unix ms) recorded as the event date.
    pub occurred_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The order was no longer in the expected status.
    Conflict,
}

#[allow(async_fn_in_trait)]
pub trait RemoteLedger {
    /// Current state of an order, `None` when the ledger has no such barcode.
    async fn fetch_status(&self, barcode: &str) -> RemoteResult<Option<RemoteOrder>>;

    async fn apply(&self, request: &ApplyRequest) -> RemoteResult<ApplyOutcome>;
}

impl<T: RemoteLedger> RemoteLedger for &T {
    async fn fetch_status(&self, barcode: &str) -> RemoteResult<Option<RemoteOrder>> {
        (**self).fetch_status(barcode).await
    }

    async fn apply(&self, request: &ApplyRequest) -> RemoteResult<ApplyOutcome> {
        (**self).apply(request).await
    }
}

impl<T: RemoteLedger> RemoteLedger for std::sync::Arc<T> {
    async fn fetch_status(&self, barcode: &str) -> RemoteResult<Option<RemoteOrder>> {
        (**self).fetch_status(barcode).await
    }

    async fn apply(&self, request: &ApplyRequest) -> RemoteResult<ApplyOutcome> {
        (**self).apply(request).await
    }
}
