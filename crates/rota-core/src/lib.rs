//! rota-core - Core library for Rota
//!
//! Offline-first courier actions: captures are validated and persisted to a
//! local queue first, then replayed against the remote order ledger by the
//! sync engine. The handled-barcode cache lets the capture screen hide
//! orders the courier already acted on before any sync happens.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod storage;
pub mod sync;
pub mod util;

pub use cache::LedgerCache;
pub use config::{CourierIdentity, RemoteConfig, SyncSettings};
pub use error::{CaptureError, Error, Result, StorageError, SyncError, ValidationError};
pub use models::{
    ActionFields, ActionKind, ActionRecord, CaptureRequest, FailureReason, OrderStatus,
    ReceiverType, RecordId, SyncState,
};
pub use services::CourierQueue;
pub use sync::{DrainControl, RecordOutcome, SyncReport};
