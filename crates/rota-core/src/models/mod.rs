//! Data models for Rota

mod action;
mod capture;
mod handled;
mod status;

pub use action::{
    ActionFields, ActionKind, ActionRecord, FailureReason, PhotoAsset, ReceiverType, RecordId,
    RemoteRef, SyncState,
};
pub use capture::{normalize_barcode, CaptureRequest, CaptureValidator, DEFAULT_BARCODE_PATTERN};
pub use handled::HandledEntry;
pub use status::{OrderStatus, RemoteOrder};
