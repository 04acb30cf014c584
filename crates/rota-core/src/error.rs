//! Error types for rota-core

use thiserror::Error;

/// Result type alias using rota-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rota-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue store error
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure of a single durable queue mutation.
///
/// Every variant leaves previously stored records untouched.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The queue reached its configured capacity.
    #[error("Queue storage is full (capacity: {capacity})")]
    Full { capacity: usize },

    /// The device has no space left for the database.
    #[error("Device storage is full")]
    DiskFull,

    /// The record payload could not be encoded.
    #[error("Failed to encode queue record: {0}")]
    Serialization(String),

    /// The backing database rejected the write.
    #[error("Queue storage failure: {0}")]
    Backend(String),
}

/// Reasons a capture is rejected before it reaches the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Barcode cannot be empty")]
    EmptyBarcode,
    #[error("Barcode '{0}' does not match the expected identifier format")]
    MalformedBarcode(String),
    #[error("Scanned barcode '{scanned}' does not match order '{expected}'")]
    BarcodeMismatch { scanned: String, expected: String },
    #[error("Receiver name is required")]
    MissingReceiverName,
    #[error("Failure reason is required")]
    MissingFailureReason,
    #[error("A photo is required for this action")]
    MissingPhoto,
    #[error("Fields do not belong to a {0} action")]
    FieldsMismatch(&'static str),
}

/// Errors returned to the capturing screen by `enqueue`.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A record for the same barcode and kind is being synced right now.
    #[error("An action for {barcode} is being synced; try again after the sync finishes")]
    InFlight { barcode: String },
}

impl From<Error> for CaptureError {
    fn from(error: Error) -> Self {
        match error {
            Error::Storage(storage) => Self::Storage(storage),
            Error::Serialization(error) => {
                Self::Storage(StorageError::Serialization(error.to_string()))
            }
            other => Self::Storage(StorageError::Backend(other.to_string())),
        }
    }
}

/// Errors that abort a whole drain pass.
///
/// Per-record problems never surface here; they land in the `SyncReport`.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A drain is already running")]
    DrainInProgress,

    #[error(transparent)]
    Core(#[from] Error),
}
