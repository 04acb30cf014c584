use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] rota_core::Error),
    #[error(transparent)]
    Capture(#[from] rota_core::CaptureError),
    #[error(transparent)]
    Sync(#[from] rota_core::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid record ID: {0}")]
    InvalidRecordId(String),
    #[error("Photo path is not valid UTF-8: {0}")]
    InvalidPhotoPath(String),
    #[error("Could not resolve a data directory; pass --db-path or set ROTA_DB_PATH")]
    NoDataDir,
    #[error(
        "Remote ledger is not configured. Set ROTA_LEDGER_URL, ROTA_LEDGER_API_KEY and ROTA_COURIER_ID."
    )]
    RemoteNotConfigured,
}
