//! Photo asset storage backends and the uploader used by the sync engine.

mod http;
mod memory;
mod r2;
mod uploader;

use thiserror::Error;

use crate::models::RemoteRef;

pub use http::HttpAssetStore;
pub use memory::MemoryAssetStore;
pub use r2::{R2AssetStore, R2Config};
pub use uploader::{target_name, AssetUploader};

/// Upload failures.
///
/// Only `NetworkUnavailable` is worth retrying; the others mean the photo
/// or the store configuration has to be fixed first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("Asset store unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("Photo is {size} bytes, above the {limit} byte limit")]
    AssetTooLarge { size: u64, limit: u64 },

    #[error("Photo could not be read or encoded: {0}")]
    Encoding(String),

    /// The store refused the upload: bad credentials, missing bucket or a
    /// size limit on its side.
    #[error("Asset store rejected the upload: {0}")]
    Rejected(String),
}

impl AssetError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }
}

/// Object store that accepts photo bytes under a caller-chosen name.
///
/// `put` has overwrite semantics: storing the same name twice replaces the
/// first object and yields the same reference.
#[allow(async_fn_in_trait)]
pub trait AssetStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<RemoteRef, AssetError>;
}

impl<T: AssetStore> AssetStore for &T {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<RemoteRef, AssetError> {
        (**self).put(name, bytes, content_type).await
    }
}

impl<T: AssetStore> AssetStore for std::sync::Arc<T> {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<RemoteRef, AssetError> {
        (**self).put(name, bytes, content_type).await
    }
}

/// Map an HTTP status from an object store to an asset error.
///
/// Timeouts, throttling and server errors stay retryable; every other
/// client error is final.
pub(crate) fn classify_status(status: u16, message: String) -> AssetError {
    match status {
        413 => AssetError::Rejected(format!("HTTP 413: photo too large: {message}")),
        400 | 415 | 422 => AssetError::Encoding(format!("HTTP {status}: {message}")),
        408 | 429 => AssetError::NetworkUnavailable(format!("HTTP {status}: {message}")),
        400..=499 => AssetError::Rejected(format!("HTTP {status}: {message}")),
        _ => AssetError::NetworkUnavailable(format!("HTTP {status}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(AssetError::NetworkUnavailable("offline".into()).is_retryable());
        assert!(!AssetError::Encoding("bad".into()).is_retryable());
        assert!(!AssetError::AssetTooLarge { size: 2, limit: 1 }.is_retryable());
        assert!(!AssetError::Rejected("forbidden".into()).is_retryable());
    }

    #[test]
    fn classify_status_separates_client_and_server_errors() {
        assert!(matches!(
            classify_status(413, String::new()),
            AssetError::Rejected(_)
        ));
        assert!(matches!(
            classify_status(415, String::new()),
            AssetError::Encoding(_)
        ));
        assert!(classify_status(503, String::new()).is_retryable());
        assert!(classify_status(408, String::new()).is_retryable());
        assert!(classify_status(429, String::new()).is_retryable());
    }

    #[test]
    fn auth_and_missing_bucket_are_final() {
        for status in [401, 403, 404] {
            let error = classify_status(status, "denied".to_string());
            assert!(matches!(error, AssetError::Rejected(_)), "{status}");
            assert!(!error.is_retryable(), "{status}");
        }
    }
}
