//! Photo uploader.

use std::path::Path;

use super::{AssetError, AssetStore};
use crate::models::{ActionKind, RemoteRef};

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Deterministic object name for an action's photo.
///
/// Re-uploading the same barcode and kind always targets the same name, so
/// a repeated upload overwrites instead of leaving orphans behind.
#[must_use]
pub fn target_name(barcode: &str, kind: ActionKind) -> String {
    format!("entregas/{}-{}.jpg", barcode.trim().to_uppercase(), kind.slug())
}

/// Reads local photos and pushes them to an [`AssetStore`].
#[derive(Debug, Clone)]
pub struct AssetUploader<S> {
    store: S,
    max_bytes: u64,
}

impl<S: AssetStore> AssetUploader<S> {
    pub const fn new(store: S, max_bytes: u64) -> Self {
        Self { store, max_bytes }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Upload the file at `local_path` under `target_name`.
    pub async fn upload(
        &self,
        local_path: &str,
        target_name: &str,
    ) -> Result<RemoteRef, AssetError> {
        let path = Path::new(local_path);
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|error| AssetError::Encoding(format!("{local_path}: {error}")))?;
        if metadata.len() > self.max_bytes {
            return Err(AssetError::AssetTooLarge {
                size: metadata.len(),
                limit: self.max_bytes,
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|error| AssetError::Encoding(format!("{local_path}: {error}")))?;
        if bytes.is_empty() {
            return Err(AssetError::Encoding(format!("{local_path} is empty")));
        }

        let content_type = mime_guess::from_path(path)
            .first_raw()
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        tracing::debug!(
            "Uploading {local_path} ({} bytes) as {target_name}",
            bytes.len()
        );
        self.store.put(target_name, bytes, content_type).await
    }
}
