//! In-memory asset store for tests and offline demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{AssetError, AssetStore};
use crate::models::RemoteRef;

#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryAssetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `put` fail with `NetworkUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful uploads so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl AssetStore for MemoryAssetStore {
    async fn put(
        &self,
        name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<RemoteRef, AssetError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AssetError::NetworkUnavailable(
                "memory store is offline".to_string(),
            ));
        }

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteRef(format!("memory://{name}")))
    }
}
