//! Courier-facing queue service shared by every client.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache::LedgerCache;
use crate::config::SyncSettings;
use crate::db::{Database, LibSqlQueueRepository, QueueRepository};
use crate::error::{CaptureError, StorageError, SyncError};
use crate::models::{ActionRecord, CaptureRequest, CaptureValidator, HandledEntry, RecordId};
use crate::remote::RemoteLedger;
use crate::storage::AssetStore;
use crate::sync::{DrainControl, SyncEngine, SyncReport};
use crate::{Error, Result};

/// Capture, inspect and drain the action queue.
///
/// Cloning is cheap and every clone shares the same database, cache and
/// drain guard, so a background drain and the capture screen can hold one
/// each.
pub struct CourierQueue<L, S> {
    db: Arc<Mutex<Database>>,
    cache: Arc<LedgerCache>,
    engine: Arc<SyncEngine<L, S>>,
    validator: Arc<CaptureValidator>,
    draining: Arc<AtomicBool>,
    db_path: Option<PathBuf>,
}

impl<L, S> Clone for CourierQueue<L, S> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            cache: Arc::clone(&self.cache),
            engine: Arc::clone(&self.engine),
            validator: Arc::clone(&self.validator),
            draining: Arc::clone(&self.draining),
            db_path: self.db_path.clone(),
        }
    }
}

/// Resets the drain flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<L: RemoteLedger, S: AssetStore> CourierQueue<L, S> {
    /// Open the queue stored at `db_path`, creating it when missing.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        ledger: L,
        store: S,
        settings: SyncSettings,
        courier_id: impl Into<String>,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        let mut queue = Self::from_database(db, ledger, store, settings, courier_id).await?;
        queue.db_path = Some(db_path);
        Ok(queue)
    }

    /// Open an in-memory queue (primarily for tests).
    pub async fn open_in_memory(
        ledger: L,
        store: S,
        settings: SyncSettings,
        courier_id: impl Into<String>,
    ) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db, ledger, store, settings, courier_id).await
    }

    async fn from_database(
        db: Database,
        ledger: L,
        store: S,
        settings: SyncSettings,
        courier_id: impl Into<String>,
    ) -> Result<Self> {
        settings.validate()?;
        let validator = CaptureValidator::new(&settings.barcode_pattern)?;
        let cache = Arc::new(LedgerCache::load(db.connection()).await?);
        let db = Arc::new(Mutex::new(db));
        let engine = SyncEngine::new(
            Arc::clone(&db),
            Arc::clone(&cache),
            ledger,
            store,
            settings,
            courier_id,
        );
        engine.recover_in_flight().await?;

        Ok(Self {
            db,
            cache,
            engine: Arc::new(engine),
            validator: Arc::new(validator),
            draining: Arc::new(AtomicBool::new(false)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn settings(&self) -> &SyncSettings {
        self.engine.settings()
    }

    /// Validate a capture and persist it before returning.
    ///
    /// A second capture for the same barcode and kind replaces the queued
    /// one in place, keeping its id and queue position.
    pub async fn enqueue(
        &self,
        request: CaptureRequest,
    ) -> std::result::Result<RecordId, CaptureError> {
        let record = self.validator.validate(request)?;

        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let id = if let Some(existing) = repo.find_open(&record.barcode, record.kind).await? {
            if existing.sync_state.is_in_flight() {
                return Err(CaptureError::InFlight {
                    barcode: record.barcode,
                });
            }
            let replacement = ActionRecord {
                id: existing.id,
                seq: existing.seq,
                ..record.clone()
            };
            repo.replace(&existing.id, &replacement).await?;
            tracing::info!(
                "Replaced queued {} for {} ({})",
                record.kind,
                record.barcode,
                existing.id
            );
            existing.id
        } else {
            let capacity = self.engine.settings().max_queue_len;
            if repo.count().await? >= capacity {
                return Err(StorageError::Full { capacity }.into());
            }
            let id = repo.append(&record).await?;
            tracing::info!("Queued {} for {} ({id})", record.kind, record.barcode);
            id
        };

        self.cache.mark_local(db.connection(), &record.barcode).await?;
        Ok(id)
    }

    /// Drain the queue once. Only one drain runs at a time.
    pub async fn drain(&self) -> std::result::Result<SyncReport, SyncError> {
        self.drain_with(&DrainControl::new()).await
    }

    /// Drain with a control handle that can cancel between records.
    pub async fn drain_with(
        &self,
        control: &DrainControl,
    ) -> std::result::Result<SyncReport, SyncError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::DrainInProgress);
        }
        let _guard = DrainGuard(&self.draining);

        Ok(self.engine.drain(control).await?)
    }

    /// Whether the barcode was already handled locally or remotely.
    pub fn is_handled(&self, barcode: &str) -> bool {
        self.cache.is_handled(barcode)
    }

    pub fn handled_entry(&self, barcode: &str) -> Option<HandledEntry> {
        self.cache.entry(barcode)
    }

    /// Every queued record in capture order, failed ones included.
    pub async fn list(&self) -> Result<Vec<ActionRecord>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).list().await
    }

    pub async fn failed(&self) -> Result<Vec<ActionRecord>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .list_failed()
            .await
    }

    /// Drop a failed record. Records still being retried cannot be discarded.
    pub async fn discard(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let record = repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if !record.sync_state.is_failed() {
            return Err(Error::InvalidInput(format!(
                "Record {id} is {} and cannot be discarded",
                record.sync_state.tag()
            )));
        }
        repo.remove(id).await?;
        tracing::info!("Discarded failed {} for {} ({id})", record.kind, record.barcode);
        Ok(())
    }

    /// Forget every handled barcode.
    pub async fn reset_all(&self) -> Result<()> {
        let db = self.db.lock().await;
        self.cache.reset_all(db.connection()).await
    }

    /// Recompute local marks from the current queue.
    pub async fn rebuild_cache(&self) -> Result<()> {
        let db = self.db.lock().await;
        let records = LibSqlQueueRepository::new(db.connection()).list().await?;
        self.cache.rebuild(db.connection(), &records).await
    }

    /// Ask the ledger about every locally handled but unconfirmed barcode
    /// and confirm the ones that reached a terminal status.
    ///
    /// Returns the confirmed barcodes. Lookup failures are logged and left
    /// for the next pass.
    pub async fn reconcile(&self) -> Result<Vec<String>> {
        let mut confirmed = Vec::new();
        for barcode in self.cache.unconfirmed() {
            match self.engine.ledger().fetch_status(&barcode).await {
                Ok(Some(order)) if order.status.is_terminal() => {
                    let db = self.db.lock().await;
                    self.cache.confirm(db.connection(), &barcode).await?;
                    confirmed.push(barcode);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!("Could not reconcile {barcode}: {error}");
                }
            }
        }
        tracing::info!("Reconciled {} handled barcodes", confirmed.len());
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionFields, ActionKind, OrderStatus, ReceiverType, SyncState};
    use crate::remote::MemoryLedger;
    use crate::storage::MemoryAssetStore;
    use crate::ValidationError;
    use pretty_assertions::assert_eq;

    type TestQueue = CourierQueue<Arc<MemoryLedger>, Arc<MemoryAssetStore>>;

    async fn queue_with(settings: SyncSettings) -> (TestQueue, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let queue = CourierQueue::open_in_memory(
            ledger.clone(),
            Arc::new(MemoryAssetStore::new()),
            settings,
            "courier-7",
        )
        .await
        .unwrap();
        (queue, ledger)
    }

    fn collection(barcode: &str) -> CaptureRequest {
        CaptureRequest {
            barcode: barcode.to_string(),
            expected_barcode: None,
            kind: ActionKind::Collection,
            fields: ActionFields::Empty,
            photo_path: None,
        }
    }

    fn failed_attempt(barcode: &str, reason: &str) -> CaptureRequest {
        CaptureRequest {
            barcode: barcode.to_string(),
            expected_barcode: None,
            kind: ActionKind::FailedAttempt,
            fields: ActionFields::Failure {
                reason: reason.to_string(),
            },
            photo_path: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_persists_and_marks_handled() {
        let (queue, _) = queue_with(SyncSettings::default()).await;
        let id = queue.enqueue(collection("col00001")).await.unwrap();

        let records = queue.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].barcode, "COL00001");
        assert!(queue.is_handled("COL00001"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_capture_leaves_queue_and_cache_untouched() {
        let (queue, _) = queue_with(SyncSettings::default()).await;
        let err = queue
            .enqueue(CaptureRequest {
                barcode: "ABC12345".to_string(),
                expected_barcode: None,
                kind: ActionKind::Delivery,
                fields: ActionFields::Receiver {
                    receiver_name: "Maria".to_string(),
                    receiver_type: ReceiverType::Family,
                },
                photo_path: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CaptureError::Validation(ValidationError::MissingPhoto)
        ));
        assert!(queue.list().await.unwrap().is_empty());
        assert!(!queue.is_handled("ABC12345"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recapture_replaces_in_place() {
        let (queue, _) = queue_with(SyncSettings::default()).await;
        let first = queue
            .enqueue(failed_attempt("FAL00001", "closed"))
            .await
            .unwrap();
        queue.enqueue(collection("COL00001")).await.unwrap();
        let second = queue
            .enqueue(failed_attempt("FAL00001", "nobody home"))
            .await
            .unwrap();

        assert_eq!(first, second);
        let records = queue.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].barcode, "FAL00001");
        assert_eq!(
            records[0].fields,
            ActionFields::Failure {
                reason: "nobody home".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_rejects_new_barcodes() {
        let settings = SyncSettings {
            max_queue_len: 1,
            ..SyncSettings::default()
        };
        let (queue, _) = queue_with(settings).await;
        queue.enqueue(collection("COL00001")).await.unwrap();

        let err = queue.enqueue(collection("COL00002")).await.unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Storage(StorageError::Full { capacity: 1 })
        ));
        // Replacing an existing record still works at capacity.
        queue.enqueue(collection("COL00001")).await.unwrap();
        assert_eq!(queue.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn discard_only_accepts_failed_records() {
        let settings = SyncSettings {
            max_attempts: 1,
            ..SyncSettings::default()
        };
        let (queue, ledger) = queue_with(settings).await;
        let id = queue.enqueue(collection("COL00001")).await.unwrap();

        assert!(matches!(
            queue.discard(&id).await,
            Err(Error::InvalidInput(_))
        ));

        ledger.set_offline(true);
        let report = queue.drain().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(queue.failed().await.unwrap().len(), 1);

        queue.discard(&id).await.unwrap();
        assert!(queue.list().await.unwrap().is_empty());
        assert!(queue.is_handled("COL00001"));
        assert!(matches!(queue.discard(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recapture_revives_a_failed_record() {
        let settings = SyncSettings {
            max_attempts: 1,
            ..SyncSettings::default()
        };
        let (queue, ledger) = queue_with(settings).await;
        ledger.insert("COL00001", OrderStatus::AguardandoColeta);
        ledger.set_offline(true);
        let id = queue.enqueue(collection("COL00001")).await.unwrap();
        queue.drain().await.unwrap();
        assert!(queue.list().await.unwrap()[0].sync_state.is_failed());

        assert_eq!(queue.enqueue(collection("COL00001")).await.unwrap(), id);
        assert_eq!(queue.list().await.unwrap()[0].sync_state, SyncState::Pending);

        ledger.set_offline(false);
        let report = queue.drain().await.unwrap();
        assert_eq!(report.applied.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_drain_is_rejected() {
        let (queue, _) = queue_with(SyncSettings::default()).await;
        queue.draining.store(true, Ordering::SeqCst);
        assert!(matches!(
            queue.drain().await,
            Err(SyncError::DrainInProgress)
        ));

        queue.draining.store(false, Ordering::SeqCst);
        assert!(queue.drain().await.unwrap().is_empty());
        assert!(!queue.draining.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconcile_confirms_terminal_barcodes() {
        let (queue, ledger) = queue_with(SyncSettings::default()).await;
        queue.enqueue(collection("COL00001")).await.unwrap();
        queue.enqueue(collection("COL00002")).await.unwrap();
        ledger.insert("COL00001", OrderStatus::Entregue);
        ledger.insert("COL00002", OrderStatus::AguardandoColeta);

        let confirmed = queue.reconcile().await.unwrap();
        assert_eq!(confirmed, vec!["COL00001".to_string()]);
        assert!(queue.handled_entry("COL00001").unwrap().remotely_synced);
        assert!(!queue.handled_entry("COL00002").unwrap().remotely_synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_and_rebuild_cache() {
        let (queue, _) = queue_with(SyncSettings::default()).await;
        queue.enqueue(collection("COL00001")).await.unwrap();

        queue.reset_all().await.unwrap();
        assert!(!queue.is_handled("COL00001"));

        queue.rebuild_cache().await.unwrap();
        assert!(queue.is_handled("COL00001"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rota.db");
        let queue: TestQueue = CourierQueue::open_path(
            &path,
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryAssetStore::new()),
            SyncSettings::default(),
            "courier-7",
        )
        .await
        .unwrap();

        assert_eq!(queue.db_path(), Some(path.as_path()));
        assert!(path.exists());
    }
}
