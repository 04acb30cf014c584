//! Queue drain loop.
//!
//! Records are grouped by barcode. Groups run concurrently up to
//! `max_workers`; inside a group records are handled strictly in capture
//! order, and a record that has to wait holds back the rest of its group.
//! The database lock is only taken for short local writes, never across a
//! network call.
//!
//! The drain works from a snapshot, but each record is re-read and claimed
//! under the lock before any network work, so a re-capture that lands
//! after the snapshot is what gets synced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;

use super::report::{RecordOutcome, SyncReport};
use super::resolver::{resolve, retry_or_fail, RemoteLookup, Resolution, RetryReason, SkipReason};
use crate::cache::LedgerCache;
use crate::config::SyncSettings;
use crate::db::{Database, LibSqlQueueRepository, QueueRepository};
use crate::models::{ActionRecord, FailureReason, PhotoAsset, SyncState};
use crate::remote::{ApplyOutcome, ApplyRequest, RemoteLedger};
use crate::storage::{target_name, AssetStore, AssetUploader};
use crate::util::now_millis;
use crate::Result;

/// Cooperative cancellation for a running drain.
///
/// Checked between records; a record already in progress finishes first.
#[derive(Debug, Clone, Default)]
pub struct DrainControl {
    cancelled: Arc<AtomicBool>,
}

impl DrainControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Terminal result of processing one record in this pass.
enum Step {
    Applied,
    Skipped(String),
    Conflict(String),
    Retry(String),
    Failed(String),
    /// The row changed or vanished since the snapshot; left for a later pass.
    Released(String),
}

pub struct SyncEngine<L, S> {
    db: Arc<Mutex<Database>>,
    cache: Arc<LedgerCache>,
    ledger: L,
    uploader: AssetUploader<S>,
    settings: SyncSettings,
    courier_id: String,
}

impl<L: RemoteLedger, S: AssetStore> SyncEngine<L, S> {
    pub fn new(
        db: Arc<Mutex<Database>>,
        cache: Arc<LedgerCache>,
        ledger: L,
        store: S,
        settings: SyncSettings,
        courier_id: impl Into<String>,
    ) -> Self {
        let uploader = AssetUploader::new(store, settings.max_photo_bytes);
        Self {
            db,
            cache,
            ledger,
            uploader,
            settings,
            courier_id: courier_id.into(),
        }
    }

    pub const fn ledger(&self) -> &L {
        &self.ledger
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Put records a crashed process left `Uploading`/`Applying` back to
    /// `Pending`.
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let recovered = LibSqlQueueRepository::new(db.connection())
            .reset_in_flight()
            .await?;
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted queue records");
        }
        Ok(recovered)
    }

    /// Run one pass over the queue.
    pub async fn drain(&self, control: &DrainControl) -> Result<SyncReport> {
        let records = {
            let db = self.db.lock().await;
            let repo = LibSqlQueueRepository::new(db.connection());
            let mut open = Vec::new();
            for record in repo.list().await? {
                match record.sync_state {
                    SyncState::Synced => {
                        // Confirmed before an interrupted removal.
                        self.cache.confirm(db.connection(), &record.barcode).await?;
                        repo.remove(&record.id).await?;
                    }
                    SyncState::Failed(_) => {}
                    _ => open.push(record),
                }
            }
            open
        };

        let groups = group_by_barcode(records);
        tracing::info!(
            "Draining {} barcode groups with up to {} workers",
            groups.len(),
            self.settings.max_workers
        );

        let now_ms = now_millis();
        let reports: Vec<SyncReport> = stream::iter(groups)
            .map(|group| self.drain_group(group, control, now_ms))
            .buffer_unordered(self.settings.max_workers.max(1))
            .collect()
            .await;

        let mut report = SyncReport::default();
        for partial in reports {
            report.merge(partial);
        }
        tracing::info!(
            "Drain finished: {} applied, {} skipped, {} conflicts, {} failed, {} retrying, {} deferred{}",
            report.applied.len(),
            report.skipped.len(),
            report.conflicts.len(),
            report.failed.len(),
            report.retrying.len(),
            report.deferred.len(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    async fn drain_group(
        &self,
        records: Vec<ActionRecord>,
        control: &DrainControl,
        now_ms: i64,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut records = records.into_iter();

        while let Some(record) = records.next() {
            if control.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if !record.is_due(now_ms) {
                report
                    .deferred
                    .push(RecordOutcome::new(&record, "waiting for backoff"));
                defer_rest(&mut report, records);
                break;
            }

            let step = match self.process(&record).await {
                Ok(step) => step,
                Err(error) => {
                    tracing::warn!("Local store error while syncing {}: {error}", record.id);
                    Step::Retry(format!("local store error: {error}"))
                }
            };

            match step {
                Step::Applied => report
                    .applied
                    .push(RecordOutcome::new(&record, "applied")),
                Step::Skipped(detail) => report.skipped.push(RecordOutcome::new(&record, detail)),
                Step::Conflict(detail) => {
                    report.conflicts.push(RecordOutcome::new(&record, detail));
                }
                Step::Failed(detail) => report.failed.push(RecordOutcome::new(&record, detail)),
                Step::Retry(detail) => {
                    report.retrying.push(RecordOutcome::new(&record, detail));
                    defer_rest(&mut report, records);
                    break;
                }
                Step::Released(detail) => {
                    report.deferred.push(RecordOutcome::new(&record, detail));
                    defer_rest(&mut report, records);
                    break;
                }
            }
        }

        report
    }

    async fn process(&self, snapshot: &ActionRecord) -> Result<Step> {
        let Some(mut record) = self.claim(snapshot).await? else {
            return Ok(Step::Released("changed since the drain started".to_string()));
        };

        if let Some(photo) = record.photo.clone().filter(|photo| !photo.is_uploaded()) {
            if let Some(step) = self.upload_photo(&mut record, &photo).await? {
                return Ok(step);
            }
            self.set_state(&record, &SyncState::Applying).await?;
        }

        let lookup = self.lookup(&record.barcode).await;
        let now_ms = now_millis();
        let resolution = resolve(&record, &lookup, &self.courier_id, &self.settings, now_ms);

        let resolution = if resolution == Resolution::Apply {
            match self.ledger.apply(&self.apply_request(&record)).await {
                Ok(ApplyOutcome::Applied) => return self.finish(&record, Step::Applied).await,
                Ok(ApplyOutcome::Conflict) => {
                    tracing::debug!("Order {} moved during apply; re-checking", record.barcode);
                    let lookup = self.lookup(&record.barcode).await;
                    let now_ms = now_millis();
                    match resolve(&record, &lookup, &self.courier_id, &self.settings, now_ms) {
                        Resolution::Apply => retry_or_fail(
                            &record,
                            RetryReason::Stale("order changed while applying".to_string()),
                            &self.settings,
                            now_ms,
                        ),
                        other => other,
                    }
                }
                Err(error) if error.is_retryable() => retry_or_fail(
                    &record,
                    RetryReason::Network(error.to_string()),
                    &self.settings,
                    now_millis(),
                ),
                Err(error) => Resolution::Fail(FailureReason::Rejected(error.to_string())),
            }
        } else {
            resolution
        };

        self.settle(&record, resolution).await
    }

    /// Re-read the record and move it in flight in one critical section.
    ///
    /// Once claimed, `enqueue` rejects re-captures of it as in flight.
    async fn claim(&self, snapshot: &ActionRecord) -> Result<Option<ActionRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let Some(mut record) = repo.get(&snapshot.id).await? else {
            return Ok(None);
        };
        if record.sync_state != SyncState::Pending {
            return Ok(None);
        }

        let state = if record.needs_upload() {
            SyncState::Uploading
        } else {
            SyncState::Applying
        };
        if !repo.claim(&record.id, record.revision, &state).await? {
            return Ok(None);
        }
        if record.revision != snapshot.revision {
            tracing::debug!("Record {} was re-captured after the snapshot", record.id);
        }
        tracing::debug!("Record {} -> {}", record.id, state.tag());
        record.sync_state = state;
        Ok(Some(record))
    }

    /// Upload the photo and persist its reference. `Some(step)` ends the
    /// record's turn without applying.
    async fn upload_photo(
        &self,
        record: &mut ActionRecord,
        photo: &PhotoAsset,
    ) -> Result<Option<Step>> {
        let name = target_name(&record.barcode, record.kind);

        match self.uploader.upload(&photo.local_path, &name).await {
            Ok(remote_ref) => {
                {
                    let db = self.db.lock().await;
                    LibSqlQueueRepository::new(db.connection())
                        .set_photo_ref(&record.id, &remote_ref)
                        .await?;
                }
                tracing::debug!("Uploaded photo for {} as {remote_ref}", record.id);
                if let Some(photo) = record.photo.as_mut() {
                    photo.remote_ref = Some(remote_ref);
                }
                Ok(None)
            }
            Err(error) if error.is_retryable() => {
                let resolution = retry_or_fail(
                    record,
                    RetryReason::Network(error.to_string()),
                    &self.settings,
                    now_millis(),
                );
                self.settle(record, resolution).await.map(Some)
            }
            Err(error) => self
                .settle(
                    record,
                    Resolution::Fail(FailureReason::Asset(error.to_string())),
                )
                .await
                .map(Some),
        }
    }

    async fn lookup(&self, barcode: &str) -> RemoteLookup {
        match self.ledger.fetch_status(barcode).await {
            Ok(Some(order)) => RemoteLookup::Found(order),
            Ok(None) => RemoteLookup::Missing,
            Err(error) => RemoteLookup::Unavailable(error),
        }
    }

    fn apply_request(&self, record: &ActionRecord) -> ApplyRequest {
        ApplyRequest {
            barcode: record.barcode.clone(),
            expected: record.kind.precondition(),
            new_status: record.kind.target(),
            fields: record.fields.clone(),
            photo_ref: record.photo_ref().cloned(),
            courier_id: self.courier_id.clone(),
            occurred_at: record.created_at,
        }
    }

    /// Persist a non-apply verdict.
    async fn settle(&self, record: &ActionRecord, resolution: Resolution) -> Result<Step> {
        match resolution {
            Resolution::Apply => Ok(Step::Retry("apply not attempted".to_string())),
            Resolution::Skip(SkipReason::AlreadyApplied) => {
                self.finish(
                    record,
                    Step::Skipped(format!("remote already '{}'", record.kind.target())),
                )
                .await
            }
            Resolution::Skip(SkipReason::Conflict { remote }) => {
                tracing::warn!(
                    "Discarding {} {} for {}: remote is already '{remote}'",
                    record.kind,
                    record.id,
                    record.barcode
                );
                self.finish(record, Step::Conflict(format!("remote is already '{remote}'")))
                    .await
            }
            Resolution::RetryLater {
                reason,
                attempts,
                next_attempt_at,
            } => {
                tracing::warn!(
                    "Retrying {} for {} later (attempt {attempts}): {}",
                    record.id,
                    record.barcode,
                    reason.detail()
                );
                let db = self.db.lock().await;
                LibSqlQueueRepository::new(db.connection())
                    .record_retry(&record.id, attempts, next_attempt_at, reason.detail())
                    .await?;
                Ok(Step::Retry(reason.detail().to_string()))
            }
            Resolution::Fail(reason) => {
                tracing::warn!(
                    "Giving up on {} for {}: {reason}",
                    record.id,
                    record.barcode
                );
                self.set_state(record, &SyncState::Failed(reason.clone()))
                    .await?;
                Ok(Step::Failed(reason.to_string()))
            }
        }
    }

    /// Mark synced, confirm the barcode and drop the record.
    ///
    /// The row is only dropped while it still holds the revision that was
    /// synced; a newer capture stays queued.
    async fn finish(&self, record: &ActionRecord, step: Step) -> Result<Step> {
        let db = self.db.lock().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        self.cache.confirm(db.connection(), &record.barcode).await?;
        if !repo.mark_synced(&record.id, record.revision).await? {
            tracing::warn!(
                "Record {} for {} changed while syncing; keeping the newer capture",
                record.id,
                record.barcode
            );
            return Ok(step);
        }
        repo.remove(&record.id).await?;
        tracing::debug!("Record {} for {} left the queue", record.id, record.barcode);
        Ok(step)
    }

    async fn set_state(&self, record: &ActionRecord, state: &SyncState) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .set_state(&record.id, state)
            .await?;
        tracing::debug!("Record {} -> {}", record.id, state.tag());
        Ok(())
    }
}

fn defer_rest(report: &mut SyncReport, rest: impl Iterator<Item = ActionRecord>) {
    report
        .deferred
        .extend(rest.map(|later| RecordOutcome::new(&later, "waiting on earlier action")));
}

/// Group records by barcode, ordered by each barcode's first appearance.
fn group_by_barcode(records: Vec<ActionRecord>) -> Vec<Vec<ActionRecord>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<ActionRecord>> = Vec::new();
    for record in records {
        if let Some(&slot) = index.get(&record.barcode) {
            groups[slot].push(record);
        } else {
            index.insert(record.barcode.clone(), groups.len());
            groups.push(vec![record]);
        }
    }
    groups
}
