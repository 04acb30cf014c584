//! Durable action queue repository

use libsql::{params, Connection, Row};

use crate::error::{Error, Result, StorageError};
use crate::models::{
    ActionFields, ActionKind, ActionRecord, FailureReason, PhotoAsset, RecordId, RemoteRef,
    SyncState,
};

/// `SQLITE_FULL` primary result code
const SQLITE_FULL: i32 = 13;

const RECORD_COLUMNS: &str = "seq, id, barcode, kind, fields, photo_path, photo_ref, created_at,
     sync_state, failure, attempts, next_attempt_at, last_error, revision";

/// Trait for durable queue operations (async)
///
/// Every method is a single statement, so a mutation is either fully
/// persisted or not applied at all.
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Persist a new record at the tail of the queue
    async fn append(&self, record: &ActionRecord) -> Result<RecordId>;

    /// Overwrite the payload of an open record in place, keeping its id and
    /// position and bumping its revision
    async fn replace(&self, id: &RecordId, record: &ActionRecord) -> Result<()>;

    /// Remove a record; returns whether it existed
    async fn remove(&self, id: &RecordId) -> Result<bool>;

    /// Get a record by ID
    async fn get(&self, id: &RecordId) -> Result<Option<ActionRecord>>;

    /// All queued records, oldest first
    async fn list(&self) -> Result<Vec<ActionRecord>>;

    /// Records parked in `Failed`, oldest first
    async fn list_failed(&self) -> Result<Vec<ActionRecord>>;

    /// The unsynced record for a barcode and kind, if any
    async fn find_open(&self, barcode: &str, kind: ActionKind) -> Result<Option<ActionRecord>>;

    /// Number of queued records
    async fn count(&self) -> Result<usize>;

    /// Move a record to a new sync state
    async fn set_state(&self, id: &RecordId, state: &SyncState) -> Result<()>;

    /// Move a `Pending` record at `revision` into an in-flight state.
    /// Returns `false` when the row is gone, busy or was re-captured.
    async fn claim(&self, id: &RecordId, revision: u32, state: &SyncState) -> Result<bool>;

    /// Mark an in-flight record at `revision` as `Synced`.
    /// Returns `false` when the row no longer holds that revision.
    async fn mark_synced(&self, id: &RecordId, revision: u32) -> Result<bool>;

    /// Remember the uploaded photo location
    async fn set_photo_ref(&self, id: &RecordId, remote_ref: &RemoteRef) -> Result<()>;

    /// Put a record back to `Pending` with updated retry bookkeeping
    async fn record_retry(
        &self,
        id: &RecordId,
        attempts: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()>;

    /// Reset records left `Uploading`/`Applying` by an interrupted process
    async fn reset_in_flight(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ActionRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(&row)?);
        }
        Ok(records)
    }

    async fn update_one(
        &self,
        id: &RecordId,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<()> {
        let rows = self.conn.execute(sql, params).await.map_err(write_error)?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn append(&self, record: &ActionRecord) -> Result<RecordId> {
        let fields = encode_fields(&record.fields)?;
        let (failure, sync_state) = encode_state(&record.sync_state)?;

        self.conn
            .execute(
                "INSERT INTO action_queue (
                    id, barcode, kind, fields, photo_path, photo_ref, created_at,
                    sync_state, failure, attempts, next_attempt_at, last_error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.as_str(),
                    record.barcode.clone(),
                    record.kind.as_str(),
                    fields,
                    record.photo.as_ref().map(|photo| photo.local_path.clone()),
                    record.photo_ref().map(|remote| remote.0.clone()),
                    record.created_at,
                    sync_state,
                    failure,
                    i64::from(record.attempts),
                    record.next_attempt_at,
                    record.last_error.clone()
                ],
            )
            .await
            .map_err(write_error)?;

        Ok(record.id)
    }

    async fn replace(&self, id: &RecordId, record: &ActionRecord) -> Result<()> {
        let fields = encode_fields(&record.fields)?;

        self.update_one(
            id,
            "UPDATE action_queue
             SET fields = ?1, photo_path = ?2, photo_ref = NULL, created_at = ?3,
                 sync_state = 'pending', failure = NULL, attempts = 0,
                 next_attempt_at = NULL, last_error = NULL, revision = revision + 1
             WHERE id = ?4",
            params![
                fields,
                record.photo.as_ref().map(|photo| photo.local_path.clone()),
                record.created_at,
                id.as_str()
            ],
        )
        .await
    }

    async fn remove(&self, id: &RecordId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM action_queue WHERE id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(write_error)?;
        Ok(rows > 0)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<ActionRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM action_queue WHERE id = ?1");
        Ok(self
            .query_records(&sql, params![id.as_str()])
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self) -> Result<Vec<ActionRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM action_queue ORDER BY seq ASC");
        self.query_records(&sql, ()).await
    }

    async fn list_failed(&self) -> Result<Vec<ActionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM action_queue WHERE sync_state = 'failed' ORDER BY seq ASC"
        );
        self.query_records(&sql, ()).await
    }

    async fn find_open(&self, barcode: &str, kind: ActionKind) -> Result<Option<ActionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM action_queue
             WHERE barcode = ?1 AND kind = ?2 AND sync_state != 'synced'"
        );
        Ok(self
            .query_records(&sql, params![barcode, kind.as_str()])
            .await?
            .into_iter()
            .next())
    }

    async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM action_queue", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn set_state(&self, id: &RecordId, state: &SyncState) -> Result<()> {
        let (failure, sync_state) = encode_state(state)?;
        self.update_one(
            id,
            "UPDATE action_queue SET sync_state = ?1, failure = ?2 WHERE id = ?3",
            params![sync_state, failure, id.as_str()],
        )
        .await
    }

    async fn claim(&self, id: &RecordId, revision: u32, state: &SyncState) -> Result<bool> {
        let (failure, sync_state) = encode_state(state)?;
        let rows = self
            .conn
            .execute(
                "UPDATE action_queue SET sync_state = ?1, failure = ?2
                 WHERE id = ?3 AND revision = ?4 AND sync_state = 'pending'",
                params![sync_state, failure, id.as_str(), i64::from(revision)],
            )
            .await
            .map_err(write_error)?;
        Ok(rows > 0)
    }

    async fn mark_synced(&self, id: &RecordId, revision: u32) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE action_queue SET sync_state = 'synced', failure = NULL
                 WHERE id = ?1 AND revision = ?2 AND sync_state IN ('uploading', 'applying')",
                params![id.as_str(), i64::from(revision)],
            )
            .await
            .map_err(write_error)?;
        Ok(rows > 0)
    }

    async fn set_photo_ref(&self, id: &RecordId, remote_ref: &RemoteRef) -> Result<()> {
        self.update_one(
            id,
            "UPDATE action_queue SET photo_ref = ?1 WHERE id = ?2",
            params![remote_ref.0.clone(), id.as_str()],
        )
        .await
    }

    async fn record_retry(
        &self,
        id: &RecordId,
        attempts: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<()> {
        self.update_one(
            id,
            "UPDATE action_queue
             SET sync_state = 'pending', failure = NULL, attempts = ?1,
                 next_attempt_at = ?2, last_error = ?3
             WHERE id = ?4",
            params![i64::from(attempts), next_attempt_at, error, id.as_str()],
        )
        .await
    }

    async fn reset_in_flight(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE action_queue SET sync_state = 'pending'
                 WHERE sync_state IN ('uploading', 'applying')",
                (),
            )
            .await
            .map_err(write_error)?;
        Ok(rows)
    }
}

fn encode_fields(fields: &ActionFields) -> Result<String> {
    serde_json::to_string(fields)
        .map_err(|error| StorageError::Serialization(error.to_string()).into())
}

/// Returns `(failure_json, state_tag)`
fn encode_state(state: &SyncState) -> Result<(Option<String>, &'static str)> {
    let failure = match state {
        SyncState::Failed(reason) => Some(
            serde_json::to_string(reason)
                .map_err(|error| StorageError::Serialization(error.to_string()))?,
        ),
        _ => None,
    };
    Ok((failure, state.tag()))
}

fn decode_state(tag: &str, failure: Option<&str>) -> Result<SyncState> {
    match tag {
        "pending" => Ok(SyncState::Pending),
        "uploading" => Ok(SyncState::Uploading),
        "applying" => Ok(SyncState::Applying),
        "synced" => Ok(SyncState::Synced),
        "failed" => {
            let reason = match failure {
                Some(json) => serde_json::from_str::<FailureReason>(json)?,
                None => FailureReason::StaleState,
            };
            Ok(SyncState::Failed(reason))
        }
        other => Err(Error::Database(format!("Unknown sync state '{other}'"))),
    }
}

fn write_error(error: libsql::Error) -> Error {
    match error {
        libsql::Error::SqliteFailure(code, _) if code & 0xff == SQLITE_FULL => {
            StorageError::DiskFull.into()
        }
        other => StorageError::Backend(other.to_string()).into(),
    }
}

/// Parse a record from a database row selected with `RECORD_COLUMNS`
fn parse_record(row: &Row) -> Result<ActionRecord> {
    let id: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let fields: String = row.get(4)?;
    let photo_path: Option<String> = row.get(5)?;
    let photo_ref: Option<String> = row.get(6)?;
    let sync_state: String = row.get(8)?;
    let failure: Option<String> = row.get(9)?;
    let attempts: i64 = row.get(10)?;
    let revision: i64 = row.get(13)?;

    Ok(ActionRecord {
        id: id
            .parse()
            .map_err(|_| Error::Database(format!("Invalid record ID '{id}'")))?,
        seq: row.get(0)?,
        barcode: row.get(2)?,
        kind: kind.parse().map_err(Error::Database)?,
        fields: serde_json::from_str(&fields)?,
        photo: photo_path.map(|local_path| PhotoAsset {
            local_path,
            remote_ref: photo_ref.map(RemoteRef),
        }),
        created_at: row.get(7)?,
        sync_state: decode_state(&sync_state, failure.as_deref())?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        next_attempt_at: row.get(11)?,
        last_error: row.get(12)?,
        revision: u32::try_from(revision).unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ReceiverType;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn delivery(barcode: &str, receiver: &str) -> ActionRecord {
        ActionRecord::new(
            barcode,
            ActionKind::Delivery,
            ActionFields::Receiver {
                receiver_name: receiver.to_string(),
                receiver_type: ReceiverType::Recipient,
            },
            Some(PhotoAsset::local("/photos/a.jpg")),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_append_and_get() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let record = delivery("ABC12345", "Maria");
        let id = repo.append(&record).await.unwrap();

        let fetched = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.barcode, "ABC12345");
        assert_eq!(fetched.fields, record.fields);
        assert_eq!(fetched.photo, record.photo);
        assert_eq!(fetched.sync_state, SyncState::Pending);
        assert!(fetched.seq > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_is_fifo() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = repo.append(&delivery("AAA11111", "A")).await.unwrap();
        let second = repo.append(&delivery("BBB22222", "B")).await.unwrap();
        let third = repo.append(&delivery("CCC33333", "C")).await.unwrap();

        let ids: Vec<RecordId> = repo.list().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_is_restartable() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = repo.append(&delivery("AAA11111", "A")).await.unwrap();
        let snapshot = repo.list().await.unwrap();
        repo.remove(&first).await.unwrap();
        repo.append(&delivery("BBB22222", "B")).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, first);

        let fresh = repo.list().await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].barcode, "BBB22222");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_open_append_leaves_store_unchanged() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        repo.append(&delivery("ABC12345", "Maria")).await.unwrap();
        let err = repo
            .append(&delivery("ABC12345", "João"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Backend(_))));

        let records = repo.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].fields,
            ActionFields::Receiver {
                receiver_name: "Maria".to_string(),
                receiver_type: ReceiverType::Recipient,
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_keeps_position_and_resets_progress() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let original = delivery("ABC12345", "Maria");
        let id = repo.append(&original).await.unwrap();
        repo.append(&delivery("XYZ99999", "Ana")).await.unwrap();
        repo.set_photo_ref(&id, &RemoteRef("https://cdn/a.jpg".to_string()))
            .await
            .unwrap();
        repo.record_retry(&id, 2, 99, "timeout").await.unwrap();

        let mut newer = delivery("ABC12345", "João");
        newer.photo = Some(PhotoAsset::local("/photos/b.jpg"));
        repo.replace(&id, &newer).await.unwrap();

        let records = repo.list().await.unwrap();
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].photo, Some(PhotoAsset::local("/photos/b.jpg")));
        assert_eq!(records[0].attempts, 0);
        assert_eq!(records[0].next_attempt_at, None);
        assert_eq!(records[0].fields, newer.fields);
        assert_eq!(records[0].revision, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claim_and_mark_synced_follow_revision() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let id = repo.append(&delivery("ABC12345", "Maria")).await.unwrap();

        // A re-capture between snapshot and claim bumps the revision.
        repo.replace(&id, &delivery("ABC12345", "João")).await.unwrap();
        assert!(!repo.claim(&id, 0, &SyncState::Uploading).await.unwrap());

        assert!(repo.claim(&id, 1, &SyncState::Uploading).await.unwrap());
        // Already in flight: a second claim is refused.
        assert!(!repo.claim(&id, 1, &SyncState::Applying).await.unwrap());

        assert!(!repo.mark_synced(&id, 0).await.unwrap());
        assert!(repo.mark_synced(&id, 1).await.unwrap());
        assert_eq!(
            repo.get(&id).await.unwrap().unwrap().sync_state,
            SyncState::Synced
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_state_roundtrip_including_failure() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let id = repo.append(&delivery("ABC12345", "Maria")).await.unwrap();

        repo.set_state(&id, &SyncState::Uploading).await.unwrap();
        assert_eq!(
            repo.get(&id).await.unwrap().unwrap().sync_state,
            SyncState::Uploading
        );

        let failed = SyncState::Failed(FailureReason::Asset("too large".to_string()));
        repo.set_state(&id, &failed).await.unwrap();
        assert_eq!(repo.get(&id).await.unwrap().unwrap().sync_state, failed);
        assert_eq!(repo.list_failed().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_find_open_and_remove() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let id = repo.append(&delivery("ABC12345", "Maria")).await.unwrap();

        let open = repo
            .find_open("ABC12345", ActionKind::Delivery)
            .await
            .unwrap();
        assert_eq!(open.map(|record| record.id), Some(id));
        assert!(repo
            .find_open("ABC12345", ActionKind::Return)
            .await
            .unwrap()
            .is_none());

        assert!(repo.remove(&id).await.unwrap());
        assert!(!repo.remove(&id).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_in_flight() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let a = repo.append(&delivery("AAA11111", "A")).await.unwrap();
        let b = repo.append(&delivery("BBB22222", "B")).await.unwrap();
        repo.set_state(&a, &SyncState::Applying).await.unwrap();
        repo.set_state(&b, &SyncState::Failed(FailureReason::StaleState))
            .await
            .unwrap();

        assert_eq!(repo.reset_in_flight().await.unwrap(), 1);
        assert_eq!(
            repo.get(&a).await.unwrap().unwrap().sync_state,
            SyncState::Pending
        );
        assert!(repo.get(&b).await.unwrap().unwrap().sync_state.is_failed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_state_missing_record() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());
        let err = repo
            .set_state(&RecordId::new(), &SyncState::Applying)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
