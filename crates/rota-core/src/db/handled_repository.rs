//! Handled barcode repository implementation

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::HandledEntry;

/// Trait for handled-barcode cache persistence (async)
#[allow(async_fn_in_trait)]
pub trait HandledRepository {
    /// Load every cached entry
    async fn load_all(&self) -> Result<Vec<HandledEntry>>;

    /// Insert or overwrite an entry
    async fn upsert(&self, entry: &HandledEntry) -> Result<()>;

    /// Forget every barcode
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `HandledRepository`
pub struct LibSqlHandledRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlHandledRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl HandledRepository for LibSqlHandledRepository<'_> {
    async fn load_all(&self) -> Result<Vec<HandledEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT barcode, locally_completed, remotely_synced, updated_at
                 FROM handled_barcodes",
                (),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(HandledEntry {
                barcode: row.get(0)?,
                locally_completed: row.get::<i32>(1)? != 0,
                remotely_synced: row.get::<i32>(2)? != 0,
                updated_at: row.get(3)?,
            });
        }
        Ok(entries)
    }

    async fn upsert(&self, entry: &HandledEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO handled_barcodes (barcode, locally_completed, remotely_synced, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(barcode) DO UPDATE SET
                    locally_completed = excluded.locally_completed,
                    remotely_synced = excluded.remotely_synced,
                    updated_at = excluded.updated_at",
                params![
                    entry.barcode.clone(),
                    i32::from(entry.locally_completed),
                    i32::from(entry.remotely_synced),
                    entry.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM handled_barcodes", ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn entry(barcode: &str, local: bool, remote: bool) -> HandledEntry {
        HandledEntry {
            barcode: barcode.to_string(),
            locally_completed: local,
            remotely_synced: remote,
            updated_at: 1,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_overwrites() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlHandledRepository::new(db.connection());

        repo.upsert(&entry("ABC12345", true, false)).await.unwrap();
        repo.upsert(&entry("ABC12345", true, true)).await.unwrap();

        let entries = repo.load_all().await.unwrap();
        assert_eq!(entries, vec![entry("ABC12345", true, true)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlHandledRepository::new(db.connection());

        repo.upsert(&entry("AAA11111", true, false)).await.unwrap();
        repo.upsert(&entry("BBB22222", false, true)).await.unwrap();
        assert_eq!(repo.load_all().await.unwrap().len(), 2);

        repo.clear().await.unwrap();
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
