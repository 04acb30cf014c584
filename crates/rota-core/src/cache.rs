//! Barcode ledger cache.
//!
//! Remembers which barcodes the courier already acted on so the capture UI
//! can hide them before a drain confirms anything remotely. The cache is a
//! UI hint: it may lag behind the remote ledger and is never consulted to
//! decide whether a remote write happened.
//!
//! Reads go through an in-memory map. Writes are persisted first and then
//! mirrored in memory; callers serialize writes through the database lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use libsql::Connection;

use crate::db::{HandledRepository, LibSqlHandledRepository};
use crate::error::Result;
use crate::models::{normalize_barcode, ActionRecord, HandledEntry};
use crate::util::now_millis;

#[derive(Debug, Default)]
pub struct LedgerCache {
    entries: RwLock<HashMap<String, HandledEntry>>,
}

impl LedgerCache {
    /// Load the persisted cache.
    pub async fn load(conn: &Connection) -> Result<Self> {
        let entries = LibSqlHandledRepository::new(conn).load_all().await?;
        let map = entries
            .into_iter()
            .map(|entry| (entry.barcode.clone(), entry))
            .collect();
        Ok(Self {
            entries: RwLock::new(map),
        })
    }

    /// Whether the barcode was completed locally or confirmed remotely.
    pub fn is_handled(&self, barcode: &str) -> bool {
        self.entry(barcode).is_some_and(|entry| entry.is_handled())
    }

    pub fn entry(&self, barcode: &str) -> Option<HandledEntry> {
        let barcode = normalize_barcode(barcode);
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&barcode)
            .cloned()
    }

    /// Barcodes completed locally that the remote has not confirmed yet.
    pub fn unconfirmed(&self) -> Vec<String> {
        let mut barcodes: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.locally_completed && !entry.remotely_synced)
            .map(|entry| entry.barcode.clone())
            .collect();
        barcodes.sort();
        barcodes
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Optimistic mark set on a successful capture.
    pub async fn mark_local(&self, conn: &Connection, barcode: &str) -> Result<()> {
        self.update(conn, barcode, |entry| entry.locally_completed = true)
            .await
    }

    /// Confirmed mark set once the remote ledger holds a terminal state.
    pub async fn confirm(&self, conn: &Connection, barcode: &str) -> Result<()> {
        self.update(conn, barcode, |entry| {
            entry.locally_completed = true;
            entry.remotely_synced = true;
        })
        .await
    }

    /// Administrative "reset all": forget every barcode.
    pub async fn reset_all(&self, conn: &Connection) -> Result<()> {
        LibSqlHandledRepository::new(conn).clear().await?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!("Cleared handled barcode cache");
        Ok(())
    }

    /// Recompute local marks from the queue, keeping remote confirmations.
    pub async fn rebuild(&self, conn: &Connection, records: &[ActionRecord]) -> Result<()> {
        let repo = LibSqlHandledRepository::new(conn);
        let now = now_millis();

        let confirmed: Vec<HandledEntry> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.remotely_synced)
            .cloned()
            .collect();

        let mut rebuilt: HashMap<String, HandledEntry> = confirmed
            .into_iter()
            .map(|entry| (entry.barcode.clone(), entry))
            .collect();
        for record in records {
            rebuilt
                .entry(record.barcode.clone())
                .or_insert_with(|| HandledEntry {
                    barcode: record.barcode.clone(),
                    locally_completed: true,
                    remotely_synced: false,
                    updated_at: now,
                });
        }

        repo.clear().await?;
        for entry in rebuilt.values() {
            repo.upsert(entry).await?;
        }

        let count = rebuilt.len();
        *self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner) = rebuilt;
        tracing::info!("Rebuilt handled barcode cache with {count} entries");
        Ok(())
    }

    async fn update(
        &self,
        conn: &Connection,
        barcode: &str,
        apply: impl FnOnce(&mut HandledEntry),
    ) -> Result<()> {
        let barcode = normalize_barcode(barcode);
        let mut entry = self.entry(&barcode).unwrap_or_else(|| HandledEntry {
            barcode: barcode.clone(),
            locally_completed: false,
            remotely_synced: false,
            updated_at: 0,
        });
        apply(&mut entry);
        entry.updated_at = now_millis();

        LibSqlHandledRepository::new(conn).upsert(&entry).await?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(barcode, entry);
        Ok(())
    }
}
