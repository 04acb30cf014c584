//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Run statements inside one transaction, rolling back on the first failure
async fn apply_statements(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

/// Migration to version 1: action queue
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply_statements(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            // seq is the FIFO key; id stays stable across restarts
            "CREATE TABLE IF NOT EXISTS action_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                barcode TEXT NOT NULL,
                kind TEXT NOT NULL,
                fields TEXT NOT NULL,
                photo_path TEXT,
                photo_ref TEXT,
                created_at INTEGER NOT NULL,
                sync_state TEXT NOT NULL DEFAULT 'pending',
                failure TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER,
                last_error TEXT
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_action_queue_open
                ON action_queue(barcode, kind) WHERE sync_state != 'synced'",
            "CREATE INDEX IF NOT EXISTS idx_action_queue_state ON action_queue(sync_state)",
            "INSERT INTO schema_version (version) VALUES (1)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: handled barcode cache
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply_statements(
        conn,
        &[
            "CREATE TABLE IF NOT EXISTS handled_barcodes (
                barcode TEXT PRIMARY KEY,
                locally_completed INTEGER NOT NULL DEFAULT 0,
                remotely_synced INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )",
            "INSERT INTO schema_version (version) VALUES (2)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: record revisions for in-place re-capture
async fn migrate_v3(conn: &Connection) -> Result<()> {
    apply_statements(
        conn,
        &[
            "ALTER TABLE action_queue ADD COLUMN revision INTEGER NOT NULL DEFAULT 0",
            "INSERT INTO schema_version (version) VALUES (3)",
        ],
    )
    .await?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
