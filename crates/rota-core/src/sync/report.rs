//! Drain results.

use serde::Serialize;

use crate::models::{ActionKind, ActionRecord, RecordId};

/// What happened to one record during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub id: RecordId,
    pub barcode: String,
    pub kind: ActionKind,
    pub detail: String,
}

impl RecordOutcome {
    pub fn new(record: &ActionRecord, detail: impl Into<String>) -> Self {
        Self {
            id: record.id,
            barcode: record.barcode.clone(),
            kind: record.kind,
            detail: detail.into(),
        }
    }
}

/// Summary of one drain pass.
///
/// `applied` and `skipped` records left the queue. `conflicts` also left it
/// (the remote ended somewhere else). `failed` records stay until
/// discarded; `retrying` and `deferred` ones are picked up by a later drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub applied: Vec<RecordOutcome>,
    pub skipped: Vec<RecordOutcome>,
    pub conflicts: Vec<RecordOutcome>,
    pub failed: Vec<RecordOutcome>,
    pub retrying: Vec<RecordOutcome>,
    pub deferred: Vec<RecordOutcome>,
    /// The drain stopped early on request.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn merge(&mut self, other: Self) {
        self.applied.extend(other.applied);
        self.skipped.extend(other.skipped);
        self.conflicts.extend(other.conflicts);
        self.failed.extend(other.failed);
        self.retrying.extend(other.retrying);
        self.deferred.extend(other.deferred);
        self.cancelled |= other.cancelled;
    }

    /// Records that left the queue during this pass.
    pub fn removed(&self) -> usize {
        self.applied.len() + self.skipped.len() + self.conflicts.len()
    }

    /// Records still queued for a later pass.
    pub fn pending(&self) -> usize {
        self.retrying.len() + self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed() + self.pending() + self.failed.len() == 0
    }
}
