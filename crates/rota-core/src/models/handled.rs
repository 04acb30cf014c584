//! Handled barcode model

use serde::{Deserialize, Serialize};

/// Cached knowledge about a barcode the courier already acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandledEntry {
    /// Normalized barcode
    pub barcode: String,
    /// Completed on this device, possibly not yet synced
    pub locally_completed: bool,
    /// Remote ledger confirmed a terminal transition
    pub remotely_synced: bool,
    /// Last change (Unix ms)
    pub updated_at: i64,
}

impl HandledEntry {
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        self.locally_completed || self.remotely_synced
    }
}
