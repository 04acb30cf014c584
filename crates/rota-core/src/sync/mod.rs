//! Synchronization of the action queue with the remote ledger.

mod engine;
mod report;
mod resolver;

pub use engine::{DrainControl, SyncEngine};
pub use report::{RecordOutcome, SyncReport};
pub use resolver::{
    backoff_delay_ms, resolve, retry_or_fail, RemoteLookup, Resolution, RetryReason, SkipReason,
};
