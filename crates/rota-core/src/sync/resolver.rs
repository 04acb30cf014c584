//! Per-record apply/skip/retry decisions.
//!
//! Everything here is pure: the engine gathers the remote view, asks
//! [`resolve`] what to do, and carries the verdict out.

use crate::config::SyncSettings;
use crate::models::{ActionRecord, FailureReason, OrderStatus, RemoteOrder};
use crate::remote::RemoteError;

/// What the engine learned about the order before deciding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLookup {
    Found(RemoteOrder),
    /// The ledger has no order with this barcode.
    Missing,
    /// The lookup itself failed.
    Unavailable(RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The order already carries this action's target status.
    AlreadyApplied,
    /// The order reached a different terminal status.
    Conflict { remote: OrderStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// Remote is not (yet) in the pre-condition status.
    Stale(String),
    /// Transient transport or server failure.
    Network(String),
}

impl RetryReason {
    pub fn detail(&self) -> &str {
        match self {
            Self::Stale(detail) | Self::Network(detail) => detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Apply,
    Skip(SkipReason),
    RetryLater {
        reason: RetryReason,
        attempts: u32,
        next_attempt_at: i64,
    },
    Fail(FailureReason),
}

/// Decide what to do with `record` given the remote view.
pub fn resolve(
    record: &ActionRecord,
    lookup: &RemoteLookup,
    courier_id: &str,
    settings: &SyncSettings,
    now_ms: i64,
) -> Resolution {
    let order = match lookup {
        RemoteLookup::Found(order) => order,
        RemoteLookup::Missing => {
            return retry_or_fail(
                record,
                RetryReason::Stale(format!("order {} not found in ledger", record.barcode)),
                settings,
                now_ms,
            )
        }
        RemoteLookup::Unavailable(error) if error.is_retryable() => {
            return retry_or_fail(
                record,
                RetryReason::Network(error.to_string()),
                settings,
                now_ms,
            )
        }
        RemoteLookup::Unavailable(error) => {
            return Resolution::Fail(FailureReason::Rejected(error.to_string()))
        }
    };

    let target = record.kind.target();
    if order.status == target {
        return Resolution::Skip(SkipReason::AlreadyApplied);
    }
    if order.status.is_terminal() {
        return Resolution::Skip(SkipReason::Conflict {
            remote: order.status.clone(),
        });
    }

    if let Some(assigned) = order.assigned_courier.as_deref() {
        if assigned != courier_id {
            return retry_or_fail(
                record,
                RetryReason::Stale(format!("order reassigned to courier {assigned}")),
                settings,
                now_ms,
            );
        }
    }

    let expected = record.kind.precondition();
    if order.status == expected {
        Resolution::Apply
    } else {
        retry_or_fail(
            record,
            RetryReason::Stale(format!(
                "remote status is '{}', expected '{expected}'",
                order.status
            )),
            settings,
            now_ms,
        )
    }
}

/// Count one more retry-later outcome, or give up once the bound is hit.
pub fn retry_or_fail(
    record: &ActionRecord,
    reason: RetryReason,
    settings: &SyncSettings,
    now_ms: i64,
) -> Resolution {
    let attempts = record.attempts.saturating_add(1);
    if attempts >= settings.max_attempts {
        let failure = match reason {
            RetryReason::Stale(_) => FailureReason::StaleState,
            RetryReason::Network(detail) => FailureReason::NetworkExhausted(detail),
        };
        return Resolution::Fail(failure);
    }

    let delay = i64::try_from(backoff_delay_ms(attempts, settings)).unwrap_or(i64::MAX);
    Resolution::RetryLater {
        reason,
        attempts,
        next_attempt_at: now_ms.saturating_add(delay),
    }
}

/// `min(base * 2^(attempts - 1), max)`.
pub fn backoff_delay_ms(attempts: u32, settings: &SyncSettings) -> u64 {
    let exponent = attempts.saturating_sub(1).min(63);
    settings
        .backoff_base_ms
        .saturating_mul(1_u64 << exponent)
        .min(settings.backoff_max_ms)
}
