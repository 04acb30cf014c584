//! In-memory ledger for tests and offline demos.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{ApplyOutcome, ApplyRequest, RemoteError, RemoteLedger, RemoteResult};
use crate::models::{OrderStatus, RemoteOrder};

#[derive(Debug, Default)]
struct LedgerState {
    orders: HashMap<String, RemoteOrder>,
    writes: Vec<ApplyRequest>,
    fetches: usize,
    offline: bool,
    failing_fetches: usize,
    races: HashMap<String, OrderStatus>,
}

/// Ledger kept in a map, with knobs for simulating outages and races.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite an order.
    pub fn insert(&self, barcode: &str, status: OrderStatus) {
        self.insert_order(RemoteOrder {
            barcode: barcode.to_string(),
            status,
            assigned_courier: None,
            updated_at: None,
        });
    }

    pub fn insert_order(&self, order: RemoteOrder) {
        self.lock().orders.insert(order.barcode.clone(), order);
    }

    pub fn status(&self, barcode: &str) -> Option<OrderStatus> {
        self.lock()
            .orders
            .get(barcode)
            .map(|order| order.status.clone())
    }

    /// Every write that changed an order, in order of application.
    pub fn writes(&self) -> Vec<ApplyRequest> {
        self.lock().writes.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Fail every call with a network error while set.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next `count` lookups with a network error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().failing_fetches = count;
    }

    /// Move `barcode` to `status` right before the next write to it lands,
    /// as if another device won the race.
    pub fn race_next_apply(&self, barcode: &str, status: OrderStatus) {
        self.lock().races.insert(barcode.to_string(), status);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RemoteLedger for MemoryLedger {
    async fn fetch_status(&self, barcode: &str) -> RemoteResult<Option<RemoteOrder>> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Network("ledger is offline".to_string()));
        }
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(RemoteError::Network("lookup timed out".to_string()));
        }
        state.fetches += 1;
        Ok(state.orders.get(barcode).cloned())
    }

    async fn apply(&self, request: &ApplyRequest) -> RemoteResult<ApplyOutcome> {
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Network("ledger is offline".to_string()));
        }
        if let Some(status) = state.races.remove(&request.barcode) {
            if let Some(order) = state.orders.get_mut(&request.barcode) {
                order.status = status;
            }
        }

        let Some(order) = state.orders.get_mut(&request.barcode) else {
            return Ok(ApplyOutcome::Conflict);
        };
        if order.status != request.expected {
            return Ok(ApplyOutcome::Conflict);
        }

        order.status = request.new_status.clone();
        order.updated_at = Some(request.occurred_at);
        state.writes.push(request.clone());
        Ok(ApplyOutcome::Applied)
    }
}
