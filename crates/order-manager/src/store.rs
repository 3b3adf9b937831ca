//! In-memory ledger persistence
//!
//! Append-only execution log plus a position table keyed by position id.
//! Stands in for the external storage layer in tests and dry runs.

use async_trait::async_trait;
use copytrade_core::{AccountId, ExecutionResult, Position, PositionId};
use copytrade_ports::{LedgerError, LedgerResult, LedgerStore};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct InMemoryLedgerStore {
    executions: RwLock<Vec<ExecutionResult>>,
    positions: DashMap<PositionId, Position>,
    unavailable: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execution log, oldest first
    pub fn executions(&self) -> Vec<ExecutionResult> {
        self.executions.read().clone()
    }

    pub fn position(&self, id: PositionId) -> Option<Position> {
        self.positions.get(&id).map(|position| position.clone())
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Simulate a storage outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> LedgerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append_execution(&self, result: &ExecutionResult) -> LedgerResult<()> {
        self.check()?;
        self.executions.write().push(result.clone());
        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> LedgerResult<()> {
        self.check()?;
        self.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn get_open_positions(&self, account: AccountId) -> LedgerResult<Vec<Position>> {
        self.check()?;
        let mut open: Vec<Position> = self
            .positions
            .iter()
            .filter(|position| position.account_id == account && position.is_open())
            .map(|position| position.clone())
            .collect();
        open.sort_by_key(|position| position.opened_at);
        Ok(open)
    }
}
