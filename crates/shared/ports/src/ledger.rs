use async_trait::async_trait;
use copytrade_core::{AccountId, ExecutionResult, Position};

use crate::error::LedgerResult;

/// Port for ledger persistence
///
/// The storage medium is external; the engine only appends executions and
/// upserts positions keyed by position id.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one settled execution to the execution log
    async fn append_execution(&self, result: &ExecutionResult) -> LedgerResult<()>;

    /// Insert or replace a position by id
    async fn upsert_position(&self, position: &Position) -> LedgerResult<()>;

    /// Open positions owned by `account`
    async fn get_open_positions(&self, account: AccountId) -> LedgerResult<Vec<Position>>;
}
