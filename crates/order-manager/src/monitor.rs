//! Position Monitor
//!
//! A sweep first asks each account's exchange whether a resting stop-loss
//! or take-profit leg has executed, and books those exits at the leg's fill.
//! It then acts as a software stop-loss / take-profit: remaining positions
//! are marked to the supplied prices and the ones whose levels were crossed
//! are closed, for accounts where the exchange-side protection is missing
//! or lagging.

use crate::execution::Orchestrator;
use crate::position::Ledger;
use copytrade_core::{PnlRecord, Price, Symbol};
use copytrade_ports::Clock;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

pub struct PositionMonitor {
    orchestrator: Orchestrator,
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
}

impl PositionMonitor {
    pub fn new(orchestrator: Orchestrator, ledger: Arc<Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orchestrator,
            ledger,
            clock,
        }
    }

    /// Book executed protection legs, then mark to market and close
    /// positions whose levels were crossed
    ///
    /// Positions whose symbol has no price are only checked for executed legs.
    pub async fn sweep(&self, prices: &HashMap<Symbol, Price>) -> Vec<PnlRecord> {
        let now = self.clock.now();
        let mut closed = Vec::new();

        for position in self.ledger.all_open() {
            match self.orchestrator.settle_triggered_protection(&position).await {
                Ok(Some(record)) => {
                    closed.push(record);
                    continue;
                }
                Ok(None) => {}
                Err(err) => warn!("[MONITOR] {} protection lookup failed: {err}", position.key()),
            }

            let Some(&price) = prices.get(&position.symbol) else {
                continue;
            };
            let key = position.key();
            if let Err(err) = self.ledger.mark_to_market(&key, price, now).await {
                warn!("[MONITOR] {key} mark to market failed: {err}");
                continue;
            }

            let Some(reason) = position.triggered_exit(price) else {
                continue;
            };
            info!("[MONITOR] {key} {reason} crossed at {price}");
            match self
                .orchestrator
                .close_position(position.account_id, &position.symbol, reason)
                .await
            {
                Ok(record) => closed.push(record),
                Err(err) => error!("[MONITOR] {key} close failed: {err}"),
            }
        }
        closed
    }
}
