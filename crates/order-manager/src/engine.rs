//! Copy-trade engine
//!
//! Wires intake, directory, gatekeeper, orchestrator, ledger and monitor
//! from one [`EngineConfig`]. All collaborators are passed in; nothing is
//! process-global.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::execution::{DistributionReport, Orchestrator};
use crate::intake::{SignalBook, SignalDraft, SignalIntake};
use crate::monitor::PositionMonitor;
use crate::position::{Ledger, PnlSummary};
use crate::resolver::AccountDirectory;
use copytrade_core::{
    AccountId, CloseReason, ExchangeAccount, PnlRecord, Price, Signal, SignalId, Subscription,
    Symbol,
};
use copytrade_ports::{Clock, ExchangeAdapter, LedgerStore, NotificationSink};
use copytrade_risk_manager::RiskGatekeeper;
use std::collections::HashMap;
use std::sync::Arc;

pub struct CopyTradeEngine {
    config: EngineConfig,
    intake: SignalIntake,
    book: Arc<SignalBook>,
    directory: Arc<AccountDirectory>,
    ledger: Arc<Ledger>,
    orchestrator: Orchestrator,
    monitor: PositionMonitor,
}

impl CopyTradeEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let book = Arc::new(SignalBook::new());
        let directory = Arc::new(AccountDirectory::new());
        let ledger = Arc::new(Ledger::new(store));
        let orchestrator = Orchestrator::new(
            config.execution.clone(),
            Arc::new(RiskGatekeeper::new(config.risk.clone())),
            directory.clone(),
            ledger.clone(),
            book.clone(),
            notifier,
            clock.clone(),
        );
        let monitor = PositionMonitor::new(orchestrator.clone(), ledger.clone(), clock.clone());

        Ok(Self {
            intake: SignalIntake::new(config.signals.clone(), clock),
            config,
            book,
            directory,
            ledger,
            orchestrator,
            monitor,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn directory(&self) -> &AccountDirectory {
        &self.directory
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn register_account(&self, account: ExchangeAccount, adapter: Arc<dyn ExchangeAdapter>) -> AccountId {
        self.directory.register(account, adapter)
    }

    pub fn subscribe(&self, subscription: Subscription) {
        self.directory.subscribe(subscription);
    }

    /// Re-enable an account excluded after an authentication failure
    pub fn reauthenticate(&self, account_id: AccountId, adapter: Option<Arc<dyn ExchangeAdapter>>) -> Result<()> {
        self.directory.reauthenticate(account_id, adapter)
    }

    /// Validate a submission and keep it; nothing is executed yet
    pub fn submit(&self, draft: &SignalDraft) -> Result<SignalId> {
        let signal = self.intake.validate(draft)?;
        let id = signal.id;
        self.book.insert(signal);
        Ok(id)
    }

    pub fn signal(&self, id: SignalId) -> Option<Signal> {
        self.book.get(id)
    }

    pub async fn distribute(&self, id: SignalId) -> Result<DistributionReport> {
        self.orchestrator.distribute(id).await
    }

    pub async fn submit_and_distribute(&self, draft: &SignalDraft) -> Result<DistributionReport> {
        let id = self.submit(draft)?;
        self.distribute(id).await
    }

    pub fn cancel(&self, id: SignalId) -> Result<()> {
        self.orchestrator.cancel(id)
    }

    pub async fn close_position(&self, account_id: AccountId, symbol: &str, reason: CloseReason) -> Result<PnlRecord> {
        self.orchestrator.close_position(account_id, symbol, reason).await
    }

    /// Software stop/target pass over every open position
    pub async fn sweep(&self, prices: &HashMap<Symbol, Price>) -> Vec<PnlRecord> {
        self.monitor.sweep(prices).await
    }

    pub fn summary(&self, account_id: AccountId) -> PnlSummary {
        self.ledger.summary(account_id)
    }

    /// Reload open positions of every registered account from the store
    pub async fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for account in self.directory.accounts() {
            restored += self.ledger.restore(account.id).await?;
            self.directory
                .set_open_positions(account.id, self.ledger.open_count(account.id))?;
        }
        Ok(restored)
    }
}
