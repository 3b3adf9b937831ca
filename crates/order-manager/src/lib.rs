//! Copytrade Order Manager
//!
//! Everything between a submitted signal and the positions it opens:
//! - **Signal Intake**: validates submissions, assigns ids, owns the signal lifecycle
//! - **Subscriber Resolver**: picks eligible accounts in registration order
//! - **Execution Orchestrator**: bounded concurrent fan-out with per-target retry
//! - **Position & P&L Ledger**: executions, open positions, realized/unrealized P&L
//! - **Position Monitor**: books stop-loss / take-profit legs executed on the
//!   exchange, then runs software stop-loss / take-profit sweeps
//!
//! ## Architecture
//!
//! ```text
//! SignalDraft ──► SignalIntake ──► SignalBook (VALIDATED)
//!                                       │
//!                                       ▼
//!                               ┌────────────────────────────────────┐
//!                               │         Orchestrator               │
//!                               │  AccountDirectory::resolve         │
//!                               │        │ targets (ordered)         │
//!                               │        ▼                           │
//!                               │  Semaphore(max_parallel_calls)     │
//!                               │   ├─ RiskGatekeeper::evaluate      │
//!                               │   ├─ ExchangeAdapter (retry, T1)   │
//!                               │   └─ Ledger::record                │
//!                               │        │ every target settled      │
//!                               │        ▼                           │
//!                               │  COMPLETED / PARTIAL / FAILED      │
//!                               └────────┬───────────────────────────┘
//!                                        │
//!                  NotificationSink ◄────┴────► DistributionReport
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use copytrade_order_manager::{CopyTradeEngine, EngineConfig, InMemoryLedgerStore, ChannelNotifier};
//!
//! let (notifier, events) = ChannelNotifier::new(1024);
//! let engine = CopyTradeEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryLedgerStore::new()),
//!     Arc::new(notifier),
//!     Arc::new(SystemClock::new()),
//! )?;
//! engine.register_account(account, adapter);
//! engine.subscribe(Subscription::new(user_id));
//!
//! let report = engine.submit_and_distribute(&draft).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod intake;
pub mod monitor;
pub mod position;
pub mod resolver;
pub mod retry;
pub mod store;

// Re-export main types
pub use config::{ConfigError, EngineConfig, ExchangeSettings, ExecutionSettings, SignalSettings};
pub use engine::CopyTradeEngine;
pub use error::{Error, Result};
pub use events::ChannelNotifier;
pub use execution::{
    DistributionReport, Orchestrator, TargetEntry, TargetReport, aggregate_status,
};
pub use intake::{SignalBook, SignalDraft, SignalIntake, ValidationError};
pub use monitor::PositionMonitor;
pub use position::{Ledger, PnlSummary, Recorded};
pub use resolver::{AccountDirectory, ResolvedTarget};
pub use retry::{Attempted, RetryPolicy};
pub use store::InMemoryLedgerStore;
