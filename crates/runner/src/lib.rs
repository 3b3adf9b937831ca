//! Copy-Trade Runner
//!
//! Wires a [`CopyTradeEngine`](copytrade_order_manager::CopyTradeEngine)
//! from a JSON config and distributes one signal:
//!
//! - **Bootstrap**: engine limits, accounts, adapters and subscriptions
//! - **Report**: per-account breakdown of the distribution
//!
//! ```text
//!   config.json ──► bootstrap ──► CopyTradeEngine ──► adapters (live / paper)
//!                                      │
//!                                      ▼
//!                              DistributionReport ──► report
//! ```

pub mod bootstrap;
pub mod report;

pub use bootstrap::{
    AccountConfig, Bootstrapped, BootstrappedAccount, FaultConfig, FaultKind, RunnerConfig,
    RunnerError, bootstrap, DEFAULT_CONFIG,
};
pub use report::{render, target_line};
