//! Copytrade Ports
//!
//! Port definitions (traits) for the copytrade engine.
//! These define the boundaries between domain logic and infrastructure:
//! exchanges, ledger persistence, the notification layer and time.

mod clock;
mod error;
mod exchange;
mod ledger;
mod notify;

pub use clock::Clock;
pub use error::{
    ExchangeError, ExchangeErrorKind, ExchangeResult, LedgerError, LedgerResult, ProtectionError,
};
pub use exchange::ExchangeAdapter;
pub use ledger::LedgerStore;
pub use notify::NotificationSink;
