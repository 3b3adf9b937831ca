//! Copytrade Risk Manager
//!
//! Pre-trade risk enforcement for every (signal, account) pairing. The
//! gatekeeper is a pure policy function: it reads the signal, the account's
//! subscription overrides and a snapshot of the account (balance, open
//! positions, trades today) and either resolves a complete [`OrderSpec`] or
//! returns a typed [`RiskRejection`].
//!
//! ## Rules
//!
//! Evaluated in order, first failing rule wins:
//!
//! | # | Check | Result |
//! |---|-------|--------|
//! | 1 | open positions ≥ max open positions | reject `TOO_MANY_POSITIONS` |
//! | 2 | trades today ≥ max daily trades | reject `DAILY_LIMIT` |
//! | 3 | size percent above the cap | clamp; reject `BELOW_MIN_NOTIONAL` if the order becomes too small |
//! | 4 | leverage outside `[1, max]` | clamp |
//!
//! ```text
//!   Signal ──┐
//!   Subscription ──► RiskGatekeeper::evaluate ──► Approval { OrderSpec }
//!   RiskContext ──┘                          └──► RiskRejection
//! ```
//!
//! Rejections never reach an exchange adapter.
//!
//! [`OrderSpec`]: copytrade_core::OrderSpec

pub mod gatekeeper;
pub mod parameters;

// Re-export main types
pub use gatekeeper::{
    Adjustment, Approval, RiskContext, RiskGatekeeper, RiskRejection, position_quantity,
};
pub use parameters::{HARD_MAX_LEVERAGE, HARD_MAX_SIZE_PERCENT, ParameterError, RiskLimits};
