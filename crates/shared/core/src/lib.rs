//! Copytrade Core Domain
//!
//! Pure domain types for the copytrade signal execution engine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Accounts and subscribers
    AccountId,
    // Execution
    CloseReason,
    CloseRequest,
    CredentialStatus,
    // Notifications
    EngineEvent,
    ExchangeAccount,
    ExchangeId,
    ExecutionOutcome,
    ExecutionResult,
    ExecutionTarget,
    Fill,
    IdempotencyKey,
    OrderHandle,
    OrderLeg,
    OrderSide,
    OrderSpec,
    ParseSideError,
    PnlRecord,
    // Positions
    Position,
    PositionId,
    PositionKey,
    PositionStatus,
    Priority,
    ProtectionRequest,
    ProtectionResult,
    Side,
    // Signals
    Signal,
    SignalId,
    SignalStatus,
    Subscription,
    TriggeredLeg,
};
pub use values::{Price, Quantity, Symbol, Timestamp, UserId};
