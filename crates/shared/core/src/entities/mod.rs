mod account;
mod event;
mod execution;
mod position;
mod side;
mod signal;
mod subscription;

pub use account::{AccountId, CredentialStatus, ExchangeAccount, ExchangeId};
pub use event::{EngineEvent, Priority};
pub use execution::{
    CloseRequest, ExecutionOutcome, ExecutionResult, ExecutionTarget, Fill, IdempotencyKey,
    OrderHandle, OrderLeg, OrderSpec, ProtectionRequest, ProtectionResult, TriggeredLeg,
};
pub use position::{
    CloseReason, PnlRecord, Position, PositionId, PositionKey, PositionStatus,
};
pub use side::{OrderSide, ParseSideError, Side};
pub use signal::{Signal, SignalId, SignalStatus};
pub use subscription::Subscription;
