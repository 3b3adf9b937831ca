//! Order Manager errors

use crate::config::ConfigError;
use crate::intake::ValidationError;
use copytrade_core::{AccountId, PositionKey, SignalId, SignalStatus};
use copytrade_ports::{ExchangeError, LedgerError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid signal: {0}")]
    InvalidSignal(#[from] ValidationError),

    #[error("Unknown signal: {0}")]
    UnknownSignal(SignalId),

    #[error("Signal {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
    },

    #[error("Signal {0} expired before distribution")]
    SignalExpired(SignalId),

    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("No open position for {0}")]
    PositionNotFound(PositionKey),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
