//! Signal Intake & Validation
//!
//! Turns a raw submission into a VALIDATED [`Signal`] with a fresh id, and
//! keeps every accepted signal in the [`SignalBook`], which owns the signal
//! state machine. Validation never triggers execution.

use crate::config::SignalSettings;
use crate::error::{Error, Result};
use chrono::Duration;
use copytrade_core::{Price, Side, Signal, SignalId, SignalStatus};
use copytrade_ports::Clock;
use dashmap::DashMap;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Raw signal as submitted by the command interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDraft {
    pub symbol: String,
    /// LONG or SHORT
    pub side: String,
    pub entry: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    /// Defaults to the configured leverage
    pub leverage: Option<u32>,
    /// Defaults to the configured size percent
    pub size_percent: Option<Decimal>,
}

/// Why a submission was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("side must be LONG or SHORT, got '{0}'")]
    InvalidSide(String),

    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: Decimal },

    #[error("{side} requires {expected}: stop loss {stop_loss}, entry {entry}, take profit {take_profit}")]
    InconsistentLevels {
        side: Side,
        expected: &'static str,
        stop_loss: Decimal,
        entry: Decimal,
        take_profit: Decimal,
    },

    #[error("leverage {value} outside {min}..={max}")]
    LeverageOutOfRange { value: u32, min: u32, max: u32 },

    #[error("size percent {value} outside {min}..={max}")]
    SizeOutOfRange {
        value: Decimal,
        min: Decimal,
        max: Decimal,
    },
}

/// Validates submissions and assigns signal ids
pub struct SignalIntake {
    settings: SignalSettings,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

impl SignalIntake {
    pub fn new(settings: SignalSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &SignalSettings {
        &self.settings
    }

    /// Validate `draft` and return a VALIDATED signal
    pub fn validate(&self, draft: &SignalDraft) -> std::result::Result<Signal, ValidationError> {
        let result = self.check(draft);
        match &result {
            Ok(signal) => info!(
                "[INTAKE] {} {} {} entry {} SL {} TP {} {}x {}%",
                signal.id,
                signal.symbol,
                signal.side,
                signal.entry_price,
                signal.stop_loss,
                signal.take_profit,
                signal.leverage,
                signal.size_percent
            ),
            Err(err) => warn!("[INTAKE] rejected {}: {}", draft.symbol, err),
        }
        result
    }

    fn check(&self, draft: &SignalDraft) -> std::result::Result<Signal, ValidationError> {
        let symbol = normalize_symbol(&draft.symbol);
        if !self.settings.known_symbols.contains(&symbol) {
            return Err(ValidationError::UnknownSymbol(draft.symbol.clone()));
        }

        let side: Side = draft
            .side
            .parse()
            .map_err(|_| ValidationError::InvalidSide(draft.side.clone()))?;

        for (field, value) in [
            ("entry", draft.entry),
            ("stop loss", draft.stop_loss),
            ("take profit", draft.take_profit),
        ] {
            if value <= Decimal::ZERO {
                return Err(ValidationError::NonPositivePrice { field, value });
            }
        }

        let consistent = match side {
            Side::Long => draft.stop_loss < draft.entry && draft.entry < draft.take_profit,
            Side::Short => draft.take_profit < draft.entry && draft.entry < draft.stop_loss,
        };
        if !consistent {
            return Err(ValidationError::InconsistentLevels {
                side,
                expected: match side {
                    Side::Long => "stop loss < entry < take profit",
                    Side::Short => "take profit < entry < stop loss",
                },
                stop_loss: draft.stop_loss,
                entry: draft.entry,
                take_profit: draft.take_profit,
            });
        }

        let leverage = draft.leverage.unwrap_or(self.settings.default_leverage);
        if !(1..=self.settings.max_leverage).contains(&leverage) {
            return Err(ValidationError::LeverageOutOfRange {
                value: leverage,
                min: 1,
                max: self.settings.max_leverage,
            });
        }

        let size_percent = draft
            .size_percent
            .unwrap_or(self.settings.default_size_percent);
        if size_percent < self.settings.min_size_percent
            || size_percent > self.settings.max_size_percent
        {
            return Err(ValidationError::SizeOutOfRange {
                value: size_percent,
                min: self.settings.min_size_percent,
                max: self.settings.max_size_percent,
            });
        }

        let now = self.clock.now();
        let id = SignalId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut signal = Signal::new(
            id,
            symbol,
            side,
            draft.entry,
            draft.stop_loss,
            draft.take_profit,
            leverage,
            size_percent,
            now,
        )
        .with_expiry(now + Duration::hours(i64::from(self.settings.expiry_hours)));
        signal.advance(SignalStatus::Validated);
        Ok(signal)
    }
}

/// `btc/usdt`, `BTC-USDT` and `BTCUSDT` all name the same market
fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Every accepted signal and its lifecycle status
#[derive(Default)]
pub struct SignalBook {
    signals: DashMap<SignalId, Signal>,
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, signal: Signal) {
        self.signals.insert(signal.id, signal);
    }

    pub fn get(&self, id: SignalId) -> Option<Signal> {
        self.signals.get(&id).map(|signal| signal.clone())
    }

    pub fn status(&self, id: SignalId) -> Option<SignalStatus> {
        self.signals.get(&id).map(|signal| signal.status())
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Move a signal to `next`, enforcing the lifecycle
    pub fn transition(&self, id: SignalId, next: SignalStatus) -> Result<()> {
        let mut signal = self.signals.get_mut(&id).ok_or(Error::UnknownSignal(id))?;
        let from = signal.status();
        if !signal.advance(next) {
            return Err(Error::InvalidTransition { id, from, to: next });
        }
        Ok(())
    }

    /// Operator cancellation; stops further dispatch for the signal
    pub fn cancel(&self, id: SignalId) -> Result<()> {
        self.transition(id, SignalStatus::Cancelled)?;
        info!("[INTAKE] {id} cancelled");
        Ok(())
    }

    pub fn is_cancelled(&self, id: SignalId) -> bool {
        self.status(id) == Some(SignalStatus::Cancelled)
    }
}
