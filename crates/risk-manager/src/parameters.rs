//! Risk Limits
//!
//! Configured limits consumed by the gatekeeper. Hard caps apply on top of
//! whatever the configuration says.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// No order may commit more than this share of the balance, in percent
pub const HARD_MAX_SIZE_PERCENT: Decimal = dec!(10);

/// Upper leverage bound accepted anywhere in the engine
pub const HARD_MAX_LEVERAGE: u32 = 50;

/// A configured limit outside its usable range
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("max_open_positions must be at least 1")]
    NoOpenPositions,

    #[error("max_daily_trades must be at least 1")]
    NoDailyTrades,

    #[error("max_leverage {0} outside 1..={HARD_MAX_LEVERAGE}")]
    LeverageOutOfRange(u32),

    #[error("max_size_percent {0} outside (0, {HARD_MAX_SIZE_PERCENT}]")]
    SizePercentOutOfRange(Decimal),

    #[error("quantity_precision {0} above 18")]
    PrecisionTooHigh(u32),
}

/// Limits applied to every execution target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Trades per account per UTC day
    pub max_daily_trades: u32,
    /// Open positions per account
    pub max_open_positions: u32,
    /// Global leverage ceiling (subscriptions may set a lower one)
    pub max_leverage: u32,
    /// Size percent ceiling; never above [`HARD_MAX_SIZE_PERCENT`]
    pub max_size_percent: Decimal,
    /// Decimal places kept when rounding order quantities down
    pub quantity_precision: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_trades: 10,
            max_open_positions: 5,
            max_leverage: HARD_MAX_LEVERAGE,
            max_size_percent: HARD_MAX_SIZE_PERCENT,
            quantity_precision: 3,
        }
    }
}

impl RiskLimits {
    /// Effective size ceiling after the hard cap
    pub fn size_cap(&self) -> Decimal {
        self.max_size_percent.min(HARD_MAX_SIZE_PERCENT)
    }

    /// Effective leverage ceiling for an account with an optional override
    pub fn leverage_cap(&self, account_max: Option<u32>) -> u32 {
        let global = self.max_leverage.clamp(1, HARD_MAX_LEVERAGE);
        account_max.map_or(global, |max| max.clamp(1, global))
    }

    /// Check the limits are usable; reports the first problem
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.max_open_positions == 0 {
            return Err(ParameterError::NoOpenPositions);
        }
        if self.max_daily_trades == 0 {
            return Err(ParameterError::NoDailyTrades);
        }
        if self.max_leverage == 0 || self.max_leverage > HARD_MAX_LEVERAGE {
            return Err(ParameterError::LeverageOutOfRange(self.max_leverage));
        }
        if self.max_size_percent <= Decimal::ZERO || self.max_size_percent > HARD_MAX_SIZE_PERCENT {
            return Err(ParameterError::SizePercentOutOfRange(self.max_size_percent));
        }
        if self.quantity_precision > 18 {
            return Err(ParameterError::PrecisionTooHigh(self.quantity_precision));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps() {
        let limits = RiskLimits {
            max_leverage: 20,
            max_size_percent: dec!(8),
            ..Default::default()
        };
        assert_eq!(limits.size_cap(), dec!(8));
        assert_eq!(limits.leverage_cap(None), 20);
        assert_eq!(limits.leverage_cap(Some(5)), 5);
        assert_eq!(limits.leverage_cap(Some(100)), 20);
        assert_eq!(limits.leverage_cap(Some(0)), 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let limits: RiskLimits = serde_json::from_str(r#"{"max_open_positions": 2}"#).unwrap();
        assert_eq!(limits.max_open_positions, 2);
        assert_eq!(limits.max_daily_trades, 10);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let limits = RiskLimits {
            max_size_percent: dec!(15),
            ..Default::default()
        };
        assert_eq!(
            limits.validate(),
            Err(ParameterError::SizePercentOutOfRange(dec!(15)))
        );

        let limits = RiskLimits {
            max_leverage: 75,
            ..Default::default()
        };
        let err = limits.validate().unwrap_err();
        assert_eq!(err, ParameterError::LeverageOutOfRange(75));
        assert_eq!(err.to_string(), "max_leverage 75 outside 1..=50");

        let limits = RiskLimits {
            max_daily_trades: 0,
            ..Default::default()
        };
        assert_eq!(limits.validate(), Err(ParameterError::NoDailyTrades));
    }
}
