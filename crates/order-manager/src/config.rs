//! Engine Configuration
//!
//! Values consumed by the engine, loaded from JSON. Every section has
//! defaults, so a config file only needs the values it changes.

use crate::retry::RetryPolicy;
use copytrade_core::ExchangeId;
use copytrade_risk_manager::{HARD_MAX_LEVERAGE, HARD_MAX_SIZE_PERCENT, ParameterError, RiskLimits};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Invalid risk limits: {0}")]
    Risk(#[from] ParameterError),
}

/// Bounds applied when a signal is submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    /// Symbols a signal may name
    pub known_symbols: BTreeSet<String>,
    pub default_leverage: u32,
    pub max_leverage: u32,
    pub default_size_percent: Decimal,
    pub min_size_percent: Decimal,
    pub max_size_percent: Decimal,
    /// Signals not distributed within this window expire
    pub expiry_hours: u32,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            known_symbols: [
                "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT",
                "AVAXUSDT", "LINKUSDT", "DOTUSDT",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            default_leverage: 10,
            max_leverage: HARD_MAX_LEVERAGE,
            default_size_percent: dec!(5),
            min_size_percent: dec!(1),
            max_size_percent: HARD_MAX_SIZE_PERCENT,
            expiry_hours: 24,
        }
    }
}

/// Per-exchange call behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Timeout for a single exchange call (T1)
    pub call_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Smallest order notional the exchange accepts
    pub min_notional: Decimal,
    pub taker_fee_rate: Decimal,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
            min_notional: dec!(5),
            taker_fee_rate: dec!(0.0005),
        }
    }
}

impl ExchangeSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Orchestrator behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Concurrent targets per distribution, independent of target count
    pub max_parallel_calls: usize,
    /// Applies to exchanges without an override
    pub defaults: ExchangeSettings,
    pub exchanges: HashMap<ExchangeId, ExchangeSettings>,
    /// Budget for placing stop-loss / take-profit after a fill
    pub protection_retry: RetryPolicy,
    /// Close a filled position when its protection could not be placed
    pub auto_close_unprotected: bool,
    /// Query the exchange balance before each risk evaluation
    pub refresh_balance: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_parallel_calls: 8,
            defaults: ExchangeSettings::default(),
            exchanges: HashMap::new(),
            protection_retry: RetryPolicy::default(),
            auto_close_unprotected: false,
            refresh_balance: true,
        }
    }
}

impl ExecutionSettings {
    pub fn for_exchange(&self, exchange: ExchangeId) -> &ExchangeSettings {
        self.exchanges.get(&exchange).unwrap_or(&self.defaults)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub signals: SignalSettings,
    pub risk: RiskLimits,
    pub execution: ExecutionSettings,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let signals = &self.signals;
        if signals.known_symbols.is_empty() {
            return Err(ConfigError::Invalid("no known symbols".into()));
        }
        if signals.max_leverage == 0 || signals.max_leverage > HARD_MAX_LEVERAGE {
            return Err(ConfigError::Invalid(format!(
                "signals.max_leverage must be within 1..={HARD_MAX_LEVERAGE}"
            )));
        }
        if !(1..=signals.max_leverage).contains(&signals.default_leverage) {
            return Err(ConfigError::Invalid(
                "signals.default_leverage outside 1..=max_leverage".into(),
            ));
        }
        if signals.min_size_percent <= Decimal::ZERO
            || signals.min_size_percent > signals.max_size_percent
            || signals.max_size_percent > HARD_MAX_SIZE_PERCENT
        {
            return Err(ConfigError::Invalid(format!(
                "signal size bounds must satisfy 0 < min <= max <= {HARD_MAX_SIZE_PERCENT}"
            )));
        }
        if signals.default_size_percent < signals.min_size_percent
            || signals.default_size_percent > signals.max_size_percent
        {
            return Err(ConfigError::Invalid(
                "signals.default_size_percent outside size bounds".into(),
            ));
        }

        self.risk.validate()?;

        if self.execution.max_parallel_calls == 0 {
            return Err(ConfigError::Invalid(
                "execution.max_parallel_calls must be at least 1".into(),
            ));
        }
        let exchanges = std::iter::once(&self.execution.defaults)
            .chain(self.execution.exchanges.values());
        for settings in exchanges {
            if settings.call_timeout_ms == 0 {
                return Err(ConfigError::Invalid("call_timeout_ms must be positive".into()));
            }
            if settings.retry.max_attempts == 0 {
                return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
            }
        }
        Ok(())
    }
}
