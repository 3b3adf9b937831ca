use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::values::UserId;

/// Unique identifier for an exchange account
pub type AccountId = Uuid;

/// Supported exchange backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Bybit,
    Okx,
    Bitget,
    Mexc,
    /// In-process simulator, used for dry runs and tests
    Paper,
}

impl ExchangeId {
    pub const LIVE: [ExchangeId; 5] = [
        ExchangeId::Binance,
        ExchangeId::Bybit,
        ExchangeId::Okx,
        ExchangeId::Bitget,
        ExchangeId::Mexc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Okx => "okx",
            ExchangeId::Bitget => "bitget",
            ExchangeId::Mexc => "mexc",
            ExchangeId::Paper => "paper",
        }
    }

    /// OKX and Bitget API keys carry a passphrase
    pub fn requires_passphrase(&self) -> bool {
        matches!(self, ExchangeId::Okx | ExchangeId::Bitget)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            "bybit" => Ok(ExchangeId::Bybit),
            "okx" => Ok(ExchangeId::Okx),
            "bitget" => Ok(ExchangeId::Bitget),
            "mexc" => Ok(ExchangeId::Mexc),
            "paper" => Ok(ExchangeId::Paper),
            other => Err(format!("unsupported exchange: {other}")),
        }
    }
}

/// Credential state as last observed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CredentialStatus {
    #[default]
    Active,
    /// Credentials not verified recently; excluded until refreshed
    Stale,
    /// Exchange rejected the credentials; excluded until re-authenticated
    AuthFailed,
}

/// A user's connected account on one exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeAccount {
    pub id: AccountId,
    pub user_id: UserId,
    pub exchange: ExchangeId,
    /// Last known available balance (quote currency)
    pub balance: Decimal,
    pub balance_updated_at: Option<DateTime<Utc>>,
    /// Open positions as last counted by the ledger
    pub open_positions: u32,
    pub credentials: CredentialStatus,
    pub registered_at: DateTime<Utc>,
}

impl ExchangeAccount {
    pub fn new(user_id: UserId, exchange: ExchangeId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            exchange,
            balance: Decimal::ZERO,
            balance_updated_at: None,
            open_positions: 0,
            credentials: CredentialStatus::Active,
            registered_at: Utc::now(),
        }
    }

    /// Builder: Seed the balance snapshot
    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }

    /// Only accounts with working credentials receive signals
    pub fn is_tradeable(&self) -> bool {
        self.credentials == CredentialStatus::Active
    }

    pub fn update_balance(&mut self, balance: Decimal, at: DateTime<Utc>) {
        self.balance = balance;
        self.balance_updated_at = Some(at);
    }
}
