use chrono::{DateTime, Days, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::values::UserId;

/// A user's opt-in to receive and auto-execute signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    /// Signals are only executed for this user when set
    pub auto_trade: bool,
    /// Optional symbol allow-list; `None` accepts every symbol
    pub symbols: Option<BTreeSet<String>>,
    /// Per-user leverage ceiling (tighter than the global bound)
    pub max_leverage: Option<u32>,
    /// Per-user size percent, replaces the signal's size when set
    pub size_percent: Option<Decimal>,
    /// Trades executed since the last reset
    pub daily_trade_count: u32,
    /// When the daily counter next resets
    pub daily_reset_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            auto_trade: true,
            symbols: None,
            max_leverage: None,
            size_percent: None,
            daily_trade_count: 0,
            daily_reset_at: None,
        }
    }

    /// Builder: Restrict to a symbol allow-list
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = Some(symbols.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: Set auto-trade flag
    pub fn with_auto_trade(mut self, enabled: bool) -> Self {
        self.auto_trade = enabled;
        self
    }

    /// Builder: Set per-user leverage ceiling
    pub fn with_max_leverage(mut self, leverage: u32) -> Self {
        self.max_leverage = Some(leverage);
        self
    }

    /// Builder: Set per-user size percent
    pub fn with_size_percent(mut self, size_percent: Decimal) -> Self {
        self.size_percent = Some(size_percent);
        self
    }

    pub fn allows_symbol(&self, symbol: &str) -> bool {
        self.symbols
            .as_ref()
            .map(|allowed| allowed.contains(symbol))
            .unwrap_or(true)
    }

    /// Trades counted against today's limit, honouring a pending reset
    pub fn trades_today(&self, now: DateTime<Utc>) -> u32 {
        match self.daily_reset_at {
            Some(reset_at) if now >= reset_at => 0,
            _ => self.daily_trade_count,
        }
    }

    /// Count one executed trade, rolling the counter over at UTC midnight
    pub fn record_trade(&mut self, now: DateTime<Utc>) {
        let expired = self.daily_reset_at.map(|r| now >= r).unwrap_or(true);
        if expired {
            self.daily_trade_count = 0;
            self.daily_reset_at = Some(next_utc_midnight(now));
        }
        self.daily_trade_count += 1;
    }

    /// Give back a counted trade whose entry never filled
    pub fn release_trade(&mut self) {
        self.daily_trade_count = self.daily_trade_count.saturating_sub(1);
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or(now.date_naive());
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}
