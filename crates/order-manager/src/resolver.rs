//! Subscriber Resolver
//!
//! The account directory: registered exchange accounts in registration
//! order, each with its adapter, plus one subscription per user. Resolution
//! walks the accounts in that order, so fan-out is reproducible.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use copytrade_core::{
    AccountId, CredentialStatus, ExchangeAccount, Signal, Subscription, UserId,
};
use copytrade_ports::ExchangeAdapter;
use log::{info, warn};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

struct DirectoryEntry {
    account: ExchangeAccount,
    adapter: Arc<dyn ExchangeAdapter>,
}

/// An account selected to receive a signal
#[derive(Clone)]
pub struct ResolvedTarget {
    pub account: ExchangeAccount,
    pub subscription: Subscription,
    pub adapter: Arc<dyn ExchangeAdapter>,
}

impl std::fmt::Debug for ResolvedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTarget")
            .field("account", &self.account.id)
            .field("user", &self.account.user_id)
            .field("exchange", &self.account.exchange)
            .finish()
    }
}

#[derive(Default)]
pub struct AccountDirectory {
    accounts: RwLock<Vec<DirectoryEntry>>,
    subscriptions: RwLock<HashMap<UserId, Subscription>>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account; registration order is resolution order
    pub fn register(&self, account: ExchangeAccount, adapter: Arc<dyn ExchangeAdapter>) -> AccountId {
        let id = account.id;
        info!(
            "[DIRECTORY] registered {} account {} for user {}",
            account.exchange, id, account.user_id
        );
        self.accounts.write().push(DirectoryEntry { account, adapter });
        id
    }

    /// Create or replace a user's subscription
    pub fn subscribe(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .insert(subscription.user_id, subscription);
    }

    pub fn account(&self, id: AccountId) -> Option<ExchangeAccount> {
        self.accounts
            .read()
            .iter()
            .find(|entry| entry.account.id == id)
            .map(|entry| entry.account.clone())
    }

    pub fn adapter(&self, id: AccountId) -> Option<Arc<dyn ExchangeAdapter>> {
        self.accounts
            .read()
            .iter()
            .find(|entry| entry.account.id == id)
            .map(|entry| entry.adapter.clone())
    }

    pub fn subscription(&self, user_id: UserId) -> Option<Subscription> {
        self.subscriptions.read().get(&user_id).cloned()
    }

    pub fn accounts(&self) -> Vec<ExchangeAccount> {
        self.accounts
            .read()
            .iter()
            .map(|entry| entry.account.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    /// Accounts eligible for `signal`, in registration order
    ///
    /// Excluded accounts are logged, never reported as failures.
    pub fn resolve(&self, signal: &Signal, now: DateTime<Utc>, max_daily_trades: u32) -> Vec<ResolvedTarget> {
        let accounts = self.accounts.read();
        let subscriptions = self.subscriptions.read();
        let mut targets = Vec::new();

        for entry in accounts.iter() {
            let account = &entry.account;
            let Some(subscription) = subscriptions.get(&account.user_id) else {
                warn!("[RESOLVER] {} excluded: user {} has no subscription", account.id, account.user_id);
                continue;
            };
            if !subscription.auto_trade {
                warn!("[RESOLVER] {} excluded: auto-trade disabled", account.id);
                continue;
            }
            if !subscription.allows_symbol(&signal.symbol) {
                warn!("[RESOLVER] {} excluded: {} not in allow-list", account.id, signal.symbol);
                continue;
            }
            let trades_today = subscription.trades_today(now);
            if trades_today >= max_daily_trades {
                warn!(
                    "[RESOLVER] {} excluded: daily limit reached ({trades_today}/{max_daily_trades})",
                    account.id
                );
                continue;
            }
            if !account.is_tradeable() {
                warn!("[RESOLVER] {} excluded: credentials {:?}", account.id, account.credentials);
                continue;
            }

            targets.push(ResolvedTarget {
                account: account.clone(),
                subscription: subscription.clone(),
                adapter: entry.adapter.clone(),
            });
        }

        info!(
            "[RESOLVER] {}: {} of {} accounts eligible",
            signal.id,
            targets.len(),
            accounts.len()
        );
        targets
    }

    fn with_account<T>(&self, id: AccountId, update: impl FnOnce(&mut ExchangeAccount) -> T) -> Result<T> {
        let mut accounts = self.accounts.write();
        let entry = accounts
            .iter_mut()
            .find(|entry| entry.account.id == id)
            .ok_or(Error::UnknownAccount(id))?;
        Ok(update(&mut entry.account))
    }

    /// Exclude an account after the exchange rejected its credentials
    pub fn mark_auth_failed(&self, id: AccountId) -> Result<()> {
        self.with_account(id, |account| account.credentials = CredentialStatus::AuthFailed)?;
        warn!("[DIRECTORY] {id} excluded until re-authenticated");
        Ok(())
    }

    /// Mark credentials as not recently verified
    pub fn mark_stale(&self, id: AccountId) -> Result<()> {
        self.with_account(id, |account| account.credentials = CredentialStatus::Stale)
    }

    /// Operator re-enables an account, optionally with a new adapter
    /// carrying refreshed credentials
    pub fn reauthenticate(&self, id: AccountId, adapter: Option<Arc<dyn ExchangeAdapter>>) -> Result<()> {
        let mut accounts = self.accounts.write();
        let entry = accounts
            .iter_mut()
            .find(|entry| entry.account.id == id)
            .ok_or(Error::UnknownAccount(id))?;
        entry.account.credentials = CredentialStatus::Active;
        if let Some(adapter) = adapter {
            entry.adapter = adapter;
        }
        info!("[DIRECTORY] {id} re-authenticated");
        Ok(())
    }

    pub fn update_balance(&self, id: AccountId, balance: Decimal, at: DateTime<Utc>) -> Result<()> {
        self.with_account(id, |account| account.update_balance(balance, at))
    }

    pub fn set_open_positions(&self, id: AccountId, count: u32) -> Result<()> {
        self.with_account(id, |account| account.open_positions = count)
    }

    /// Count an executed trade against the user's daily limit
    pub fn record_trade(&self, user_id: UserId, now: DateTime<Utc>) {
        if let Some(subscription) = self.subscriptions.write().get_mut(&user_id) {
            subscription.record_trade(now);
        }
    }

    /// Count a trade only while the user is under `max_daily_trades`
    ///
    /// Check and increment happen under one write lock, so concurrent
    /// targets of the same user cannot overshoot the limit.
    pub fn try_reserve_trade(&self, user_id: UserId, now: DateTime<Utc>, max_daily_trades: u32) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let Some(subscription) = subscriptions.get_mut(&user_id) else {
            return false;
        };
        if subscription.trades_today(now) >= max_daily_trades {
            return false;
        }
        subscription.record_trade(now);
        true
    }

    /// Return a reserved trade whose entry did not fill
    pub fn release_trade(&self, user_id: UserId) {
        if let Some(subscription) = self.subscriptions.write().get_mut(&user_id) {
            subscription.release_trade();
        }
    }
}
