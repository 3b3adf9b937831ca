//! Bootstrap - engine and account setup from a runner config
//!
//! Builds a [`CopyTradeEngine`] from JSON:
//! - Engine limits, timeouts and retry budgets
//! - Exchange accounts, each backed by a live adapter (when credentials are
//!   given) or a paper exchange standing in for the venue
//! - One subscription per user
//! - The signal to distribute

use copytrade_core::{AccountId, EngineEvent, ExchangeAccount, ExchangeId, Subscription, UserId};
use copytrade_gateway::{AdapterOptions, Credentials, GatewayError, PaperExchange, PaperFault, PaperOp};
use copytrade_order_manager::{
    ChannelNotifier, ConfigError, CopyTradeEngine, EngineConfig, InMemoryLedgerStore, SignalDraft,
};
use copytrade_ports::{Clock, ExchangeAdapter, ExchangeError};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

/// Demo configuration shipped with the binary
pub const DEFAULT_CONFIG: &str = include_str!("../config/demo.json");

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] copytrade_order_manager::Error),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Error class a scripted paper fault reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    RateLimited,
    Timeout,
    Auth,
    Rejected,
}

impl FaultKind {
    fn error(&self) -> ExchangeError {
        match self {
            FaultKind::RateLimited => ExchangeError::rate_limited("scripted rate limit"),
            FaultKind::Timeout => ExchangeError::timeout("scripted timeout"),
            FaultKind::Auth => ExchangeError::auth("scripted credential failure"),
            FaultKind::Rejected => ExchangeError::rejected("scripted rejection"),
        }
    }
}

/// Failure injected into a paper account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultConfig {
    pub op: PaperOp,
    pub kind: FaultKind,
    /// Fail this many calls; every call when absent
    #[serde(default)]
    pub times: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub auto_trade: bool,
    pub symbols: Option<Vec<String>>,
    pub max_leverage: Option<u32>,
    pub size_percent: Option<Decimal>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            auto_trade: true,
            symbols: None,
            max_leverage: None,
            size_percent: None,
        }
    }
}

impl SubscriptionConfig {
    fn build(&self, user_id: UserId) -> Subscription {
        let mut subscription = Subscription::new(user_id).with_auto_trade(self.auto_trade);
        if let Some(symbols) = &self.symbols {
            subscription = subscription.with_symbols(symbols.iter().cloned());
        }
        if let Some(leverage) = self.max_leverage {
            subscription = subscription.with_max_leverage(leverage);
        }
        if let Some(size) = self.size_percent {
            subscription = subscription.with_size_percent(size);
        }
        subscription
    }
}

/// One exchange account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub user_id: UserId,
    pub exchange: ExchangeId,
    /// Starting balance of the paper account
    pub balance: Decimal,
    /// Live credentials; the account is simulated when absent
    #[serde(default)]
    pub credentials: Option<CredentialConfig>,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

/// Top-level runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub accounts: Vec<AccountConfig>,
    pub signal: SignalDraft,
}

impl RunnerConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RunnerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The embedded demo: three accounts, one rate limited once, one with
    /// revoked credentials
    pub fn demo() -> Result<Self, ConfigError> {
        Self::from_json(DEFAULT_CONFIG)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if self.accounts.is_empty() {
            return Err(ConfigError::Invalid("no accounts configured".into()));
        }
        for account in &self.accounts {
            if account.balance < Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "user {} {} balance is negative",
                    account.user_id, account.exchange
                )));
            }
        }
        Ok(())
    }
}

/// A registered account and the adapter behind it
pub struct BootstrappedAccount {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub exchange: ExchangeId,
    /// Set for simulated accounts
    pub paper: Option<Arc<PaperExchange>>,
}

/// Engine ready to receive the configured signal
pub struct Bootstrapped {
    pub engine: CopyTradeEngine,
    pub events: Receiver<EngineEvent>,
    pub accounts: Vec<BootstrappedAccount>,
    pub signal: SignalDraft,
}

/// Wire the engine, adapters and subscriptions described by `config`
pub fn bootstrap(config: RunnerConfig, clock: Arc<dyn Clock>) -> Result<Bootstrapped, RunnerError> {
    let (notifier, events) = ChannelNotifier::new(1024);
    let engine = CopyTradeEngine::new(
        config.engine.clone(),
        Arc::new(InMemoryLedgerStore::new()),
        Arc::new(notifier),
        clock.clone(),
    )?;

    let mut accounts = Vec::with_capacity(config.accounts.len());
    for entry in &config.accounts {
        let (adapter, paper) = build_adapter(entry, clock.clone())?;
        let account = ExchangeAccount::new(entry.user_id, entry.exchange).with_balance(entry.balance);
        let account_id = engine.register_account(account, adapter);
        engine.subscribe(entry.subscription.build(entry.user_id));

        accounts.push(BootstrappedAccount {
            account_id,
            user_id: entry.user_id,
            exchange: entry.exchange,
            paper,
        });
    }

    info!(
        "[BOOTSTRAP] {} accounts registered, {} simulated",
        accounts.len(),
        accounts.iter().filter(|a| a.paper.is_some()).count()
    );

    Ok(Bootstrapped {
        engine,
        events,
        accounts,
        signal: config.signal,
    })
}

fn build_adapter(
    entry: &AccountConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn ExchangeAdapter>, Option<Arc<PaperExchange>>), RunnerError> {
    if let Some(credentials) = &entry.credentials {
        let mut creds = Credentials::new(&credentials.api_key, &credentials.api_secret);
        if let Some(passphrase) = &credentials.passphrase {
            creds = creds.with_passphrase(passphrase);
        }
        let adapter = copytrade_gateway::connect(entry.exchange, creds, AdapterOptions::default(), clock)?;
        return Ok((adapter, None));
    }

    let paper = Arc::new(PaperExchange::new(entry.exchange, entry.balance));
    for fault in &entry.faults {
        match fault.times {
            Some(times) => {
                for _ in 0..times {
                    paper.fail_next(fault.op, PaperFault::Reject(fault.kind.error()));
                }
            }
            None => {
                paper.fail_always(fault.op, fault.kind.error());
            }
        }
    }
    Ok((paper.clone(), Some(paper)))
}
