use copytrade_core::ProtectionResult;
use std::fmt;
use thiserror::Error;

/// Normalized exchange error taxonomy
///
/// Every adapter maps its venue-specific codes into one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeErrorKind {
    /// Credentials rejected; the account is excluded until re-authenticated
    Auth,
    RateLimited,
    /// Call did not complete within its deadline
    Timeout,
    /// Connection failure before a response was received
    Network,
    InsufficientMargin,
    SymbolUnavailable,
    /// Other business rejection by the exchange
    OrderRejected,
    /// Client order id already used
    DuplicateOrder,
    OrderNotFound,
    Unknown,
}

impl ExchangeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeErrorKind::Auth => "AUTH_ERROR",
            ExchangeErrorKind::RateLimited => "RATE_LIMITED",
            ExchangeErrorKind::Timeout => "TIMEOUT",
            ExchangeErrorKind::Network => "NETWORK",
            ExchangeErrorKind::InsufficientMargin => "INSUFFICIENT_MARGIN",
            ExchangeErrorKind::SymbolUnavailable => "SYMBOL_UNAVAILABLE",
            ExchangeErrorKind::OrderRejected => "ORDER_REJECTED",
            ExchangeErrorKind::DuplicateOrder => "DUPLICATE_ORDER",
            ExchangeErrorKind::OrderNotFound => "ORDER_NOT_FOUND",
            ExchangeErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an exchange adapter call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    /// Venue-specific error code, when the exchange returned one
    pub code: Option<String>,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl ToString) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::Timeout, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ExchangeErrorKind::OrderRejected, message)
    }

    /// Worth retrying with the same idempotency key
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ExchangeErrorKind::RateLimited | ExchangeErrorKind::Timeout | ExchangeErrorKind::Network
        )
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ExchangeErrorKind::Auth
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Protection placement failed for at least one leg
///
/// `placed` carries the legs that were accepted before the failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("protection failed: {source}")]
pub struct ProtectionError {
    pub placed: ProtectionResult,
    pub source: ExchangeError,
}

impl ProtectionError {
    pub fn new(placed: ProtectionResult, source: ExchangeError) -> Self {
        Self { placed, source }
    }
}

impl From<ExchangeError> for ProtectionError {
    fn from(source: ExchangeError) -> Self {
        Self::new(ProtectionResult::default(), source)
    }
}

/// Ledger persistence errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict for {0}")]
    Conflict(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ExchangeError::rate_limited("slow down").is_transient());
        assert!(ExchangeError::timeout("deadline").is_transient());
        assert!(ExchangeError::new(ExchangeErrorKind::Network, "reset").is_transient());
        assert!(!ExchangeError::auth("bad key").is_transient());
        assert!(!ExchangeError::new(ExchangeErrorKind::InsufficientMargin, "").is_transient());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = ExchangeError::auth("invalid signature").with_code(-1022);
        assert_eq!(err.to_string(), "AUTH_ERROR: invalid signature");
        assert_eq!(err.code.as_deref(), Some("-1022"));
    }
}
