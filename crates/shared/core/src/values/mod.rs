use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Price value - uses Decimal for precision
pub type Price = Decimal;

/// Quantity value - uses Decimal for precision
pub type Quantity = Decimal;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Symbol identifier as submitted with a signal (e.g. `BTCUSDT`)
pub type Symbol = String;

/// Subscriber identifier as issued by the command interface
pub type UserId = i64;
