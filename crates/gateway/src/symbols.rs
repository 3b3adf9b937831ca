//! Symbol format mapping
//!
//! Signals carry concatenated symbols (`BTCUSDT`). Binance, Bybit and Bitget
//! use that form directly; OKX perpetual swaps use `BTC-USDT-SWAP` and MEXC
//! contracts use `BTC_USDT`.

use copytrade_ports::{ExchangeError, ExchangeErrorKind};

/// Quote assets recognised when splitting a concatenated symbol
const QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "USD"];

/// How a venue spells a perpetual contract symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFormat {
    /// `BTCUSDT`
    Concatenated,
    /// `BTC-USDT-SWAP`
    OkxSwap,
    /// `BTC_USDT`
    Underscore,
}

impl SymbolFormat {
    /// Convert a signal symbol to the venue form
    pub fn to_venue(&self, symbol: &str) -> Result<String, ExchangeError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        match self {
            SymbolFormat::Concatenated => Ok(symbol),
            SymbolFormat::OkxSwap => {
                let (base, quote) = split(&symbol)?;
                Ok(format!("{base}-{quote}-SWAP"))
            }
            SymbolFormat::Underscore => {
                let (base, quote) = split(&symbol)?;
                Ok(format!("{base}_{quote}"))
            }
        }
    }

    /// Convert a venue symbol back to the concatenated form
    pub fn from_venue(&self, venue: &str) -> String {
        match self {
            SymbolFormat::Concatenated => venue.to_string(),
            SymbolFormat::OkxSwap => venue.trim_end_matches("-SWAP").replace('-', ""),
            SymbolFormat::Underscore => venue.replace('_', ""),
        }
    }
}

/// Split `BTCUSDT` into (`BTC`, `USDT`)
pub fn split(symbol: &str) -> Result<(&str, &str), ExchangeError> {
    QUOTES
        .iter()
        .find_map(|quote| {
            symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| (base, *quote))
        })
        .ok_or_else(|| {
            ExchangeError::new(
                ExchangeErrorKind::SymbolUnavailable,
                format!("cannot map symbol {symbol}"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_formats() {
        assert_eq!(SymbolFormat::Concatenated.to_venue("btcusdt").unwrap(), "BTCUSDT");
        assert_eq!(SymbolFormat::OkxSwap.to_venue("BTCUSDT").unwrap(), "BTC-USDT-SWAP");
        assert_eq!(SymbolFormat::Underscore.to_venue("ETHUSDC").unwrap(), "ETH_USDC");
    }

    #[test]
    fn test_round_trip_to_signal_symbol() {
        assert_eq!(SymbolFormat::OkxSwap.from_venue("SOL-USDT-SWAP"), "SOLUSDT");
        assert_eq!(SymbolFormat::Underscore.from_venue("SOL_USDT"), "SOLUSDT");
    }

    #[test]
    fn test_unknown_quote_is_unavailable() {
        let err = SymbolFormat::OkxSwap.to_venue("BTCEUR").unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::SymbolUnavailable);
        assert!(split("USDT").is_err());
    }
}
