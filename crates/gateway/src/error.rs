//! Error types for the gateway crate

use copytrade_core::ExchangeId;
use copytrade_ports::{ExchangeError, ExchangeErrorKind};
use thiserror::Error;

/// Transport-level errors
///
/// Non-2xx HTTP responses are not errors at this level; they are returned
/// as responses so each adapter can decode its venue error body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),
}

impl From<TransportError> for ExchangeError {
    fn from(err: TransportError) -> Self {
        let kind = match err {
            TransportError::Network(_) => ExchangeErrorKind::Network,
            TransportError::Timeout => ExchangeErrorKind::Timeout,
            TransportError::InvalidRequest(_) | TransportError::Deserialization(_) => {
                ExchangeErrorKind::Unknown
            }
        };
        ExchangeError::new(kind, err.to_string())
    }
}

/// Gateway-level errors (adapter construction)
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Missing API credentials for {0}")]
    MissingCredentials(ExchangeId),

    #[error("{0} requires an API passphrase")]
    MissingPassphrase(ExchangeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_map_to_taxonomy() {
        let timeout: ExchangeError = TransportError::Timeout.into();
        assert_eq!(timeout.kind, ExchangeErrorKind::Timeout);
        assert!(timeout.is_transient());

        let network: ExchangeError = TransportError::Network("reset".into()).into();
        assert!(network.is_transient());

        let decode: ExchangeError = TransportError::Deserialization("eof".into()).into();
        assert_eq!(decode.kind, ExchangeErrorKind::Unknown);
    }
}
