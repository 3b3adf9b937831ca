//! API credentials and request signing
//!
//! All supported venues sign with HMAC-SHA256 over a venue-specific prehash
//! string. Binance, Bybit and MEXC expect the digest as lowercase hex; OKX
//! and Bitget expect it Base64-encoded and also require the key passphrase.

use base64::Engine;
use copytrade_ports::{ExchangeError, ExchangeResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Plain API credentials, as handed over by the credential store
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    /// Builder: Set the key passphrase (OKX, Bitget)
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.api_key.is_empty() || self.api_secret.is_empty()
    }

    pub fn passphrase(&self) -> &str {
        self.passphrase.as_deref().unwrap_or_default()
    }
}

// Never print secrets
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

fn hmac_sha256(secret: &str, message: &str) -> ExchangeResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| ExchangeError::auth(format!("unusable API secret: {err}")))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC-SHA256 signature as a lowercase hex string
pub fn sign_hex(secret: &str, message: &str) -> ExchangeResult<String> {
    hmac_sha256(secret, message).map(hex::encode)
}

/// HMAC-SHA256 signature, Base64-encoded
pub fn sign_base64(secret: &str, message: &str) -> ExchangeResult<String> {
    hmac_sha256(secret, message).map(|digest| base64::engine::general_purpose::STANDARD.encode(digest))
}

/// URL-encode `(key, value)` pairs into a query string, preserving order
pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_signature_matches_known_vector() {
        // Example from the Binance API documentation
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let message = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1\
                       &price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_hex(secret, message).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_empty_secret_still_signs() {
        // HMAC pads short keys, so an empty secret yields a digest rather than an error
        assert_eq!(sign_hex("", "payload").unwrap().len(), 64);
    }

    #[test]
    fn test_base64_signature_shape() {
        let sig = sign_base64("secret", "2020-12-08T09:08:57.715ZGET/api/v5/account/balance").unwrap();
        // 32 bytes -> 44 base64 chars with padding
        assert_eq!(sig.len(), 44);
        assert!(sig.ends_with('='));
    }

    #[test]
    fn test_encode_query_preserves_order() {
        let query = encode_query(&[
            ("symbol", "BTCUSDT".to_string()),
            ("newClientOrderId", "abc/def".to_string()),
        ]);
        assert_eq!(query, "symbol=BTCUSDT&newClientOrderId=abc%2Fdef");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("key", "topsecret").with_passphrase("pass");
        let shown = format!("{creds:?}");
        assert!(!shown.contains("topsecret"));
        assert!(!shown.contains("pass\""));
    }
}
