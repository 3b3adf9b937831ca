//! Copytrade Gateway
//!
//! Exchange execution adapters for the copytrade engine. Provides:
//! - Transport abstraction (reqwest over HTTPS, with a scripted transport for tests)
//! - Request signing for each venue
//! - Symbol format mapping
//! - One [`ExchangeAdapter`](copytrade_ports::ExchangeAdapter) per exchange
//!   (Binance, Bybit, OKX, Bitget, MEXC) plus an in-process paper exchange
//!
//! ## Architecture
//!
//! ```text
//!   Execution Orchestrator
//!            │ ExchangeAdapter (normalized orders, errors)
//!   ┌────────▼─────────┐
//!   │  Venue adapters  │  binance / bybit / okx / bitget / mexc / paper
//!   └────────┬─────────┘
//!            │ RestTransport (signed REST requests)
//!   ┌────────▼─────────┐
//!   │  HttpTransport   │  reqwest
//!   └──────────────────┘
//! ```
//!
//! ## Idempotency
//!
//! Every order-creating request carries a client order id derived from the
//! execution's idempotency key. When a venue reports that id as a duplicate,
//! the adapter looks the order up instead of failing, so a retried call
//! resolves to the order placed by the first attempt.

pub mod adapters;
pub mod auth;
pub mod error;
pub mod symbols;
pub mod transport;

// Re-export commonly used types
pub use adapters::{
    AdapterOptions, BinanceAdapter, BitgetAdapter, BybitAdapter, MexcAdapter, OkxAdapter,
    PaperExchange, PaperFault, PaperOp, connect, connect_with_transport,
};
pub use auth::Credentials;
pub use error::{GatewayError, TransportError};
pub use symbols::SymbolFormat;
pub use transport::{
    Method, RestRequest, RestResponse, RestTransport, http::HttpTransport,
    scripted::ScriptedTransport,
};
