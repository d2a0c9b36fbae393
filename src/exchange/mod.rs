//! Exchange adapter layer
//!
//! A uniform async interface over heterogeneous exchange REST APIs. All
//! operations are network calls; callers must treat every error except
//! [`ExchangeError::InvalidSymbol`] as retryable.

pub mod binance;
pub mod crypto;
pub mod okx;
pub mod registry;

pub use binance::BinanceAdapter;
pub use okx::OkxAdapter;
pub use registry::ExchangeRegistry;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::market::{AssetBalance, CancelRequest, Kline, Order, OrderBook, OrderRequest};

/// Request timeout applied to every exchange call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by exchange adapters.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network failure, timeout, or exchange-side outage
    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    /// The symbol is unknown to the exchange; retrying cannot help
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// The exchange rejected the request for rate-limit reasons
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// An error code returned by the exchange API
    #[error("exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    /// The response body could not be decoded
    #[error("response parse error: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether a caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidSymbol(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Uniform interface over one exchange account.
///
/// `get_klines` returns bars ascending by open time, bounded by `limit`.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Name of the configured exchange entry this adapter serves.
    fn name(&self) -> &str;

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError>;

    async fn get_order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook, ExchangeError>;

    async fn get_balance(&self) -> Result<HashMap<String, AssetBalance>, ExchangeError>;

    /// Latest traded price for a symbol, used as the mark price in sync.
    async fn get_ticker_price(&self, symbol: &str) -> Result<f64, ExchangeError>;

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, request: &CancelRequest) -> Result<bool, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ExchangeError::Unavailable("down".into()).is_retryable());
        assert!(ExchangeError::RateLimited("429".into()).is_retryable());
        assert!(ExchangeError::Api { code: -1000, message: "unknown".into() }.is_retryable());
        assert!(!ExchangeError::InvalidSymbol("NOPEUSDT".into()).is_retryable());
    }
}
