//! Binance spot REST adapter

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use crate::exchange::{Exchange, ExchangeError, REQUEST_TIMEOUT};
use crate::market::{
    AssetBalance, BookLevel, CancelRequest, Kline, Order, OrderBook, OrderRequest, OrderSide,
    OrderType,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

pub struct BinanceAdapter {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceAdapter {
    pub fn new(name: &str, api_key: &str, api_secret: &str) -> Result<Self, ExchangeError> {
        Self::with_base_url(name, api_key, api_secret, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        name: &str,
        api_key: &str,
        api_secret: &str,
        base_url: &str,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Unavailable(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// HMAC-SHA256 signature over the query string, hex encoded.
    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Unavailable(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_json(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn get_signed(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let query = self.signed_query(query)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn post_signed(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let query = self.signed_query(query)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_signed(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let query = self.signed_query(query)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    fn signed_query(&self, query: &str) -> Result<String, ExchangeError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let query = if query.is_empty() {
            format!("timestamp={}", timestamp)
        } else {
            format!("{}&timestamp={}", query, timestamp)
        };
        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn decode(response: reqwest::Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(ExchangeError::RateLimited(body));
        }
        if !status.is_success() {
            return Err(Self::classify_error(&body));
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    /// Binance returns errors as `{"code": -1121, "msg": "..."}`.
    fn classify_error(body: &str) -> ExchangeError {
        match serde_json::from_str::<Value>(body) {
            Ok(v) => {
                let code = v.get("code").and_then(Value::as_i64).unwrap_or(0);
                let message = v
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or(body)
                    .to_string();
                match code {
                    -1121 => ExchangeError::InvalidSymbol(message),
                    -1003 | -1015 => ExchangeError::RateLimited(message),
                    _ => ExchangeError::Api { code, message },
                }
            }
            Err(_) => ExchangeError::Parse(body.to_string()),
        }
    }

    fn parse_kline_row(&self, symbol: &str, interval: &str, row: &Value) -> Option<Kline> {
        let arr = row.as_array()?;
        Some(Kline {
            exchange: self.name.clone(),
            symbol: symbol.to_string(),
            timeframe: interval.to_string(),
            open_time: arr.first()?.as_i64()?,
            open: arr.get(1)?.as_str()?.parse().ok()?,
            high: arr.get(2)?.as_str()?.parse().ok()?,
            low: arr.get(3)?.as_str()?.parse().ok()?,
            close: arr.get(4)?.as_str()?.parse().ok()?,
            volume: arr.get(5)?.as_str()?.parse().ok()?,
        })
    }
}

fn parse_levels(value: Option<&Value>) -> Vec<BookLevel> {
    value
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let arr = row.as_array()?;
                    Some(BookLevel {
                        price: arr.first()?.as_str()?.parse().ok()?,
                        quantity: arr.get(1)?.as_str()?.parse().ok()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Exchange for BinanceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<i64>,
        end: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let mut query = format!("symbol={}&interval={}&limit={}", symbol, interval, limit);
        if let Some(start) = start {
            query.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end {
            query.push_str(&format!("&endTime={}", end));
        }

        debug!(exchange = %self.name, symbol = %symbol, interval = %interval, "fetching klines");
        let body = self.get_json("/api/v3/klines", &query).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("klines response is not an array".into()))?;

        let mut klines: Vec<Kline> = rows
            .iter()
            .filter_map(|row| self.parse_kline_row(symbol, interval, row))
            .collect();
        klines.sort_by_key(|k| k.open_time);
        Ok(klines)
    }

    async fn get_order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook, ExchangeError> {
        let query = format!("symbol={}&limit={}", symbol, depth);
        let body = self.get_json("/api/v3/depth", &query).await?;
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: parse_levels(body.get("bids")),
            asks: parse_levels(body.get("asks")),
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, AssetBalance>, ExchangeError> {
        let body = self.get_signed("/api/v3/account", "").await?;
        let balances = body
            .get("balances")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Parse("account response missing balances".into()))?;

        let mut result = HashMap::new();
        for entry in balances {
            let asset = entry.get("asset").and_then(Value::as_str).unwrap_or_default();
            let free: f64 = entry
                .get("free")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            let used: f64 = entry
                .get("locked")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.0);
            if free > 0.0 || used > 0.0 {
                result.insert(
                    asset.to_string(),
                    AssetBalance { free, used, total: free + used },
                );
            }
        }
        Ok(result)
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let query = format!("symbol={}", symbol);
        let body = self.get_json("/api/v3/ticker/price", &query).await?;
        body.get("price")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ExchangeError::Parse("ticker response missing price".into()))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let mut query = format!(
            "symbol={}&side={}&quantity={}",
            request.symbol,
            request.side.as_str(),
            request.quantity
        );
        match request.order_type {
            OrderType::Market => query.push_str("&type=MARKET"),
            OrderType::Limit => {
                let price = request.price.ok_or_else(|| {
                    ExchangeError::Api { code: 0, message: "limit order without price".into() }
                })?;
                query.push_str(&format!("&type=LIMIT&timeInForce=GTC&price={}", price));
            }
        }

        let body = self.post_signed("/api/v3/order", &query).await?;
        let id = body
            .get("orderId")
            .and_then(Value::as_i64)
            .map(|id| id.to_string())
            .ok_or_else(|| ExchangeError::Parse("order response missing orderId".into()))?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("NEW")
            .to_string();

        Ok(Order {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status,
        })
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<bool, ExchangeError> {
        let query = format!("symbol={}&orderId={}", request.symbol, request.order_id);
        let body = self.delete_signed("/api/v3/order", &query).await?;
        let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        Ok(status == "CANCELED")
    }
}
