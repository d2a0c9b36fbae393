//! OKX v5 REST adapter

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::exchange::{Exchange, ExchangeError, REQUEST_TIMEOUT};
use crate::market::{
    AssetBalance, BookLevel, CancelRequest, Kline, Order, OrderBook, OrderRequest, OrderSide,
    OrderType,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://www.okx.com";

pub struct OkxAdapter {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    passphrase: String,
}

impl OkxAdapter {
    pub fn new(
        name: &str,
        api_key: &str,
        api_secret: &str,
        passphrase: &str,
    ) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Unavailable(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            passphrase: passphrase.to_string(),
        })
    }

    /// OKX signs `timestamp + method + path + body` with HMAC-SHA256, base64.
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Unavailable(e.to_string()))?;
        mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn get_public(&self, path_and_query: &str) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn request_signed(
        &self,
        method: reqwest::Method,
        path_and_query: &str,
        body: Option<&Value>,
    ) -> Result<Value, ExchangeError> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();
        let signature = self.sign(&timestamp, method.as_str(), path_and_query, &body_str)?;

        let url = format!("{}{}", self.base_url, path_and_query);
        let mut request = self
            .client
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.passphrase);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::decode(request.send().await?).await
    }

    /// OKX wraps responses as `{"code": "0", "msg": "", "data": [...]}`.
    async fn decode(response: reqwest::Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited(body));
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(e.to_string()))?;
        let code = value
            .get("code")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        if code != 0 {
            let message = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(match code {
                51001 => ExchangeError::InvalidSymbol(message),
                50011 | 50013 => ExchangeError::RateLimited(message),
                _ => ExchangeError::Api { code, message },
            });
        }
        Ok(value.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Map a timeframe string to the OKX `bar` parameter (hours and days
    /// are uppercase there).
    fn bar_param(interval: &str) -> String {
        match interval {
            "1h" => "1H".to_string(),
            "4h" => "4H".to_string(),
            "1d" => "1D".to_string(),
            other => other.to_string(),
        }
    }
}

fn str_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_str).and_then(|s| s.parse().ok())
}

#[async_trait]
impl Exchange for OkxAdapter {
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
        let mut path = format!(
            "/api/v5/market/candles?instId={}&bar={}&limit={}",
            symbol,
            Self::bar_param(interval),
            limit
        );
        // OKX paginates backwards: `before` is the older bound
        if let Some(start) = start {
            path.push_str(&format!("&before={}", start - 1));
        }
        if let Some(end) = end {
            path.push_str(&format!("&after={}", end + 1));
        }

        let data = self.get_public(&path).await?;
        let rows = data
            .as_array()
            .ok_or_else(|| ExchangeError::Parse("candles response is not an array".into()))?;

        // newest-first on the wire
        let mut klines: Vec<Kline> = rows
            .iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                Some(Kline {
                    exchange: self.name.clone(),
                    symbol: symbol.to_string(),
                    timeframe: interval.to_string(),
                    open_time: arr.first()?.as_str()?.parse().ok()?,
                    open: str_f64(arr.get(1))?,
                    high: str_f64(arr.get(2))?,
                    low: str_f64(arr.get(3))?,
                    close: str_f64(arr.get(4))?,
                    volume: str_f64(arr.get(5))?,
                })
            })
            .collect();
        klines.sort_by_key(|k| k.open_time);
        Ok(klines)
    }

    async fn get_order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook, ExchangeError> {
        let path = format!("/api/v5/market/books?instId={}&sz={}", symbol, depth);
        let data = self.get_public(&path).await?;
        let book = data
            .as_array()
            .and_then(|rows| rows.first())
            .ok_or_else(|| ExchangeError::Parse("empty order book response".into()))?;

        let parse_side = |side: Option<&Value>| -> Vec<BookLevel> {
            side.and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| {
                            let arr = row.as_array()?;
                            Some(BookLevel {
                                price: str_f64(arr.first())?,
                                quantity: str_f64(arr.get(1))?,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: parse_side(book.get("bids")),
            asks: parse_side(book.get("asks")),
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, AssetBalance>, ExchangeError> {
        let data = self
            .request_signed(reqwest::Method::GET, "/api/v5/account/balance", None)
            .await?;
        let details = data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("details"))
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Parse("balance response missing details".into()))?;

        let mut result = HashMap::new();
        for entry in details {
            let asset = entry.get("ccy").and_then(Value::as_str).unwrap_or_default();
            let free = str_f64(entry.get("availBal")).unwrap_or(0.0);
            let used = str_f64(entry.get("frozenBal")).unwrap_or(0.0);
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
        let path = format!("/api/v5/market/ticker?instId={}", symbol);
        let data = self.get_public(&path).await?;
        data.as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| str_f64(row.get("last")))
            .ok_or_else(|| ExchangeError::Parse("ticker response missing last price".into()))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let side = match request.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };
        let mut body = serde_json::json!({
            "instId": request.symbol,
            "tdMode": "cash",
            "side": side,
            "sz": request.quantity.to_string(),
        });
        match request.order_type {
            OrderType::Market => {
                body["ordType"] = Value::String("market".into());
            }
            OrderType::Limit => {
                let price = request.price.ok_or_else(|| {
                    ExchangeError::Api { code: 0, message: "limit order without price".into() }
                })?;
                body["ordType"] = Value::String("limit".into());
                body["px"] = Value::String(price.to_string());
            }
        }

        let data = self
            .request_signed(reqwest::Method::POST, "/api/v5/trade/order", Some(&body))
            .await?;
        let id = data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("ordId"))
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::Parse("order response missing ordId".into()))?
            .to_string();

        Ok(Order {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: "live".to_string(),
        })
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<bool, ExchangeError> {
        let body = serde_json::json!({
            "instId": request.symbol,
            "ordId": request.order_id,
        });
        let data = self
            .request_signed(reqwest::Method::POST, "/api/v5/trade/cancel-order", Some(&body))
            .await?;
        let code = data
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("sCode"))
            .and_then(Value::as_str)
            .unwrap_or("1");
        Ok(code == "0")
    }
}
