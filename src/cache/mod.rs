//! Read cache over redis
//!
//! Cache entries are derived, disposable views with short TTLs and
//! last-writer-wins semantics; nothing here is a source of truth. Keys are
//! namespaced by domain: `klines:{exchange}:{symbol}:{timeframe}:{limit}`.

use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use crate::market::Kline;

pub type Redis = Client;

pub fn get_redis_client(redis_url: &str) -> Result<Redis> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

fn kline_key(exchange: &str, symbol: &str, timeframe: &str, limit: usize) -> String {
    format!("klines:{}:{}:{}:{}", exchange, symbol, timeframe, limit)
}

/// Write-through read cache for kline slices.
#[async_trait]
pub trait MarketCache: Send + Sync {
    /// Overwrite the cached slice for a triple with a fresh one.
    async fn put_klines(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        rows: &[Kline],
        ttl_secs: u64,
    ) -> Result<()>;

    async fn get_klines(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Option<Vec<Kline>>>;
}

pub struct RedisMarketCache {
    client: Client,
}

impl RedisMarketCache {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketCache for RedisMarketCache {
    async fn put_klines(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        rows: &[Kline],
        ttl_secs: u64,
    ) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = kline_key(exchange, symbol, timeframe, limit);
        let payload = serde_json::to_string(rows)?;
        let _: () = conn.set_ex(key, payload, ttl_secs).await?;
        Ok(())
    }

    async fn get_klines(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Option<Vec<Kline>>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = kline_key(exchange, symbol, timeframe, limit);
        let payload: Option<String> = conn.get(key).await?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
