//! Integration tests for quantcore

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use quantcore::backtest::BacktestEngine;
use quantcore::cache::MarketCache;
use quantcore::collector::{CollectOutcome, CollectTarget, Collector};
use quantcore::config::{CoveragePolicy, JobSettings};
use quantcore::exchange::{Exchange, ExchangeError, ExchangeRegistry};
use quantcore::factors::{build_factor, FactorSpec};
use quantcore::market::{
    AssetBalance, CancelRequest, Direction, Kline, Order, OrderBook, OrderRequest,
};
use quantcore::monitor::MemoryErrorMonitor;
use quantcore::store::KlineStore;
use quantcore::strategy::{CombineMode, CompositeStrategy, InstanceConfig, RiskConfig};

/// Helper to build a kline series of hourly bars.
fn create_test_klines(closes: &[f64]) -> Vec<Kline> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Kline {
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            open_time: i as i64 * 3_600_000,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1000.0,
        })
        .collect()
}

/// In-memory kline store shared across the pipeline tests.
#[derive(Default)]
struct MemKlineStore {
    rows: Mutex<Vec<Kline>>,
}

#[async_trait]
impl KlineStore for MemKlineStore {
    async fn latest_open_time(&self, _: &str, _: &str, _: &str) -> Result<Option<i64>> {
        Ok(self.rows.lock().await.iter().map(|r| r.open_time).max())
    }

    async fn write(&self, policy: CoveragePolicy, rows: &[Kline]) -> Result<u64> {
        let mut stored = self.rows.lock().await;
        let mut written = 0;
        for row in rows {
            match stored.iter_mut().find(|r| r.open_time == row.open_time) {
                Some(existing) => {
                    if policy == CoveragePolicy::Upsert {
                        *existing = row.clone();
                        written += 1;
                    }
                }
                None => {
                    stored.push(row.clone());
                    written += 1;
                }
            }
        }
        stored.sort_by_key(|r| r.open_time);
        Ok(written)
    }

    async fn recent(&self, _: &str, _: &str, _: &str, limit: u64) -> Result<Vec<Kline>> {
        let stored = self.rows.lock().await;
        let skip = stored.len().saturating_sub(limit as usize);
        Ok(stored[skip..].to_vec())
    }

    async fn range(&self, _: &str, _: &str, _: &str, start: i64, end: i64) -> Result<Vec<Kline>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .filter(|r| r.open_time >= start && r.open_time <= end)
            .cloned()
            .collect())
    }
}

/// Cache fake recording every write-through refresh.
#[derive(Default)]
struct RecordingCache {
    puts: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl MarketCache for RecordingCache {
    async fn put_klines(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        rows: &[Kline],
        _ttl_secs: u64,
    ) -> Result<()> {
        self.puts
            .lock()
            .await
            .push((format!("{exchange}:{symbol}:{timeframe}"), rows.len().min(limit)));
        Ok(())
    }

    async fn get_klines(&self, _: &str, _: &str, _: &str, _: usize) -> Result<Option<Vec<Kline>>> {
        Ok(None)
    }
}

/// Exchange fake serving a fixed uptrend series.
struct FixedSeriesExchange {
    series: Vec<Kline>,
    calls: AtomicUsize,
}

impl FixedSeriesExchange {
    fn new(series: Vec<Kline>) -> Self {
        Self { series, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Exchange for FixedSeriesExchange {
    fn name(&self) -> &str {
        "binance"
    }

    async fn get_klines(
        &self,
        _symbol: &str,
        _interval: &str,
        start: Option<i64>,
        _end: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Kline>, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let from = start.unwrap_or(i64::MIN);
        Ok(self
            .series
            .iter()
            .filter(|k| k.open_time >= from)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_order_book(&self, symbol: &str, _: u32) -> Result<OrderBook, ExchangeError> {
        Ok(OrderBook { symbol: symbol.to_string(), bids: Vec::new(), asks: Vec::new() })
    }

    async fn get_balance(&self) -> Result<HashMap<String, AssetBalance>, ExchangeError> {
        Ok(HashMap::new())
    }

    async fn get_ticker_price(&self, _: &str) -> Result<f64, ExchangeError> {
        Ok(self.series.last().map(|k| k.close).unwrap_or(0.0))
    }

    async fn place_order(&self, _: &OrderRequest) -> Result<Order, ExchangeError> {
        Err(ExchangeError::Unavailable("fixture".into()))
    }

    async fn cancel_order(&self, _: &CancelRequest) -> Result<bool, ExchangeError> {
        Ok(false)
    }
}

fn registry_with(adapter: Arc<dyn Exchange>) -> Arc<ExchangeRegistry> {
    let mut adapters: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
    adapters.insert("binance".to_string(), adapter);
    Arc::new(ExchangeRegistry::from_adapters(adapters))
}

#[test]
fn test_factor_on_trending_series() {
    let factor = build_factor(&FactorSpec {
        kind: "sma".to_string(),
        params: serde_json::json!({"period": 5}),
    })
    .unwrap();

    let uptrend: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 2.0).collect();
    let signal = factor.signal(&create_test_klines(&uptrend)).unwrap();
    assert_eq!(signal.direction, Direction::Buy);
}

#[test]
fn test_composite_strategy_from_stored_config() {
    let config = InstanceConfig {
        id: 1,
        name: "trend".to_string(),
        exchange: "binance".to_string(),
        symbol: "BTCUSDT".to_string(),
        timeframe: "1h".to_string(),
        mode: CombineMode::Vote,
        factors: vec![
            FactorSpec { kind: "sma".to_string(), params: serde_json::json!({"period": 5}) },
            FactorSpec { kind: "ema".to_string(), params: serde_json::json!({"fast": 3, "slow": 7}) },
        ],
        weights: HashMap::new(),
        risk: RiskConfig::default(),
    };

    let strategy = CompositeStrategy::from_config(&config).unwrap();
    let uptrend: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 2.0).collect();
    assert_eq!(strategy.evaluate(&create_test_klines(&uptrend)), Direction::Buy);
}

#[tokio::test]
async fn test_collect_persist_and_cache_refresh() {
    let series = create_test_klines(&[100.0, 101.0, 102.0, 103.0, 104.0]);
    let exchange = Arc::new(FixedSeriesExchange::new(series));
    let store = Arc::new(MemKlineStore::default());
    let cache = Arc::new(RecordingCache::default());

    let collector = Collector::new(
        registry_with(exchange.clone()),
        store.clone(),
        cache.clone(),
        Arc::new(MemoryErrorMonitor::new()),
    );
    let settings = JobSettings::default();
    let target = CollectTarget {
        exchange: "binance".to_string(),
        symbol: "BTCUSDT".to_string(),
        timeframe: "1h".to_string(),
    };

    let now = 10 * 3_600_000;
    let report = collector.run_at(std::slice::from_ref(&target), &settings, now).await;
    assert!(matches!(report.outcomes[0].1, CollectOutcome::Collected(5)));
    assert_eq!(store.rows.lock().await.len(), 5);
    // write-through refresh happened for the collected triple
    let puts = cache.puts.lock().await;
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].0, "binance:BTCUSDT:1h");

    // a later run resumes from stored coverage instead of backfilling
    drop(puts);
    let later = now + settings.collect_cooldown_secs * 1000;
    let report = collector.run_at(std::slice::from_ref(&target), &settings, later).await;
    assert!(matches!(report.outcomes[0].1, CollectOutcome::Collected(_)));
    assert_eq!(store.rows.lock().await.len(), 5);
}

#[tokio::test]
async fn test_write_new_never_overwrites_existing_bars() {
    let store = MemKlineStore::default();
    let original = create_test_klines(&[100.0, 101.0]);
    assert_eq!(store.write(CoveragePolicy::WriteNew, &original).await.unwrap(), 2);

    // same (exchange, symbol, timeframe, open_time) keys, different OHLCV
    let rewrite = create_test_klines(&[555.0, 556.0]);
    assert_eq!(store.write(CoveragePolicy::WriteNew, &rewrite).await.unwrap(), 0);

    let rows = store.recent("binance", "BTCUSDT", "1h", 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].close, 100.0);
    assert_eq!(rows[1].close, 101.0);

    // upsert on the same keys replaces values and leaves exactly one row each
    assert_eq!(store.write(CoveragePolicy::Upsert, &rewrite).await.unwrap(), 2);
    let rows = store.recent("binance", "BTCUSDT", "1h", 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].close, 555.0);
    assert_eq!(rows[1].close, 556.0);
}

#[tokio::test]
async fn test_backtest_over_collected_series() {
    let store = Arc::new(MemKlineStore::default());
    let closes: Vec<f64> = (0..60)
        .map(|i| 100.0 + (i as f64 * 0.7).sin() * 10.0 + i as f64 * 0.2)
        .collect();
    store
        .write(CoveragePolicy::Upsert, &create_test_klines(&closes))
        .await
        .unwrap();

    let config = InstanceConfig {
        id: 1,
        name: "band".to_string(),
        exchange: "binance".to_string(),
        symbol: "BTCUSDT".to_string(),
        timeframe: "1h".to_string(),
        mode: CombineMode::Weighted,
        factors: vec![FactorSpec {
            kind: "rsi".to_string(),
            params: serde_json::json!({"period": 7}),
        }],
        weights: HashMap::new(),
        risk: RiskConfig::default(),
    };

    let engine = BacktestEngine::new(store);
    let first = engine.run(&config, 0, i64::MAX).await.unwrap();
    let second = engine.run(&config, 0, i64::MAX).await.unwrap();

    assert_eq!(first.bars, 60);
    // identical inputs, identical aggregates
    assert_eq!(first.pnl, second.pnl);
    assert_eq!(first.win_rate, second.win_rate);
    assert_eq!(first.max_drawdown, second.max_drawdown);
}
