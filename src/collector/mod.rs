//! Market data collection
//!
//! One run walks every configured (exchange, symbol, timeframe) target,
//! fetches the bars missing since the latest stored one, persists them under
//! the configured coverage policy and refreshes the read cache. A failing
//! target is reported and never aborts the rest of the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::cache::MarketCache;
use crate::config::{CachePolicy, JobSettings};
use crate::exchange::ExchangeRegistry;
use crate::market::timeframe_ms;
use crate::monitor::{ErrorDomain, ErrorMonitor};
use crate::store::KlineStore;

/// Upper bound on bars requested in a single exchange call.
const MAX_FETCH_LIMIT: u32 = 1000;

/// One (exchange, symbol, timeframe) collection unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CollectTarget {
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
}

impl CollectTarget {
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.exchange, self.symbol, self.timeframe)
    }
}

/// Per-target result of one collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Rows written (0 when the exchange returned nothing new)
    Collected(u64),
    /// Target intentionally not fetched
    Skipped(String),
    /// Target errored; the rest of the run continued
    Failed(String),
}

/// Summary of one collection run.
#[derive(Debug, Default)]
pub struct CollectReport {
    pub outcomes: Vec<(CollectTarget, CollectOutcome)>,
}

impl CollectReport {
    pub fn collected(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CollectOutcome::Collected(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CollectOutcome::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, CollectOutcome::Skipped(_)))
            .count()
    }
}

/// The fetch request derived for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// First open time to request, epoch ms; `None` requests the most
    /// recent bars
    pub start: Option<i64>,
    pub limit: u32,
}

/// Derive the fetch request from stored coverage.
///
/// With no stored rows this is a plain backfill of `backfill_limit` bars.
/// Otherwise the window restarts at the latest stored bar, so the possibly
/// still-open bar gets refreshed, and spans every bar opened since.
pub fn fetch_window(
    latest: Option<i64>,
    bar_ms: i64,
    now_ms: i64,
    backfill_limit: u32,
) -> FetchWindow {
    match latest {
        None => FetchWindow { start: None, limit: backfill_limit.min(MAX_FETCH_LIMIT) },
        Some(latest) => {
            let gap_bars = if now_ms > latest { (now_ms - latest) / bar_ms } else { 0 };
            let limit = (gap_bars + 1).clamp(1, MAX_FETCH_LIMIT as i64) as u32;
            FetchWindow { start: Some(latest), limit }
        }
    }
}

/// Walks collection targets and persists fresh klines.
pub struct Collector {
    registry: Arc<ExchangeRegistry>,
    store: Arc<dyn KlineStore>,
    cache: Arc<dyn MarketCache>,
    monitor: Arc<dyn ErrorMonitor>,
    /// Target key -> last outbound fetch, epoch ms
    last_fetch: RwLock<HashMap<String, i64>>,
}

impl Collector {
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        store: Arc<dyn KlineStore>,
        cache: Arc<dyn MarketCache>,
        monitor: Arc<dyn ErrorMonitor>,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
            monitor,
            last_fetch: RwLock::new(HashMap::new()),
        }
    }

    /// Run one collection pass over the given targets.
    pub async fn run(&self, targets: &[CollectTarget], settings: &JobSettings) -> CollectReport {
        self.run_at(targets, settings, Utc::now().timestamp_millis()).await
    }

    /// Like [`run`](Self::run) with an explicit clock reading.
    pub async fn run_at(
        &self,
        targets: &[CollectTarget],
        settings: &JobSettings,
        now_ms: i64,
    ) -> CollectReport {
        let mut report = CollectReport::default();

        for target in targets {
            let outcome = self.collect_one(target, settings, now_ms).await;
            match &outcome {
                CollectOutcome::Collected(written) => {
                    debug!(target = %target.key(), written, "target collected");
                }
                CollectOutcome::Skipped(reason) => {
                    debug!(target = %target.key(), reason = %reason, "target skipped");
                }
                CollectOutcome::Failed(message) => {
                    error!(target = %target.key(), error = %message, "target failed");
                    self.monitor
                        .record(ErrorDomain::Market, &target.key(), message)
                        .await;
                }
            }
            report.outcomes.push((target.clone(), outcome));
        }

        info!(
            collected = report.collected(),
            skipped = report.skipped(),
            failed = report.failed(),
            "collection run finished"
        );
        report
    }

    async fn collect_one(
        &self,
        target: &CollectTarget,
        settings: &JobSettings,
        now_ms: i64,
    ) -> CollectOutcome {
        let key = target.key();

        {
            let marks = self.last_fetch.read().await;
            if let Some(&at) = marks.get(&key) {
                if now_ms - at < settings.collect_cooldown_secs * 1000 {
                    return CollectOutcome::Skipped("cooldown".to_string());
                }
            }
        }

        let Some(bar_ms) = timeframe_ms(&target.timeframe) else {
            return CollectOutcome::Failed(format!("unknown timeframe {}", target.timeframe));
        };
        let Some(adapter) = self.registry.get(&target.exchange) else {
            return CollectOutcome::Failed(format!("exchange {} not registered", target.exchange));
        };

        let latest = match self
            .store
            .latest_open_time(&target.exchange, &target.symbol, &target.timeframe)
            .await
        {
            Ok(latest) => latest,
            Err(err) => return CollectOutcome::Failed(format!("coverage lookup: {err}")),
        };
        let window = fetch_window(latest, bar_ms, now_ms, settings.backfill_limit);

        // The cooldown marks the outbound attempt, successful or not.
        self.last_fetch.write().await.insert(key, now_ms);

        let mut rows = match adapter
            .get_klines(&target.symbol, &target.timeframe, window.start, None, window.limit)
            .await
        {
            Ok(rows) => rows,
            Err(err) => return CollectOutcome::Failed(err.to_string()),
        };
        if rows.is_empty() {
            return CollectOutcome::Collected(0);
        }
        for row in &mut rows {
            row.exchange = target.exchange.clone();
        }

        let written = match self.store.write(settings.coverage, &rows).await {
            Ok(written) => written,
            Err(err) => return CollectOutcome::Failed(format!("persist: {err}")),
        };

        if settings.cache == CachePolicy::WriteThrough {
            self.refresh_cache(target, settings).await;
        }

        CollectOutcome::Collected(written)
    }

    /// Overwrite the cached slice for the triple with the freshest rows.
    /// A cache failure degrades reads, it never fails the collection.
    async fn refresh_cache(&self, target: &CollectTarget, settings: &JobSettings) {
        let slice = match self
            .store
            .recent(
                &target.exchange,
                &target.symbol,
                &target.timeframe,
                settings.cache_limit as u64,
            )
            .await
        {
            Ok(slice) => slice,
            Err(err) => {
                warn!(target = %target.key(), error = %err, "cache refresh read failed");
                return;
            }
        };

        if let Err(err) = self
            .cache
            .put_klines(
                &target.exchange,
                &target.symbol,
                &target.timeframe,
                settings.cache_limit,
                &slice,
                settings.cache_ttl_secs,
            )
            .await
        {
            warn!(target = %target.key(), error = %err, "cache refresh write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoveragePolicy;
    use crate::exchange::{Exchange, ExchangeError};
    use crate::market::{AssetBalance, CancelRequest, Kline, Order, OrderBook, OrderRequest};
    use crate::monitor::MemoryErrorMonitor;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bar(symbol: &str, open_time: i64) -> Kline {
        Kline {
            exchange: String::new(),
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
            open_time,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        }
    }

    /// Counts kline fetches; symbols named "BAD" error out.
    struct CountingExchange {
        calls: AtomicUsize,
    }

    impl CountingExchange {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Exchange for CountingExchange {
        fn name(&self) -> &str {
            "counting"
        }

        async fn get_klines(
            &self,
            symbol: &str,
            _interval: &str,
            _start: Option<i64>,
            _end: Option<i64>,
            _limit: u32,
        ) -> Result<Vec<Kline>, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "BAD" {
                return Err(ExchangeError::InvalidSymbol(symbol.to_string()));
            }
            Ok(vec![bar(symbol, 3_600_000)])
        }

        async fn get_order_book(
            &self,
            symbol: &str,
            _depth: u32,
        ) -> Result<OrderBook, ExchangeError> {
            Ok(OrderBook { symbol: symbol.to_string(), bids: Vec::new(), asks: Vec::new() })
        }

        async fn get_balance(&self) -> Result<HashMap<String, AssetBalance>, ExchangeError> {
            Ok(HashMap::new())
        }

        async fn get_ticker_price(&self, _symbol: &str) -> Result<f64, ExchangeError> {
            Ok(0.0)
        }

        async fn place_order(&self, _request: &OrderRequest) -> Result<Order, ExchangeError> {
            Err(ExchangeError::Unavailable("counting".into()))
        }

        async fn cancel_order(&self, _request: &CancelRequest) -> Result<bool, ExchangeError> {
            Ok(false)
        }
    }

    #[derive(Default)]
    struct MemKlineStore {
        rows: tokio::sync::Mutex<Vec<Kline>>,
    }

    #[async_trait]
    impl KlineStore for MemKlineStore {
        async fn latest_open_time(&self, _: &str, _: &str, _: &str) -> Result<Option<i64>> {
            Ok(self.rows.lock().await.iter().map(|r| r.open_time).max())
        }

        async fn write(&self, _: CoveragePolicy, rows: &[Kline]) -> Result<u64> {
            self.rows.lock().await.extend_from_slice(rows);
            Ok(rows.len() as u64)
        }

        async fn recent(&self, _: &str, _: &str, _: &str, _: u64) -> Result<Vec<Kline>> {
            Ok(self.rows.lock().await.clone())
        }

        async fn range(&self, _: &str, _: &str, _: &str, _: i64, _: i64) -> Result<Vec<Kline>> {
            Ok(Vec::new())
        }
    }

    struct NoopCache;

    #[async_trait]
    impl MarketCache for NoopCache {
        async fn put_klines(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: usize,
            _: &[Kline],
            _: u64,
        ) -> Result<()> {
            Ok(())
        }

        async fn get_klines(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: usize,
        ) -> Result<Option<Vec<Kline>>> {
            Ok(None)
        }
    }

    fn collector(exchange: Arc<CountingExchange>) -> Collector {
        let mut adapters: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
        adapters.insert("counting".to_string(), exchange);
        Collector::new(
            Arc::new(ExchangeRegistry::from_adapters(adapters)),
            Arc::new(MemKlineStore::default()),
            Arc::new(NoopCache),
            Arc::new(MemoryErrorMonitor::new()),
        )
    }

    fn target(symbol: &str) -> CollectTarget {
        CollectTarget {
            exchange: "counting".to_string(),
            symbol: symbol.to_string(),
            timeframe: "1h".to_string(),
        }
    }

    #[test]
    fn test_fetch_window_backfill_when_empty() {
        let window = fetch_window(None, 3_600_000, 1_000_000_000, 300);
        assert_eq!(window, FetchWindow { start: None, limit: 300 });
    }

    #[test]
    fn test_fetch_window_resumes_at_latest_bar() {
        // latest bar 5 hours old: refresh it plus the 5 opened since
        let now = 100 * 3_600_000;
        let latest = now - 5 * 3_600_000;
        let window = fetch_window(Some(latest), 3_600_000, now, 300);
        assert_eq!(window, FetchWindow { start: Some(latest), limit: 6 });
    }

    #[test]
    fn test_fetch_window_caps_large_gaps() {
        let window = fetch_window(Some(0), 60_000, 1_000_000 * 60_000, 300);
        assert_eq!(window.limit, 1000);
    }

    #[tokio::test]
    async fn test_cooldown_allows_at_most_one_fetch() {
        let exchange = Arc::new(CountingExchange::new());
        let collector = collector(exchange.clone());
        let settings = JobSettings::default();
        let targets = vec![target("BTCUSDT")];
        let now = 1_000_000_000_000;

        let first = collector.run_at(&targets, &settings, now).await;
        assert!(matches!(first.outcomes[0].1, CollectOutcome::Collected(1)));

        // second run inside the cooldown window does not reach the exchange
        let second = collector.run_at(&targets, &settings, now + 1_000).await;
        assert!(matches!(second.outcomes[0].1, CollectOutcome::Skipped(_)));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);

        // past the cooldown the target is fetched again
        let third = collector
            .run_at(&targets, &settings, now + settings.collect_cooldown_secs * 1000)
            .await;
        assert!(matches!(third.outcomes[0].1, CollectOutcome::Collected(_)));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_target_does_not_abort_run() {
        let exchange = Arc::new(CountingExchange::new());
        let collector = collector(exchange);
        let settings = JobSettings::default();
        let targets = vec![target("BAD"), target("ETHUSDT")];

        let report = collector.run_at(&targets, &settings, 1_000_000_000_000).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.collected(), 1);
        assert!(matches!(report.outcomes[0].1, CollectOutcome::Failed(_)));
        assert!(matches!(report.outcomes[1].1, CollectOutcome::Collected(1)));
    }

    #[tokio::test]
    async fn test_unknown_exchange_is_failure() {
        let exchange = Arc::new(CountingExchange::new());
        let collector = collector(exchange);
        let settings = JobSettings::default();
        let targets = vec![CollectTarget {
            exchange: "ghost".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
        }];

        let report = collector.run_at(&targets, &settings, 1_000_000_000_000).await;
        assert!(matches!(report.outcomes[0].1, CollectOutcome::Failed(_)));
    }
}
