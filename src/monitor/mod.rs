//! Error counters and bounded error history
//!
//! Per-domain, append-only with capped retention; used for health and trend
//! reporting. Recording never fails the calling job: a broken redis link is
//! logged and the job carries on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Entries kept per error-history list.
const HISTORY_CAP: isize = 500;

/// Error domains tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// Market-data collection and trading sync
    Market,
    /// External feed fetching
    Feed,
}

impl ErrorDomain {
    fn history_key(self) -> &'static str {
        match self {
            Self::Market => "market:error:history",
            Self::Feed => "feed:error:history",
        }
    }

    fn counter_key(self) -> &'static str {
        match self {
            Self::Market => "market:error:counters",
            Self::Feed => "feed:error:counters",
        }
    }
}

/// One recorded error event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Epoch seconds
    pub timestamp: i64,
    /// Unit the error belongs to, e.g. "binance:BTCUSDT:1h"
    pub key: String,
    pub message: String,
}

#[async_trait]
pub trait ErrorMonitor: Send + Sync {
    async fn record(&self, domain: ErrorDomain, key: &str, message: &str);

    /// Newest-first events, bounded by `limit`.
    async fn recent(&self, domain: ErrorDomain, limit: usize) -> Vec<ErrorEvent>;
}

pub struct RedisErrorMonitor {
    client: redis::Client,
}

impl RedisErrorMonitor {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn try_record(
        &self,
        domain: ErrorDomain,
        event: &ErrorEvent,
    ) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        let _: () = conn.lpush(domain.history_key(), payload).await?;
        let _: () = conn.ltrim(domain.history_key(), 0, HISTORY_CAP - 1).await?;
        let _: i64 = conn.hincr(domain.counter_key(), &event.key, 1).await?;
        Ok(())
    }
}

#[async_trait]
impl ErrorMonitor for RedisErrorMonitor {
    async fn record(&self, domain: ErrorDomain, key: &str, message: &str) {
        let event = ErrorEvent {
            timestamp: chrono::Utc::now().timestamp(),
            key: key.to_string(),
            message: message.to_string(),
        };
        if let Err(err) = self.try_record(domain, &event).await {
            warn!(error = %err, "failed to record error event");
        }
    }

    async fn recent(&self, domain: ErrorDomain, limit: usize) -> Vec<ErrorEvent> {
        let result: anyhow::Result<Vec<ErrorEvent>> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let raw: Vec<String> = conn
                .lrange(domain.history_key(), 0, limit as isize - 1)
                .await?;
            Ok(raw
                .iter()
                .filter_map(|entry| serde_json::from_str(entry).ok())
                .collect())
        }
        .await;

        match result {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "failed to read error history");
                Vec::new()
            }
        }
    }
}

/// In-process monitor used when no redis is wired up (and by tests).
#[derive(Default)]
pub struct MemoryErrorMonitor {
    events: tokio::sync::Mutex<Vec<(ErrorDomain, ErrorEvent)>>,
}

impl MemoryErrorMonitor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ErrorMonitor for MemoryErrorMonitor {
    async fn record(&self, domain: ErrorDomain, key: &str, message: &str) {
        let mut events = self.events.lock().await;
        events.push((
            domain,
            ErrorEvent {
                timestamp: chrono::Utc::now().timestamp(),
                key: key.to_string(),
                message: message.to_string(),
            },
        ));
        let len = events.len();
        if len > HISTORY_CAP as usize {
            events.drain(..len - HISTORY_CAP as usize);
        }
    }

    async fn recent(&self, domain: ErrorDomain, limit: usize) -> Vec<ErrorEvent> {
        let events = self.events.lock().await;
        events
            .iter()
            .rev()
            .filter(|(d, _)| *d == domain)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

/// Trend bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    fn bucket_secs(self) -> i64 {
        match self {
            Self::Hourly => 3600,
            Self::Daily => 86_400,
        }
    }
}

/// One point of a bucketed trend series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    /// Bucket start, epoch seconds
    pub bucket_start: i64,
    pub count: u64,
}

/// Group epoch-second timestamps into hourly or daily buckets.
pub fn bucket_trend(timestamps: &[i64], granularity: Granularity) -> Vec<TrendPoint> {
    let size = granularity.bucket_secs();
    let mut buckets: BTreeMap<i64, u64> = BTreeMap::new();
    for &ts in timestamps {
        *buckets.entry((ts / size) * size).or_insert(0) += 1;
    }
    buckets
        .into_iter()
        .map(|(bucket_start, count)| TrendPoint { bucket_start, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_trend_hourly() {
        let base = 1_700_000_000 / 3600 * 3600;
        let points = bucket_trend(
            &[base + 10, base + 20, base + 3700, base + 3800, base + 3900],
            Granularity::Hourly,
        );
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], TrendPoint { bucket_start: base, count: 2 });
        assert_eq!(points[1], TrendPoint { bucket_start: base + 3600, count: 3 });
    }

    #[test]
    fn test_bucket_trend_daily() {
        let day = 86_400;
        let points = bucket_trend(&[day * 10 + 5, day * 10 + 6, day * 11], Granularity::Daily);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].count, 2);
        assert_eq!(points[1].count, 1);
    }

    #[tokio::test]
    async fn test_memory_monitor_separates_domains() {
        let monitor = MemoryErrorMonitor::new();
        monitor.record(ErrorDomain::Market, "binance:BTCUSDT:1h", "timeout").await;
        monitor.record(ErrorDomain::Feed, "news", "404").await;

        let market = monitor.recent(ErrorDomain::Market, 10).await;
        assert_eq!(market.len(), 1);
        assert_eq!(market[0].key, "binance:BTCUSDT:1h");
        assert_eq!(monitor.recent(ErrorDomain::Feed, 10).await.len(), 1);
    }
}
