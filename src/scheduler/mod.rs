//! Heartbeat scheduler
//!
//! A single interval loop checks each job against its configured spacing and
//! hands due jobs to the worker over a channel. Run bookkeeping lives in
//! redis so due-ness survives restarts; losing it only means jobs fire one
//! spacing early, every run is written to be safe to repeat.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::monitor::{bucket_trend, ErrorDomain, ErrorMonitor, Granularity, TrendPoint};
use crate::store::SettingsStore;

/// Job history entries kept in redis.
const HISTORY_CAP: isize = 500;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown job: {0}")]
    UnknownJob(String),
}

/// Jobs driven by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobName {
    MarketCollect,
    TradingSync,
    StrategyTick,
}

impl JobName {
    pub const ALL: [JobName; 3] = [Self::MarketCollect, Self::TradingSync, Self::StrategyTick];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketCollect => "market_collect",
            Self::TradingSync => "trading_sync",
            Self::StrategyTick => "strategy_tick",
        }
    }
}

impl FromStr for JobName {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market_collect" => Ok(Self::MarketCollect),
            "trading_sync" => Ok(Self::TradingSync),
            "strategy_tick" => Ok(Self::StrategyTick),
            other => Err(SchedulerError::UnknownJob(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dispatched job run, kept in history as a `name:timestamp` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunRecord {
    pub job: String,
    /// Epoch seconds
    pub timestamp: i64,
}

impl JobRunRecord {
    fn encode(&self) -> String {
        format!("{}:{}", self.job, self.timestamp)
    }

    fn decode(raw: &str) -> Option<Self> {
        let (job, timestamp) = raw.rsplit_once(':')?;
        Some(Self { job: job.to_string(), timestamp: timestamp.parse().ok()? })
    }
}

/// Run bookkeeping behind the heartbeat.
#[async_trait]
pub trait SchedStore: Send + Sync {
    /// Epoch seconds of the job's last dispatch, if any.
    async fn last_run(&self, job: JobName) -> anyhow::Result<Option<i64>>;

    async fn set_last_run(&self, job: JobName, at: i64) -> anyhow::Result<()>;

    async fn push_history(&self, record: &JobRunRecord) -> anyhow::Result<()>;

    /// Newest-first history records, bounded by `limit`.
    async fn history(&self, limit: usize) -> anyhow::Result<Vec<JobRunRecord>>;
}

fn last_run_key(job: JobName) -> String {
    format!("sched:last:{}", job.as_str())
}

const HISTORY_KEY: &str = "sched:history";

pub struct RedisSchedStore {
    client: redis::Client,
}

impl RedisSchedStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchedStore for RedisSchedStore {
    async fn last_run(&self, job: JobName) -> anyhow::Result<Option<i64>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<i64> = conn.get(last_run_key(job)).await?;
        Ok(value)
    }

    async fn set_last_run(&self, job: JobName, at: i64) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.set(last_run_key(job), at).await?;
        Ok(())
    }

    async fn push_history(&self, record: &JobRunRecord) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.lpush(HISTORY_KEY, record.encode()).await?;
        let _: () = conn.ltrim(HISTORY_KEY, 0, HISTORY_CAP - 1).await?;
        Ok(())
    }

    async fn history(&self, limit: usize) -> anyhow::Result<Vec<JobRunRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Vec<String> = conn.lrange(HISTORY_KEY, 0, limit as isize - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| JobRunRecord::decode(entry))
            .collect())
    }
}

/// Whether a job is due at `now` given its last dispatch and spacing.
///
/// A job with no recorded run is always due. Spacing is measured from the
/// last dispatch, not aligned to a wall-clock grid.
pub fn is_due(now: i64, last: Option<i64>, interval_secs: i64) -> bool {
    match last {
        None => true,
        Some(last) => now - last >= interval_secs,
    }
}

/// Per-job view in a status report.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: String,
    pub last_run: Option<i64>,
    pub interval_secs: i64,
    pub next_due: i64,
}

/// Snapshot of scheduler state and recent activity.
#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub jobs: Vec<JobStatus>,
    /// Dispatches per hour over the retained history
    pub hourly_trend: Vec<TrendPoint>,
    /// Dispatches per day over the retained history
    pub daily_trend: Vec<TrendPoint>,
    /// Market-domain errors per hour over the retained history
    pub market_error_trend: Vec<TrendPoint>,
    /// Feed-domain errors per hour over the retained history
    pub feed_error_trend: Vec<TrendPoint>,
}

/// The heartbeat loop: checks due-ness, records the dispatch, hands the job
/// to the worker.
pub struct Heartbeat {
    store: Arc<dyn SchedStore>,
    settings: Arc<dyn SettingsStore>,
    monitor: Arc<dyn ErrorMonitor>,
    jobs: mpsc::Sender<JobName>,
}

impl Heartbeat {
    pub fn new(
        store: Arc<dyn SchedStore>,
        settings: Arc<dyn SettingsStore>,
        monitor: Arc<dyn ErrorMonitor>,
        jobs: mpsc::Sender<JobName>,
    ) -> Self {
        Self { store, settings, monitor, jobs }
    }

    /// Run the heartbeat until the job channel closes.
    pub async fn run(&self) {
        let tick_secs = match self.settings.job_settings().await {
            Ok(settings) => settings.scheduler_tick_secs,
            Err(err) => {
                warn!(error = %err, "failed to load settings, using default heartbeat period");
                crate::config::JobSettings::default().scheduler_tick_secs
            }
        };
        let mut interval = tokio::time::interval(Duration::from_secs(tick_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_secs, "heartbeat started");

        loop {
            interval.tick().await;
            if let Err(err) = self.tick_once(Utc::now().timestamp()).await {
                error!(error = %err, "heartbeat tick failed");
            }
            if self.jobs.is_closed() {
                info!("job channel closed, heartbeat stopping");
                return;
            }
        }
    }

    /// One heartbeat pass: dispatch every job due at `now`.
    pub async fn tick_once(&self, now: i64) -> anyhow::Result<()> {
        let settings = self.settings.job_settings().await?;

        for job in JobName::ALL {
            let last = self.store.last_run(job).await?;
            if !is_due(now, last, settings.interval_for(job)) {
                continue;
            }
            self.dispatch(job, now, false).await?;
        }
        Ok(())
    }

    /// Dispatch a job immediately, ignoring its interval.
    pub async fn trigger(&self, job: JobName) -> anyhow::Result<()> {
        self.dispatch(job, Utc::now().timestamp(), true).await
    }

    async fn dispatch(&self, job: JobName, now: i64, triggered: bool) -> anyhow::Result<()> {
        self.store.set_last_run(job, now).await?;
        self.store
            .push_history(&JobRunRecord { job: job.as_str().to_string(), timestamp: now })
            .await?;
        debug!(job = %job, triggered, "job dispatched");
        self.jobs.send(job).await?;
        Ok(())
    }

    /// Current due-ness of every job plus bucketed dispatch trends.
    pub async fn status(&self) -> anyhow::Result<SchedulerStatus> {
        let settings = self.settings.job_settings().await?;

        let mut jobs = Vec::with_capacity(JobName::ALL.len());
        for job in JobName::ALL {
            let last = self.store.last_run(job).await?;
            let interval_secs = settings.interval_for(job);
            jobs.push(JobStatus {
                job: job.as_str().to_string(),
                last_run: last,
                interval_secs,
                next_due: last.map_or_else(|| Utc::now().timestamp(), |l| l + interval_secs),
            });
        }

        let history = self.store.history(HISTORY_CAP as usize).await?;
        let timestamps: Vec<i64> = history.iter().map(|r| r.timestamp).collect();

        let market_errors: Vec<i64> = self
            .monitor
            .recent(ErrorDomain::Market, HISTORY_CAP as usize)
            .await
            .iter()
            .map(|e| e.timestamp)
            .collect();
        let feed_errors: Vec<i64> = self
            .monitor
            .recent(ErrorDomain::Feed, HISTORY_CAP as usize)
            .await
            .iter()
            .map(|e| e.timestamp)
            .collect();

        Ok(SchedulerStatus {
            jobs,
            hourly_trend: bucket_trend(&timestamps, Granularity::Hourly),
            daily_trend: bucket_trend(&timestamps, Granularity::Daily),
            market_error_trend: bucket_trend(&market_errors, Granularity::Hourly),
            feed_error_trend: bucket_trend(&feed_errors, Granularity::Hourly),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSettings;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemSchedStore {
        last: Mutex<HashMap<JobName, i64>>,
        history: Mutex<Vec<JobRunRecord>>,
    }

    #[async_trait]
    impl SchedStore for MemSchedStore {
        async fn last_run(&self, job: JobName) -> anyhow::Result<Option<i64>> {
            Ok(self.last.lock().await.get(&job).copied())
        }

        async fn set_last_run(&self, job: JobName, at: i64) -> anyhow::Result<()> {
            self.last.lock().await.insert(job, at);
            Ok(())
        }

        async fn push_history(&self, record: &JobRunRecord) -> anyhow::Result<()> {
            self.history.lock().await.insert(0, record.clone());
            Ok(())
        }

        async fn history(&self, limit: usize) -> anyhow::Result<Vec<JobRunRecord>> {
            Ok(self.history.lock().await.iter().take(limit).cloned().collect())
        }
    }

    struct FixedSettings(JobSettings);

    #[async_trait]
    impl SettingsStore for FixedSettings {
        async fn job_settings(&self) -> anyhow::Result<JobSettings> {
            Ok(self.0.clone())
        }
    }

    fn heartbeat(
        store: Arc<MemSchedStore>,
        settings: JobSettings,
    ) -> (Heartbeat, mpsc::Receiver<JobName>) {
        let (tx, rx) = mpsc::channel(16);
        let monitor = Arc::new(crate::monitor::MemoryErrorMonitor::new());
        (
            Heartbeat::new(store, Arc::new(FixedSettings(settings)), monitor, tx),
            rx,
        )
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(1000, None, 300));
        assert!(!is_due(1250, Some(1000), 300));
        assert!(is_due(1300, Some(1000), 300));
        assert!(is_due(1301, Some(1000), 300));
    }

    #[test]
    fn test_job_name_round_trip() {
        for job in JobName::ALL {
            assert_eq!(job.as_str().parse::<JobName>().unwrap(), job);
        }
        assert!(matches!(
            "vacuum".parse::<JobName>(),
            Err(SchedulerError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_tick_dispatches_only_due_jobs() {
        let store = Arc::new(MemSchedStore::default());
        let settings = JobSettings {
            collect_interval_secs: 300,
            sync_interval_secs: 300,
            strategy_interval_secs: 300,
            ..Default::default()
        };
        let (heartbeat, mut rx) = heartbeat(store.clone(), settings);

        for job in JobName::ALL {
            store.set_last_run(job, 1000).await.unwrap();
        }

        heartbeat.tick_once(1250).await.unwrap();
        assert!(rx.try_recv().is_err());

        heartbeat.tick_once(1301).await.unwrap();
        let mut fired = Vec::new();
        while let Ok(job) = rx.try_recv() {
            fired.push(job);
        }
        assert_eq!(fired.len(), 3);
        // spacing restarts from the dispatch time
        assert_eq!(store.last_run(JobName::MarketCollect).await.unwrap(), Some(1301));
    }

    #[tokio::test]
    async fn test_first_tick_fires_everything() {
        let store = Arc::new(MemSchedStore::default());
        let (heartbeat, mut rx) = heartbeat(store, JobSettings::default());

        heartbeat.tick_once(1000).await.unwrap();
        let mut fired = 0;
        while rx.try_recv().is_ok() {
            fired += 1;
        }
        assert_eq!(fired, 3);
    }

    #[tokio::test]
    async fn test_trigger_bypasses_interval() {
        let store = Arc::new(MemSchedStore::default());
        let (heartbeat, mut rx) = heartbeat(store.clone(), JobSettings::default());

        let now = Utc::now().timestamp();
        store.set_last_run(JobName::TradingSync, now).await.unwrap();

        heartbeat.trigger(JobName::TradingSync).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), JobName::TradingSync);

        let history = store.history(10).await.unwrap();
        assert_eq!(history[0].job, "trading_sync");
        assert!(store.last_run(JobName::TradingSync).await.unwrap().unwrap() >= now);
    }

    #[test]
    fn test_history_entry_format() {
        let record = JobRunRecord { job: "market_collect".to_string(), timestamp: 1301 };
        assert_eq!(record.encode(), "market_collect:1301");
        assert_eq!(JobRunRecord::decode("market_collect:1301").unwrap(), record);
        assert!(JobRunRecord::decode("garbage").is_none());
    }

    #[tokio::test]
    async fn test_status_reports_next_due_and_trend() {
        let store = Arc::new(MemSchedStore::default());
        let (heartbeat, _rx) = heartbeat(store.clone(), JobSettings::default());

        store.set_last_run(JobName::MarketCollect, 1000).await.unwrap();
        store
            .push_history(&JobRunRecord { job: "market_collect".to_string(), timestamp: 1000 })
            .await
            .unwrap();

        let status = heartbeat.status().await.unwrap();
        let collect = status
            .jobs
            .iter()
            .find(|j| j.job == "market_collect")
            .unwrap();
        assert_eq!(collect.last_run, Some(1000));
        assert_eq!(collect.next_due, 1000 + 300);
        assert_eq!(status.hourly_trend.len(), 1);
        assert_eq!(status.hourly_trend[0].count, 1);
    }
}
