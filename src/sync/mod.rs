//! Trading sync
//!
//! Mirrors account balances and open-position marks from the exchanges into
//! the store. Exchange calls are retried with exponential backoff; a failing
//! exchange or position is recorded and skipped so the rest of the run still
//! completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::exchange::{Exchange, ExchangeError, ExchangeRegistry};
use crate::monitor::{ErrorDomain, ErrorMonitor};
use crate::store::{BalanceStore, PositionStore};

/// Exchange call attempts before giving up.
const RETRY_ATTEMPTS: u32 = 3;
/// First retry delay; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Retry a fallible exchange call on retryable errors only.
async fn with_retry<T, F, Fut>(mut call: F) -> Result<T, ExchangeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExchangeError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < RETRY_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                debug!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "retrying exchange call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Summary of one sync run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The run was skipped because the previous one was too recent
    pub skipped: bool,
    pub balances_updated: usize,
    pub positions_updated: usize,
    pub failures: Vec<String>,
}

/// Pulls balances and position marks from every active exchange.
pub struct TradingSync {
    registry: Arc<ExchangeRegistry>,
    balances: Arc<dyn BalanceStore>,
    positions: Arc<dyn PositionStore>,
    monitor: Arc<dyn ErrorMonitor>,
    /// Epoch ms of the last non-skipped run
    last_run: Mutex<Option<i64>>,
}

impl TradingSync {
    pub fn new(
        registry: Arc<ExchangeRegistry>,
        balances: Arc<dyn BalanceStore>,
        positions: Arc<dyn PositionStore>,
        monitor: Arc<dyn ErrorMonitor>,
    ) -> Self {
        Self {
            registry,
            balances,
            positions,
            monitor,
            last_run: Mutex::new(None),
        }
    }

    /// Run one sync pass over every active exchange.
    ///
    /// `min_spacing_secs` guards against overlapping triggers: a run that
    /// starts within the spacing of the previous one is skipped whole.
    pub async fn run(&self, min_spacing_secs: i64) -> SyncReport {
        self.run_at(min_spacing_secs, Utc::now().timestamp_millis()).await
    }

    /// Like [`run`](Self::run) with an explicit clock reading.
    pub async fn run_at(&self, min_spacing_secs: i64, now_ms: i64) -> SyncReport {
        {
            let mut last_run = self.last_run.lock().await;
            if let Some(last) = *last_run {
                if now_ms - last < min_spacing_secs * 1000 {
                    debug!("sync run skipped, previous run too recent");
                    return SyncReport { skipped: true, ..Default::default() };
                }
            }
            *last_run = Some(now_ms);
        }

        let mut report = SyncReport::default();
        for name in self.registry.names() {
            let Some(adapter) = self.registry.get(&name) else {
                continue;
            };
            self.sync_balances(&name, adapter.as_ref(), &mut report).await;
            self.sync_positions(&name, adapter.as_ref(), &mut report).await;
        }

        info!(
            balances = report.balances_updated,
            positions = report.positions_updated,
            failures = report.failures.len(),
            "trading sync finished"
        );
        report
    }

    async fn sync_balances(&self, exchange: &str, adapter: &dyn Exchange, report: &mut SyncReport) {
        let balances = match with_retry(|| adapter.get_balance()).await {
            Ok(balances) => balances,
            Err(err) => {
                self.fail(report, exchange, format!("balance fetch: {err}")).await;
                return;
            }
        };

        for (asset, balance) in balances {
            match self.balances.upsert(exchange, &asset, balance).await {
                Ok(()) => report.balances_updated += 1,
                Err(err) => {
                    self.fail(report, exchange, format!("balance upsert {asset}: {err}")).await;
                }
            }
        }
    }

    async fn sync_positions(&self, exchange: &str, adapter: &dyn Exchange, report: &mut SyncReport) {
        let open = match self.positions.open_positions(exchange).await {
            Ok(open) => open,
            Err(err) => {
                self.fail(report, exchange, format!("open positions: {err}")).await;
                return;
            }
        };

        for position in open {
            let mark = match with_retry(|| adapter.get_ticker_price(&position.symbol)).await {
                Ok(mark) => mark,
                Err(err) => {
                    self.fail(
                        report,
                        exchange,
                        format!("ticker {}: {err}", position.symbol),
                    )
                    .await;
                    continue;
                }
            };

            let unrealized =
                (mark - position.entry_price) * position.quantity * position.side.sign();
            match self.positions.update_mark(position.id, mark, unrealized).await {
                Ok(()) => report.positions_updated += 1,
                Err(err) => {
                    self.fail(
                        report,
                        exchange,
                        format!("mark update {}: {err}", position.symbol),
                    )
                    .await;
                }
            }
        }
    }

    async fn fail(&self, report: &mut SyncReport, exchange: &str, message: String) {
        warn!(exchange = %exchange, error = %message, "sync step failed");
        self.monitor.record(ErrorDomain::Market, exchange, &message).await;
        report.failures.push(format!("{exchange}: {message}"));
    }
}
