//! Strategy execution lifecycle
//!
//! At most one running execution per instance id. `start` on an id that is
//! already running replaces the old execution; `stop` flips a cancel flag
//! that the execution observes before its next evaluation tick, so an
//! in-flight exchange call may finish but no further order is placed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::exchange::{Exchange, ExchangeRegistry};
use crate::market::{Direction, OrderRequest, OrderSide, OrderType};
use crate::store::{KlineStore, StrategyStore};
use crate::strategy::{CompositeStrategy, InstanceConfig, InstanceStatus};

/// Klines loaded per evaluation tick.
const EVAL_WINDOW: u64 = 200;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("strategy instance {0} not found")]
    NotFound(u64),

    #[error("exchange {0} is not registered")]
    UnknownExchange(String),

    #[error("persisting instance status failed: {0}")]
    Status(#[source] anyhow::Error),
}

struct RunningInstance {
    cancel: Arc<AtomicBool>,
    symbol: String,
}

/// Lifecycle manager for strategy executions.
///
/// Owns the store-side status transitions: `start` marks the instance
/// running, `stop` marks it stopped, so a stop survives the next reconcile
/// tick instead of being restarted from a stale "running" row.
pub struct StrategyEngine {
    running: Arc<RwLock<HashMap<u64, RunningInstance>>>,
    klines: Arc<dyn KlineStore>,
    strategies: Arc<dyn StrategyStore>,
}

impl StrategyEngine {
    pub fn new(klines: Arc<dyn KlineStore>, strategies: Arc<dyn StrategyStore>) -> Self {
        Self {
            running: Arc::new(RwLock::new(HashMap::new())),
            klines,
            strategies,
        }
    }

    /// Register and spawn a running execution for the instance.
    ///
    /// Starting an id that is already running replaces the previous
    /// execution; there are never two concurrent executions per id.
    pub async fn start(
        &self,
        config: InstanceConfig,
        adapter: Arc<dyn Exchange>,
        tick: Duration,
    ) -> anyhow::Result<()> {
        let composite = CompositeStrategy::from_config(&config)?;
        let cancel = Arc::new(AtomicBool::new(false));

        let mut running = self.running.write().await;
        self.strategies
            .set_status(config.id, InstanceStatus::Running)
            .await?;
        if let Some(previous) = running.remove(&config.id) {
            warn!(instance = config.id, "replacing already-running strategy execution");
            previous.cancel.store(true, Ordering::SeqCst);
        }

        info!(
            instance = config.id,
            strategy = %config.name,
            exchange = %config.exchange,
            symbol = %config.symbol,
            "starting strategy execution"
        );

        running.insert(
            config.id,
            RunningInstance { cancel: cancel.clone(), symbol: config.symbol.clone() },
        );

        let klines = self.klines.clone();
        tokio::spawn(run_instance(config, composite, adapter, klines, cancel, tick));
        Ok(())
    }

    /// Deregister and release the execution for the instance.
    ///
    /// The stopped status is persisted before the execution is released; on
    /// a store failure the execution keeps running and the caller retries,
    /// so the store row and the in-process state never disagree in the
    /// direction that would resurrect a stopped instance.
    pub async fn stop(&self, id: u64) -> Result<(), EngineError> {
        let mut running = self.running.write().await;
        if !running.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.strategies
            .set_status(id, InstanceStatus::Stopped)
            .await
            .map_err(EngineError::Status)?;

        if let Some(instance) = running.remove(&id) {
            instance.cancel.store(true, Ordering::SeqCst);
            info!(instance = id, symbol = %instance.symbol, "stopped strategy execution");
        }
        Ok(())
    }

    pub async fn is_running(&self, id: u64) -> bool {
        self.running.read().await.contains_key(&id)
    }

    pub async fn running_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.running.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Start executions for store-side running instances that have no
    /// execution yet. Invoked from the scheduler's strategy tick.
    pub async fn reconcile(
        &self,
        registry: &ExchangeRegistry,
        tick: Duration,
    ) -> anyhow::Result<()> {
        for config in self.strategies.running_instances().await? {
            if self.is_running(config.id).await {
                continue;
            }
            let Some(adapter) = registry.get(&config.exchange) else {
                warn!(instance = config.id, exchange = %config.exchange,
                    "strategy instance references unregistered exchange");
                continue;
            };
            if let Err(err) = self.start(config, adapter, tick).await {
                error!(error = %err, "failed to start strategy execution");
            }
        }
        Ok(())
    }
}

/// One execution loop: evaluate every tick, order on decision changes.
async fn run_instance(
    config: InstanceConfig,
    composite: CompositeStrategy,
    adapter: Arc<dyn Exchange>,
    klines: Arc<dyn KlineStore>,
    cancel: Arc<AtomicBool>,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_decision = Direction::Hold;

    loop {
        interval.tick().await;
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let series = match klines
            .recent(&config.exchange, &config.symbol, &config.timeframe, EVAL_WINDOW)
            .await
        {
            Ok(series) => series,
            Err(err) => {
                error!(instance = config.id, error = %err, "failed to load kline series");
                continue;
            }
        };
        if series.is_empty() {
            continue;
        }

        let decision = composite.evaluate(&series);

        // A stop issued during evaluation must suppress order placement.
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        if decision == last_decision || decision == Direction::Hold {
            last_decision = decision;
            continue;
        }

        let close = series[series.len() - 1].close;
        if close <= 0.0 {
            continue;
        }
        let quantity = config.risk.max_position_size / close;
        let request = OrderRequest {
            symbol: config.symbol.clone(),
            side: match decision {
                Direction::Buy => OrderSide::Buy,
                _ => OrderSide::Sell,
            },
            order_type: OrderType::Market,
            quantity,
            price: None,
        };

        match adapter.place_order(&request).await {
            Ok(order) => {
                info!(
                    instance = config.id,
                    order = %order.id,
                    side = ?request.side,
                    quantity = quantity,
                    "order placed"
                );
                last_decision = decision;
            }
            Err(err) => {
                error!(instance = config.id, error = %err, "order placement failed");
            }
        }
    }
}
