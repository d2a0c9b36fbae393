//! QuantCore: scheduled market-data collection and strategy execution core
//!
//! This crate provides the scheduled backend core of a quantitative trading
//! system:
//!
//! - **Exchange adapters**: uniform REST interface over heterogeneous
//!   exchange APIs (klines, order book, balances, orders)
//! - **Exchange registry**: enabled adapters built from a TOML config file
//!   with `${ENV}` substitution and store-backed credential overrides
//! - **Factors**: stateless technical indicators (RSI, SMA/EMA, MACD,
//!   Bollinger, ATR) producing directional signals
//! - **Composite strategies**: weighted or majority-vote combination of
//!   factor signals with a start/stop execution lifecycle
//! - **Market data collector**: incremental kline collection with cooldown,
//!   coverage policy and write-through caching
//! - **Scheduler**: fixed-period heartbeat with per-job intervals, manual
//!   triggers and trend reporting
//! - **Trading sync**: balance and position reconciliation with bounded retry
//! - **Backtests**: deterministic replay of historical klines through a
//!   composite strategy

pub mod backtest;
pub mod cache;
pub mod collector;
pub mod config;
pub mod exchange;
pub mod factors;
pub mod market;
pub mod monitor;
pub mod scheduler;
pub mod store;
pub mod strategy;
pub mod sync;

// Re-export commonly used types
pub mod prelude {
    pub use crate::backtest::{BacktestEngine, BacktestResult};
    pub use crate::collector::{CollectOutcome, CollectReport, CollectTarget, Collector};
    pub use crate::config::{CachePolicy, Config, CoveragePolicy, JobSettings};
    pub use crate::exchange::{Exchange, ExchangeError, ExchangeRegistry};
    pub use crate::factors::{Factor, FactorSignal};
    pub use crate::market::{Direction, Kline, OrderRequest};
    pub use crate::scheduler::{Heartbeat, JobName, SchedulerStatus};
    pub use crate::strategy::{CombineMode, CompositeStrategy, Decision, StrategyEngine};
    pub use crate::sync::{SyncReport, TradingSync};

    pub use anyhow::{Context, Result};
}

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
