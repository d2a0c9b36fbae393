//! Offline strategy replay
//!
//! Replays a stored kline series bar-by-bar through a composite strategy
//! with a simulated all-in/all-out fill model. No network, no order
//! placement; the result is a pure function of the series and the strategy
//! config.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::market::{Direction, Kline};
use crate::store::KlineStore;
use crate::strategy::{CompositeStrategy, InstanceConfig};

/// Starting capital of the simulated account, in quote currency.
const INITIAL_CAPITAL: f64 = 10_000.0;

/// One simulated round trip.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    /// Entry bar open time, epoch ms
    pub entry_time: i64,
    pub entry_price: f64,
    /// Exit bar open time, epoch ms
    pub exit_time: i64,
    pub exit_price: f64,
    pub pnl: f64,
}

/// Aggregate statistics of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub bars: usize,
    pub num_trades: usize,
    pub wins: usize,
    /// Wins over trades; 0 with no trades
    pub win_rate: f64,
    /// Realized P&L in quote currency
    pub pnl: f64,
    /// P&L over initial capital
    pub return_pct: f64,
    /// Largest peak-to-trough equity decline, as a fraction of the peak
    pub max_drawdown: f64,
    pub final_equity: f64,
    pub trades: Vec<Trade>,
}

/// Replays stored klines through a strategy.
pub struct BacktestEngine {
    klines: Arc<dyn KlineStore>,
}

impl BacktestEngine {
    pub fn new(klines: Arc<dyn KlineStore>) -> Self {
        Self { klines }
    }

    /// Load the series for the config's triple over `[start_ms, end_ms]`
    /// and replay it.
    pub async fn run(
        &self,
        config: &InstanceConfig,
        start_ms: i64,
        end_ms: i64,
    ) -> anyhow::Result<BacktestResult> {
        let series = self
            .klines
            .range(&config.exchange, &config.symbol, &config.timeframe, start_ms, end_ms)
            .await?;
        let strategy = CompositeStrategy::from_config(config)?;
        let result = replay(&strategy, &series);
        info!(
            symbol = %config.symbol,
            bars = result.bars,
            trades = result.num_trades,
            pnl = result.pnl,
            "backtest finished"
        );
        Ok(result)
    }
}

/// Bar-by-bar replay with all-in long entries and all-out exits at the
/// deciding bar's close. A position still open after the last bar is closed
/// at that bar's close.
pub fn replay(strategy: &CompositeStrategy, series: &[Kline]) -> BacktestResult {
    let mut cash = INITIAL_CAPITAL;
    let mut held_quantity = 0.0;
    let mut entry: Option<(i64, f64)> = None;
    let mut trades: Vec<Trade> = Vec::new();

    let mut peak_equity = INITIAL_CAPITAL;
    let mut max_drawdown: f64 = 0.0;

    for i in 0..series.len() {
        let bar = &series[i];
        if bar.close <= 0.0 {
            continue;
        }

        match strategy.evaluate(&series[..=i]) {
            Direction::Buy if entry.is_none() => {
                held_quantity = cash / bar.close;
                cash = 0.0;
                entry = Some((bar.open_time, bar.close));
            }
            Direction::Sell => {
                if let Some((entry_time, entry_price)) = entry.take() {
                    cash = held_quantity * bar.close;
                    trades.push(Trade {
                        entry_time,
                        entry_price,
                        exit_time: bar.open_time,
                        exit_price: bar.close,
                        pnl: (bar.close - entry_price) * held_quantity,
                    });
                    held_quantity = 0.0;
                }
            }
            _ => {}
        }

        let equity = cash + held_quantity * bar.close;
        if equity > peak_equity {
            peak_equity = equity;
        } else if peak_equity > 0.0 {
            max_drawdown = max_drawdown.max((peak_equity - equity) / peak_equity);
        }
    }

    if let (Some((entry_time, entry_price)), Some(last)) = (entry.take(), series.last()) {
        if last.close > 0.0 {
            cash = held_quantity * last.close;
            trades.push(Trade {
                entry_time,
                entry_price,
                exit_time: last.open_time,
                exit_price: last.close,
                pnl: (last.close - entry_price) * held_quantity,
            });
        }
    }

    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    let pnl = cash - INITIAL_CAPITAL;
    BacktestResult {
        bars: series.len(),
        num_trades: trades.len(),
        wins,
        win_rate: if trades.is_empty() { 0.0 } else { wins as f64 / trades.len() as f64 },
        pnl,
        return_pct: pnl / INITIAL_CAPITAL,
        max_drawdown,
        final_equity: cash,
        trades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{Factor, FactorSignal};
    use crate::strategy::CombineMode;
    use std::collections::HashMap;

    /// Buys below `low`, sells above `high`, holds in between.
    struct Band {
        low: f64,
        high: f64,
    }

    impl Factor for Band {
        fn name(&self) -> &str {
            "band"
        }

        fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
            let close = klines.last()?.close;
            if close <= self.low {
                Some(FactorSignal::buy(1.0))
            } else if close >= self.high {
                Some(FactorSignal::sell(1.0))
            } else {
                Some(FactorSignal::hold())
            }
        }
    }

    fn band_strategy() -> CompositeStrategy {
        CompositeStrategy::new(
            vec![Box::new(Band { low: 100.0, high: 110.0 })],
            CombineMode::Weighted,
            HashMap::new(),
        )
    }

    fn series(closes: &[f64]) -> Vec<Kline> {
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
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_round_trip_accounting() {
        // buy at 100, sell at 110: one winning trade, +10%
        let result = replay(&band_strategy(), &series(&[105.0, 100.0, 104.0, 110.0, 105.0]));
        assert_eq!(result.num_trades, 1);
        assert_eq!(result.wins, 1);
        assert!((result.return_pct - 0.10).abs() < 1e-9);
        assert_eq!(result.trades[0].entry_price, 100.0);
        assert_eq!(result.trades[0].exit_price, 110.0);
    }

    #[test]
    fn test_open_position_closed_at_series_end() {
        // buy at 100, series ends at 95: forced exit, losing trade
        let result = replay(&band_strategy(), &series(&[105.0, 100.0, 95.0]));
        assert_eq!(result.num_trades, 1);
        assert_eq!(result.wins, 0);
        assert!(result.pnl < 0.0);
    }

    #[test]
    fn test_drawdown_tracks_peak_to_trough() {
        // in position from 100; equity peaks at 108 then dips to 96
        let result = replay(&band_strategy(), &series(&[100.0, 108.0, 96.0, 104.0]));
        assert!((result.max_drawdown - (108.0 - 96.0) / 108.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_trades_on_flat_series() {
        let result = replay(&band_strategy(), &series(&[105.0, 106.0, 105.0]));
        assert_eq!(result.num_trades, 0);
        assert_eq!(result.win_rate, 0.0);
        assert_eq!(result.pnl, 0.0);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let bars = series(&[105.0, 100.0, 102.0, 111.0, 99.0, 101.0, 112.0, 103.0]);
        let first = replay(&band_strategy(), &bars);
        let second = replay(&band_strategy(), &bars);
        assert_eq!(first.num_trades, second.num_trades);
        assert_eq!(first.pnl, second.pnl);
        assert_eq!(first.win_rate, second.win_rate);
        assert_eq!(first.max_drawdown, second.max_drawdown);
    }
}
