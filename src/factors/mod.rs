//! Factor/signal library
//!
//! Factors are stateless: each evaluation maps a kline series to an
//! independent directional signal using the `ta` crate. A factor returns
//! `None` while the series is shorter than its warm-up window.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

pub use atr::AtrBreakout;
pub use bollinger::BollingerReversion;
pub use ema::EmaCross;
pub use macd::MacdMomentum;
pub use rsi::RsiReversal;
pub use sma::SmaTrend;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::market::{Direction, Kline};

/// Directional signal emitted by one factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorSignal {
    pub direction: Direction,
    /// Signal strength in [0, 1]
    pub strength: f64,
}

impl FactorSignal {
    pub fn buy(strength: f64) -> Self {
        Self { direction: Direction::Buy, strength: strength.clamp(0.0, 1.0) }
    }

    pub fn sell(strength: f64) -> Self {
        Self { direction: Direction::Sell, strength: strength.clamp(0.0, 1.0) }
    }

    pub fn hold() -> Self {
        Self { direction: Direction::Hold, strength: 0.0 }
    }

    /// Signed score used by weighted combination.
    pub fn score(&self) -> f64 {
        self.direction.sign() * self.strength
    }
}

/// A stateless mapping from a price series to a directional signal.
pub trait Factor: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the series is too short to evaluate.
    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal>;
}

/// Factor description as stored in a strategy instance's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorSpec {
    pub kind: String,
    #[serde(default)]
    pub params: Value,
}

fn usize_param(params: &Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn f64_param(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Construct a factor from its stored spec.
pub fn build_factor(spec: &FactorSpec) -> Result<Box<dyn Factor>> {
    let p = &spec.params;
    let factor: Box<dyn Factor> = match spec.kind.as_str() {
        "rsi" => Box::new(RsiReversal::new(
            usize_param(p, "period", 14),
            f64_param(p, "oversold", 30.0),
            f64_param(p, "overbought", 70.0),
        )),
        "sma" => Box::new(SmaTrend::new(usize_param(p, "period", 20))),
        "ema" => Box::new(EmaCross::new(
            usize_param(p, "fast", 12),
            usize_param(p, "slow", 26),
        )),
        "macd" => Box::new(MacdMomentum::new(
            usize_param(p, "fast", 12),
            usize_param(p, "slow", 26),
            usize_param(p, "signal", 9),
        )),
        "bollinger" => Box::new(BollingerReversion::new(
            usize_param(p, "period", 20),
            f64_param(p, "std_dev", 2.0),
        )),
        "atr" => Box::new(AtrBreakout::new(
            usize_param(p, "period", 14),
            f64_param(p, "multiplier", 1.5),
        )),
        other => bail!("unknown factor kind: {other}"),
    };
    Ok(factor)
}

#[cfg(test)]
pub(crate) fn test_series(closes: &[f64]) -> Vec<Kline> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Kline {
            exchange: "test".into(),
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            open_time: i as i64 * 3_600_000,
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 100.0,
        })
        .collect()
}
