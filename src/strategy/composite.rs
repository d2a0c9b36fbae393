//! Combination of factor signals into one decision

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::factors::{build_factor, Factor, FactorSignal};
use crate::market::{Direction, Kline};
use crate::strategy::InstanceConfig;

/// How factor signals are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Threshold the weighted sum of signal scores
    Weighted,
    /// Majority rule over discrete buy/sell votes; ties hold
    Vote,
}

#[derive(Debug, Error)]
#[error("unknown combination mode: {0}")]
pub struct ModeParseError(String);

impl FromStr for CombineMode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weighted" => Ok(Self::Weighted),
            "vote" => Ok(Self::Vote),
            other => Err(ModeParseError(other.to_string())),
        }
    }
}

/// Weighted-sum decision threshold.
const DECISION_THRESHOLD: f64 = 0.5;

/// An ordered list of factors plus a combination rule.
pub struct CompositeStrategy {
    factors: Vec<Box<dyn Factor>>,
    mode: CombineMode,
    weights: HashMap<String, f64>,
}

impl CompositeStrategy {
    pub fn new(
        factors: Vec<Box<dyn Factor>>,
        mode: CombineMode,
        weights: HashMap<String, f64>,
    ) -> Self {
        Self { factors, mode, weights }
    }

    /// Build from a stored instance config.
    pub fn from_config(config: &InstanceConfig) -> anyhow::Result<Self> {
        let factors = config
            .factors
            .iter()
            .map(build_factor)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(factors, config.mode, config.weights.clone()))
    }

    fn weight(&self, factor_name: &str) -> f64 {
        self.weights.get(factor_name).copied().unwrap_or(1.0)
    }

    /// Run every factor against the series and combine the results.
    ///
    /// Factors still in warm-up contribute nothing; with no ready factor
    /// the decision is Hold.
    pub fn evaluate(&self, klines: &[Kline]) -> Direction {
        let signals: Vec<(&str, FactorSignal)> = self
            .factors
            .iter()
            .filter_map(|f| f.signal(klines).map(|s| (f.name(), s)))
            .collect();
        if signals.is_empty() {
            return Direction::Hold;
        }

        match self.mode {
            CombineMode::Weighted => self.combine_weighted(&signals),
            CombineMode::Vote => Self::combine_vote(&signals),
        }
    }

    fn combine_weighted(&self, signals: &[(&str, FactorSignal)]) -> Direction {
        let total: f64 = signals
            .iter()
            .map(|(name, signal)| signal.score() * self.weight(name))
            .sum();

        if total >= DECISION_THRESHOLD {
            Direction::Buy
        } else if total <= -DECISION_THRESHOLD {
            Direction::Sell
        } else {
            Direction::Hold
        }
    }

    fn combine_vote(signals: &[(&str, FactorSignal)]) -> Direction {
        let buys = signals
            .iter()
            .filter(|(_, s)| s.direction == Direction::Buy)
            .count();
        let sells = signals
            .iter()
            .filter(|(_, s)| s.direction == Direction::Sell)
            .count();

        if buys > sells {
            Direction::Buy
        } else if sells > buys {
            Direction::Sell
        } else {
            Direction::Hold
        }
    }
}
