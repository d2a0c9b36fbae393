//! Composite strategy engine
//!
//! A strategy instance combines several factor signals into one trading
//! decision per evaluation tick and owns a running/stopped lifecycle.

pub mod composite;
pub mod engine;
pub mod risk;

pub use composite::{CombineMode, CompositeStrategy, ModeParseError};
pub use engine::{EngineError, StrategyEngine};
pub use risk::RiskConfig;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::factors::FactorSpec;

/// Final per-tick trading decision.
pub use crate::market::Direction as Decision;

/// Lifecycle state of a strategy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Stopped,
    Running,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

/// Full configuration of one strategy instance as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub id: u64,
    pub name: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    pub mode: CombineMode,
    pub factors: Vec<FactorSpec>,
    /// Factor name -> weight; absent factors default to 1.0
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub risk: RiskConfig,
}
