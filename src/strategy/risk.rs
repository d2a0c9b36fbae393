//! Risk configuration attached to a strategy instance
//!
//! Not interpreted by the evaluation code; forwarded to order placement as
//! sizing and protection constraints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Maximum notional per order, in quote currency
    pub max_position_size: f64,
    /// Maximum number of open positions
    pub max_open_positions: usize,
    /// Stop loss distance (e.g. 0.05 = 5%)
    pub stop_loss_pct: f64,
    /// Take profit distance (e.g. 0.10 = 10%)
    pub take_profit_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: 100.0,
            max_open_positions: 3,
            stop_loss_pct: 0.05,
            take_profit_pct: 0.10,
        }
    }
}
