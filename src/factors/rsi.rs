//! RSI (Relative Strength Index) reversal factor

use ta::indicators::RelativeStrengthIndex;
use ta::Next;

use crate::factors::{Factor, FactorSignal};
use crate::market::Kline;

/// Buys when RSI drops below the oversold level, sells above overbought.
/// Strength scales with how far past the level RSI has moved.
#[derive(Debug)]
pub struct RsiReversal {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl RsiReversal {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        Self { period, oversold, overbought }
    }

    fn latest_rsi(&self, klines: &[Kline]) -> Option<f64> {
        let mut rsi = RelativeStrengthIndex::new(self.period).ok()?;
        let mut value = None;
        for (i, kline) in klines.iter().enumerate() {
            let next = rsi.next(kline.close);
            // ta's RSI needs period+1 values before the output is meaningful
            if i >= self.period {
                value = Some(next);
            }
        }
        value
    }
}

impl Factor for RsiReversal {
    fn name(&self) -> &str {
        "rsi"
    }

    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
        let rsi = self.latest_rsi(klines)?;
        if rsi <= self.oversold {
            let strength = ((self.oversold - rsi) / self.oversold).clamp(0.2, 1.0);
            Some(FactorSignal::buy(strength))
        } else if rsi >= self.overbought {
            let strength = ((rsi - self.overbought) / (100.0 - self.overbought)).clamp(0.2, 1.0);
            Some(FactorSignal::sell(strength))
        } else {
            Some(FactorSignal::hold())
        }
    }
}
