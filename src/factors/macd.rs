//! MACD momentum factor

use ta::indicators::MovingAverageConvergenceDivergence;
use ta::Next;

use crate::factors::{Factor, FactorSignal};
use crate::market::Kline;

/// Reads the MACD histogram: positive momentum buys, negative sells.
#[derive(Debug)]
pub struct MacdMomentum {
    fast: usize,
    slow: usize,
    signal_period: usize,
}

impl MacdMomentum {
    pub fn new(fast: usize, slow: usize, signal_period: usize) -> Self {
        Self { fast, slow, signal_period }
    }

    fn warmup(&self) -> usize {
        self.slow + self.signal_period
    }
}

impl Factor for MacdMomentum {
    fn name(&self) -> &str {
        "macd"
    }

    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
        if klines.len() <= self.warmup() {
            return None;
        }
        let mut macd =
            MovingAverageConvergenceDivergence::new(self.fast, self.slow, self.signal_period)
                .ok()?;
        let mut histogram = 0.0;
        for kline in klines {
            histogram = macd.next(kline.close).histogram;
        }
        let close = klines.last()?.close;
        if close <= 0.0 {
            return Some(FactorSignal::hold());
        }

        // normalise histogram against price so strength is scale-free
        let strength = (histogram.abs() / close).min(0.01) / 0.01;
        if histogram > 0.0 {
            Some(FactorSignal::buy(strength))
        } else if histogram < 0.0 {
            Some(FactorSignal::sell(strength))
        } else {
            Some(FactorSignal::hold())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_series;
    use crate::market::Direction;

    #[test]
    fn test_warmup() {
        let factor = MacdMomentum::new(12, 26, 9);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert!(factor.signal(&test_series(&closes)).is_none());
    }

    #[test]
    fn test_accelerating_rally_buys() {
        let factor = MacdMomentum::new(3, 8, 3);
        let closes: Vec<f64> = (0..30).map(|i| 100.0 * 1.02f64.powi(i)).collect();
        let signal = factor.signal(&test_series(&closes)).unwrap();
        assert_eq!(signal.direction, Direction::Buy);
    }
}
