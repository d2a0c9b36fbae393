//! SMA trend factor

use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::factors::{Factor, FactorSignal};
use crate::market::Kline;

/// Buys when price is above its simple moving average, sells below.
#[derive(Debug)]
pub struct SmaTrend {
    period: usize,
}

impl SmaTrend {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl Factor for SmaTrend {
    fn name(&self) -> &str {
        "sma"
    }

    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
        if klines.len() < self.period {
            return None;
        }
        let mut sma = SimpleMovingAverage::new(self.period).ok()?;
        let mut value = 0.0;
        for kline in klines {
            value = sma.next(kline.close);
        }
        let close = klines.last()?.close;
        if value <= 0.0 {
            return Some(FactorSignal::hold());
        }

        let deviation = ((close - value) / value).abs().min(0.05) / 0.05;
        if close > value {
            Some(FactorSignal::buy(deviation))
        } else if close < value {
            Some(FactorSignal::sell(deviation))
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
    fn test_price_above_sma_buys() {
        let factor = SmaTrend::new(5);
        let signal = factor
            .signal(&test_series(&[100.0, 100.0, 100.0, 100.0, 100.0, 110.0]))
            .unwrap();
        assert_eq!(signal.direction, Direction::Buy);
    }

    #[test]
    fn test_price_below_sma_sells() {
        let factor = SmaTrend::new(5);
        let signal = factor
            .signal(&test_series(&[100.0, 100.0, 100.0, 100.0, 100.0, 90.0]))
            .unwrap();
        assert_eq!(signal.direction, Direction::Sell);
    }
}
