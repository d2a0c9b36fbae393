//! EMA crossover factor

use ta::indicators::ExponentialMovingAverage;
use ta::Next;

use crate::factors::{Factor, FactorSignal};
use crate::market::Kline;

/// Buys when the fast EMA is above the slow EMA, sells when below.
#[derive(Debug)]
pub struct EmaCross {
    fast: usize,
    slow: usize,
}

impl EmaCross {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Factor for EmaCross {
    fn name(&self) -> &str {
        "ema"
    }

    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
        if klines.len() < self.slow {
            return None;
        }
        let mut fast = ExponentialMovingAverage::new(self.fast).ok()?;
        let mut slow = ExponentialMovingAverage::new(self.slow).ok()?;
        let mut fast_value = 0.0;
        let mut slow_value = 0.0;
        for kline in klines {
            fast_value = fast.next(kline.close);
            slow_value = slow.next(kline.close);
        }
        if slow_value <= 0.0 {
            return Some(FactorSignal::hold());
        }

        let spread = ((fast_value - slow_value) / slow_value).abs().min(0.03) / 0.03;
        if fast_value > slow_value {
            Some(FactorSignal::buy(spread))
        } else if fast_value < slow_value {
            Some(FactorSignal::sell(spread))
        } else {
            Some(FactorSignal::hold())
        }
    }
}
