//! ATR breakout factor

use ta::indicators::AverageTrueRange;
use ta::{DataItem, Next};

use crate::factors::{Factor, FactorSignal};
use crate::market::Kline;

/// Buys when the latest close breaks more than `multiplier * ATR` above the
/// previous close, sells on the mirror-image break down.
#[derive(Debug)]
pub struct AtrBreakout {
    period: usize,
    multiplier: f64,
}

impl AtrBreakout {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self { period, multiplier }
    }

    /// ATR over the series up to but excluding the last bar.
    fn trailing_atr(&self, klines: &[Kline]) -> Option<f64> {
        let mut atr = AverageTrueRange::new(self.period).ok()?;
        let mut value = None;
        for (i, kline) in klines[..klines.len() - 1].iter().enumerate() {
            let item = DataItem::builder()
                .open(kline.open)
                .high(kline.high)
                .low(kline.low)
                .close(kline.close)
                .volume(kline.volume)
                .build()
                .ok()?;
            let next = atr.next(&item);
            if i + 1 >= self.period {
                value = Some(next);
            }
        }
        value
    }
}

impl Factor for AtrBreakout {
    fn name(&self) -> &str {
        "atr"
    }

    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
        if klines.len() < self.period + 2 {
            return None;
        }
        let atr = self.trailing_atr(klines)?;
        if atr <= 0.0 {
            return Some(FactorSignal::hold());
        }

        let last = klines.last()?;
        let prev = &klines[klines.len() - 2];
        let band = self.multiplier * atr;
        let move_size = last.close - prev.close;

        if move_size > band {
            Some(FactorSignal::buy((move_size / band - 1.0).min(1.0).max(0.3)))
        } else if move_size < -band {
            Some(FactorSignal::sell((-move_size / band - 1.0).min(1.0).max(0.3)))
        } else {
            Some(FactorSignal::hold())
        }
    }
}
