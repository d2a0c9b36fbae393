//! Bollinger band mean-reversion factor

use ta::indicators::BollingerBands;
use ta::Next;

use crate::factors::{Factor, FactorSignal};
use crate::market::Kline;

/// Buys a close below the lower band, sells a close above the upper band.
#[derive(Debug)]
pub struct BollingerReversion {
    period: usize,
    std_dev: f64,
}

impl BollingerReversion {
    pub fn new(period: usize, std_dev: f64) -> Self {
        Self { period, std_dev }
    }
}

impl Factor for BollingerReversion {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn signal(&self, klines: &[Kline]) -> Option<FactorSignal> {
        if klines.len() < self.period {
            return None;
        }
        let mut bb = BollingerBands::new(self.period, self.std_dev).ok()?;
        let mut output = None;
        for kline in klines {
            output = Some(bb.next(kline.close));
        }
        let bands = output?;
        let close = klines.last()?.close;

        let band_width = bands.upper - bands.lower;
        if band_width <= 0.0 {
            return Some(FactorSignal::hold());
        }

        if close < bands.lower {
            let strength = ((bands.lower - close) / band_width).min(1.0).max(0.3);
            Some(FactorSignal::buy(strength))
        } else if close > bands.upper {
            let strength = ((close - bands.upper) / band_width).min(1.0).max(0.3);
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
    fn test_spike_above_band_sells() {
        let factor = BollingerReversion::new(10, 2.0);
        let mut closes = vec![100.0; 15];
        closes.push(130.0);
        let signal = factor.signal(&test_series(&closes)).unwrap();
        assert_eq!(signal.direction, Direction::Sell);
    }

    #[test]
    fn test_crash_below_band_buys() {
        let factor = BollingerReversion::new(10, 2.0);
        let mut closes = vec![100.0; 15];
        closes.push(70.0);
        let signal = factor.signal(&test_series(&closes)).unwrap();
        assert_eq!(signal.direction, Direction::Buy);
    }

    #[test]
    fn test_inside_bands_holds() {
        let factor = BollingerReversion::new(10, 2.0);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 3) as f64 * 0.2).collect();
        let signal = factor.signal(&test_series(&closes)).unwrap();
        assert_eq!(signal.direction, Direction::Hold);
    }
}
