pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod momentum;
pub mod volatility;
pub mod volume;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use momentum::*;
pub use volatility::*;
pub use volume::*;

use std::collections::VecDeque;

/// Trading days per year used to annualize daily volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    fn reset(&mut self);
}

pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Sample standard deviation (n - 1 denominator) of the last `period` values.
pub fn stddev(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: f64 = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (period - 1) as f64;

    Some(variance.max(0.0).sqrt())
}

/// Sample standard deviation of a whole slice; `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    stddev(values, values.len())
}

/// Fixed-length trailing window shared by the rolling indicators.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    period: usize,
    values: VecDeque<f64>,
}

impl Window {
    pub(crate) fn new(period: usize) -> Self {
        Self {
            period,
            values: VecDeque::with_capacity(period + 1),
        }
    }

    pub(crate) fn push(&mut self, value: f64) {
        self.values.push_back(value);
        if self.values.len() > self.period {
            self.values.pop_front();
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.period > 0 && self.values.len() == self.period
    }

    pub(crate) fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.period as f64)
    }

    pub(crate) fn std(&self) -> Option<f64> {
        if !self.is_full() || self.period < 2 {
            return None;
        }
        let mean = self.mean()?;
        let variance = self
            .values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / (self.period - 1) as f64;
        Some(variance.max(0.0).sqrt())
    }

    pub(crate) fn front(&self) -> Option<f64> {
        self.values.front().copied()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_and_stddev() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 5), Some(3.0));
        assert_eq!(sma(&values, 2), Some(4.5));
        assert_eq!(sma(&values, 6), None);
        // sample std of 1..5 is sqrt(2.5)
        assert!((stddev(&values, 5).unwrap() - 2.5_f64.sqrt()).abs() < 1e-12);
        assert_eq!(sample_std(&[1.0]), None);
    }

    #[test]
    fn test_window_rolls() {
        let mut window = Window::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert!(window.is_full());
        assert_eq!(window.mean(), Some(3.0));
        assert_eq!(window.front(), Some(2.0));
        assert_eq!(window.std(), Some(1.0));
    }
}
