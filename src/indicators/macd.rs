use super::{ema::EMA, Indicator};

#[derive(Debug, Clone)]
pub struct MACD {
    fast_ema: EMA,
    slow_ema: EMA,
    signal_ema: EMA,
    last: Option<MACDOutput>,
}

impl MACD {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_ema: EMA::new(fast_period),
            slow_ema: EMA::new(slow_period),
            signal_ema: EMA::new(signal_period),
            last: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(12, 26, 9)
    }

    pub fn update(&mut self, price: f64) -> Option<MACDOutput> {
        let fast = self.fast_ema.update(price)?;
        let slow = self.slow_ema.update(price)?;

        let macd_line = fast - slow;
        let signal = self.signal_ema.update(macd_line)?;
        let histogram = macd_line - signal;

        let output = MACDOutput {
            macd_line,
            signal_line: signal,
            histogram,
        };
        self.last = Some(output);
        Some(output)
    }
}

impl Indicator for MACD {
    fn name(&self) -> &'static str {
        "MACD"
    }

    fn is_ready(&self) -> bool {
        self.last.is_some()
    }

    fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.signal_ema.reset();
        self.last = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MACDOutput {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macd_flat_prices_are_zero() {
        let mut macd = MACD::default_params();
        let mut out = None;
        for _ in 0..40 {
            out = macd.update(100.0);
        }
        let out = out.unwrap();
        assert_eq!(out.macd_line, 0.0);
        assert_eq!(out.signal_line, 0.0);
        assert_eq!(out.histogram, 0.0);
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let mut macd = MACD::default_params();
        let mut out = None;
        for i in 0..60 {
            out = macd.update(100.0 + i as f64);
        }
        let out = out.unwrap();
        assert!(out.macd_line > 0.0);
        assert!(macd.is_ready());
    }
}
