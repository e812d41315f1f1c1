use super::{Indicator, Window};

/// Relative strength index over simple rolling means of gains and losses.
///
/// A window with no losses reads 100; a window with neither gains nor losses
/// (flat prices) reads the neutral 50 instead of being undefined.
#[derive(Debug, Clone)]
pub struct RSI {
    prev_price: Option<f64>,
    gains: Window,
    losses: Window,
    value: Option<f64>,
}

impl RSI {
    pub fn new(period: usize) -> Self {
        Self {
            prev_price: None,
            gains: Window::new(period),
            losses: Window::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            self.gains.push(if change > 0.0 { change } else { 0.0 });
            self.losses.push(if change < 0.0 { -change } else { 0.0 });

            if let (Some(avg_gain), Some(avg_loss)) = (self.gains.mean(), self.losses.mean()) {
                self.value = Some(Self::calculate_rsi(avg_gain, avg_loss));
            }
        }

        self.prev_price = Some(price);
        self.value
    }

    fn calculate_rsi(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 {
            if avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        }
    }
}

impl Indicator for RSI {
    fn name(&self) -> &'static str {
        "RSI"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.prev_price = None;
        self.gains.clear();
        self.losses.clear();
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_warmup_needs_period_changes() {
        let mut rsi = RSI::new(3);
        assert_eq!(rsi.update(10.0), None);
        assert_eq!(rsi.update(11.0), None);
        assert_eq!(rsi.update(12.0), None);
        assert_eq!(rsi.update(13.0), Some(100.0));
    }

    #[test]
    fn test_rsi_flat_prices_are_neutral() {
        let mut rsi = RSI::new(3);
        let mut last = None;
        for _ in 0..6 {
            last = rsi.update(50.0);
        }
        assert_eq!(last, Some(50.0));
    }

    #[test]
    fn test_rsi_mixed_changes() {
        let mut rsi = RSI::new(2);
        rsi.update(10.0);
        rsi.update(12.0); // +2
        let value = rsi.update(11.0).unwrap(); // -1
        // avg gain 1, avg loss 0.5 -> rs 2 -> 66.67
        assert!((value - 200.0 / 3.0).abs() < 1e-9);
    }
}
