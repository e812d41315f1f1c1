use super::{Indicator, Window};

/// Percentage change over `period` bars: `price[t] / price[t - period] - 1`.
#[derive(Debug, Clone)]
pub struct Momentum {
    prices: Window,
}

impl Momentum {
    pub fn new(period: usize) -> Self {
        Self {
            prices: Window::new(period + 1),
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        self.prices.push(price);
        if !self.prices.is_full() {
            return None;
        }
        let base = self.prices.front()?;
        if base == 0.0 {
            return None;
        }
        Some(price / base - 1.0)
    }
}

impl Indicator for Momentum {
    fn name(&self) -> &'static str {
        "Momentum"
    }

    fn is_ready(&self) -> bool {
        self.prices.is_full()
    }

    fn reset(&mut self) {
        self.prices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_momentum_period() {
        let mut m = Momentum::new(2);
        assert_eq!(m.update(100.0), None);
        assert_eq!(m.update(105.0), None);
        let value = m.update(110.0).unwrap();
        assert!((value - 0.10).abs() < 1e-12);
    }
}
