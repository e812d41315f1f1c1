use super::{sample_std, Indicator, Window, TRADING_DAYS_PER_YEAR};

/// Rolling annualized volatility of a return stream.
#[derive(Debug, Clone)]
pub struct RealizedVolatility {
    returns: Window,
}

impl RealizedVolatility {
    pub fn new(period: usize) -> Self {
        Self {
            returns: Window::new(period),
        }
    }

    pub fn update(&mut self, ret: f64) -> Option<f64> {
        self.returns.push(ret);
        self.returns.std().map(|s| s * TRADING_DAYS_PER_YEAR.sqrt())
    }
}

impl Indicator for RealizedVolatility {
    fn name(&self) -> &'static str {
        "RealizedVolatility"
    }

    fn is_ready(&self) -> bool {
        self.returns.is_full()
    }

    fn reset(&mut self) {
        self.returns.clear();
    }
}

/// Annualized volatility of a whole return sample, 0 when fewer than two
/// observations are available.
pub fn annualized_volatility(returns: &[f64]) -> f64 {
    sample_std(returns)
        .map(|s| s * TRADING_DAYS_PER_YEAR.sqrt())
        .unwrap_or(0.0)
}
