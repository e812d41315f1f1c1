use super::{Indicator, Window};

/// Exponential moving average with the recursive (non-adjusted) form.
///
/// The first input seeds the average, so a value is available from the first
/// bar onward; there is no SMA warm-up.
#[derive(Debug, Clone)]
pub struct EMA {
    alpha: f64,
    value: Option<f64>,
}

impl EMA {
    pub fn new(period: usize) -> Self {
        let alpha = 2.0 / (period as f64 + 1.0);
        Self { alpha, value: None }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        let next = match self.value {
            Some(prev) => prev + self.alpha * (price - prev),
            None => price,
        };
        self.value = Some(next);
        self.value
    }
}

impl Indicator for EMA {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.value = None;
    }
}

/// Simple moving average over a trailing window.
#[derive(Debug, Clone)]
pub struct SMA {
    window: Window,
}

impl SMA {
    pub fn new(period: usize) -> Self {
        Self {
            window: Window::new(period),
        }
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        self.window.push(value);
        self.window.mean()
    }
}

impl Indicator for SMA {
    fn name(&self) -> &'static str {
        "SMA"
    }

    fn is_ready(&self) -> bool {
        self.window.is_full()
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}
