use super::{Indicator, Window};

#[derive(Debug, Clone)]
pub struct BollingerBands {
    std_dev_multiplier: f64,
    prices: Window,
    last: Option<BollingerOutput>,
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            std_dev_multiplier,
            prices: Window::new(period),
            last: None,
        }
    }

    pub fn default_params() -> Self {
        Self::new(20, 2.0)
    }

    pub fn update(&mut self, price: f64) -> Option<BollingerOutput> {
        self.prices.push(price);

        let middle = self.prices.mean()?;
        let std_dev = self.prices.std()?;

        let deviation = std_dev * self.std_dev_multiplier;
        let upper = middle + deviation;
        let lower = middle - deviation;

        // Width relative to the middle band; undefined for a zero mean price
        let bandwidth = if middle != 0.0 {
            Some((upper - lower) / middle)
        } else {
            None
        };

        let output = BollingerOutput {
            upper,
            middle,
            lower,
            bandwidth,
        };
        self.last = Some(output);
        Some(output)
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &'static str {
        "BollingerBands"
    }

    fn is_ready(&self) -> bool {
        self.last.is_some()
    }

    fn reset(&mut self) {
        self.prices.clear();
        self.last = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub bandwidth: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandwidth_is_four_sigma_over_mean() {
        let mut bb = BollingerBands::new(4, 2.0);
        let mut out = None;
        for p in [9.0, 11.0, 9.0, 11.0] {
            out = bb.update(p);
        }
        let out = out.unwrap();
        let std = (4.0_f64 / 3.0).sqrt();
        assert!((out.middle - 10.0).abs() < 1e-12);
        assert!((out.bandwidth.unwrap() - 4.0 * std / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_prices_have_zero_width() {
        let mut bb = BollingerBands::default_params();
        let mut out = None;
        for _ in 0..25 {
            out = bb.update(42.0);
        }
        assert_eq!(out.unwrap().bandwidth, Some(0.0));
        assert!(bb.is_ready());
    }
}
