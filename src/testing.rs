//! Deterministic synthetic market data for unit tests.

use chrono::{Duration, TimeZone, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ml::features::{FeatureMatrix, LabelSeries, NUM_FEATURES};
use crate::types::{Bar, PriceSeries};

/// Standard normal draw (Box-Muller).
pub fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Zero-mean returns in consecutive segments of `(length, sigma)`.
pub fn regime_switching_returns(segments: &[(usize, f64)], seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    segments
        .iter()
        .flat_map(|&(len, sigma)| (0..len).map(|_| sigma).collect::<Vec<_>>())
        .map(|sigma| sigma * standard_normal(&mut rng))
        .collect()
}

pub fn bar(day: i64, close: f64, volume: f64) -> Bar {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Bar {
        timestamp: start + Duration::days(day),
        open: close,
        high: close * 1.01,
        low: close * 0.99,
        close,
        volume,
    }
}

pub fn series_from_closes(closes: &[f64]) -> PriceSeries {
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, c)| bar(i as i64, *c, 1_000_000.0))
        .collect();
    PriceSeries::new(bars).unwrap()
}

pub fn flat_series(n: usize, price: f64) -> PriceSeries {
    series_from_closes(&vec![price; n])
}

/// Geometric random walk starting at 100 with 1.5% daily volatility.
pub fn random_walk_series(n: usize, seed: u64) -> PriceSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = 100.0;
    let bars = (0..n)
        .map(|i| {
            if i > 0 {
                price *= 1.0 + 0.0003 + 0.015 * standard_normal(&mut rng);
            }
            let volume = 1_000_000.0 * rng.gen_range(0.5..1.5);
            bar(i as i64, price, volume)
        })
        .collect();
    PriceSeries::new(bars).unwrap()
}

/// Feature rows of standard-normal noise where the label is the sign of
/// column 0 (optionally flipped with probability `noise`).
pub fn separable_dataset(n: usize, noise: f64, seed: u64) -> (FeatureMatrix, LabelSeries) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values = Array2::zeros((n, NUM_FEATURES));
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        for j in 0..NUM_FEATURES {
            values[[i, j]] = standard_normal(&mut rng);
        }
        let mut up = values[[i, 0]] > 0.0;
        if rng.gen::<f64>() < noise {
            up = !up;
        }
        labels.push(u8::from(up));
    }

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let timestamps = (0..n).map(|i| start + Duration::days(i as i64)).collect();
    (
        FeatureMatrix::new(values, timestamps).unwrap(),
        LabelSeries::new(labels),
    )
}
