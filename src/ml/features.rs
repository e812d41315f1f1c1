use chrono::{DateTime, Utc};
use ndarray::{s, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::indicators::{
    BollingerBands, Indicator, Momentum, RealizedVolatility, VolumeProfile, MACD, RSI, SMA,
};
use crate::types::{Bar, PriceSeries};

pub const NUM_FEATURES: usize = 12;

/// Column names of the feature matrix, in column order.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "returns",
    "sma_5",
    "sma_20",
    "sma_50",
    "macd",
    "macd_signal",
    "rsi_14",
    "volatility_20",
    "bb_width",
    "momentum_10",
    "momentum_20",
    "volume_ratio",
];

/// Indicator snapshot for one bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureRow {
    pub returns: f64,
    pub sma_5: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub rsi_14: f64,
    pub volatility_20: f64,
    pub bb_width: f64,
    pub momentum_10: f64,
    pub momentum_20: f64,
    pub volume_ratio: f64,
}

impl FeatureRow {
    pub fn to_array(&self) -> [f64; NUM_FEATURES] {
        [
            self.returns,
            self.sma_5,
            self.sma_20,
            self.sma_50,
            self.macd,
            self.macd_signal,
            self.rsi_14,
            self.volatility_20,
            self.bb_width,
            self.momentum_10,
            self.momentum_20,
            self.volume_ratio,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Rows of indicator values, one per retained bar, with the bar timestamps.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    values: Array2<f64>,
    timestamps: Vec<DateTime<Utc>>,
}

impl FeatureMatrix {
    pub fn new(values: Array2<f64>, timestamps: Vec<DateTime<Utc>>) -> AnalysisResult<Self> {
        if values.ncols() != NUM_FEATURES {
            return Err(AnalysisError::InvalidSeries(format!(
                "expected {} feature columns, got {}",
                NUM_FEATURES,
                values.ncols()
            )));
        }
        if values.nrows() != timestamps.len() {
            return Err(AnalysisError::InvalidSeries(format!(
                "{} feature rows but {} timestamps",
                values.nrows(),
                timestamps.len()
            )));
        }
        Ok(Self { values, timestamps })
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.values.row(index)
    }

    pub fn rows(&self, start: usize, end: usize) -> ArrayView2<'_, f64> {
        self.values.slice(s![start..end, ..])
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.values.column(idx))
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }
}

/// Binary next-period direction flags aligned with a `FeatureMatrix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSeries {
    labels: Vec<u8>,
}

impl LabelSeries {
    pub fn new(labels: Vec<u8>) -> Self {
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.labels
    }

    pub fn slice(&self, start: usize, end: usize) -> &[u8] {
        &self.labels[start..end]
    }

    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|l| **l == 1).count() as f64 / self.labels.len() as f64
    }
}

/// Streaming state for every indicator the engineer computes.
struct IndicatorSet {
    sma_5: SMA,
    sma_20: SMA,
    sma_50: SMA,
    macd: MACD,
    rsi: RSI,
    volatility: RealizedVolatility,
    bands: BollingerBands,
    momentum_10: Momentum,
    momentum_20: Momentum,
    volume: VolumeProfile,
}

impl IndicatorSet {
    fn new() -> Self {
        Self {
            sma_5: SMA::new(5),
            sma_20: SMA::new(20),
            sma_50: SMA::new(50),
            macd: MACD::default_params(),
            rsi: RSI::new(14),
            volatility: RealizedVolatility::new(20),
            bands: BollingerBands::default_params(),
            momentum_10: Momentum::new(10),
            momentum_20: Momentum::new(20),
            volume: VolumeProfile::new(20),
        }
    }

    /// Advance every indicator by one bar. All indicators are fed even when
    /// an earlier one is still warming up.
    fn update(&mut self, bar: &Bar, ret: Option<f64>) -> Option<FeatureRow> {
        let sma_5 = self.sma_5.update(bar.close);
        let sma_20 = self.sma_20.update(bar.close);
        let sma_50 = self.sma_50.update(bar.close);
        let macd = self.macd.update(bar.close);
        let rsi_14 = self.rsi.update(bar.close);
        let bands = self.bands.update(bar.close);
        let momentum_10 = self.momentum_10.update(bar.close);
        let momentum_20 = self.momentum_20.update(bar.close);
        self.volume.update(bar.volume);
        let volume_ratio = self.volume.relative_volume(bar.volume);

        // An undefined return poisons the rolling window until it rolls out
        let volatility_20 = match ret {
            Some(r) => self.volatility.update(r),
            None => {
                self.volatility.reset();
                None
            }
        };

        let macd = macd?;
        Some(FeatureRow {
            returns: ret?,
            sma_5: sma_5?,
            sma_20: sma_20?,
            sma_50: sma_50?,
            macd: macd.macd_line,
            macd_signal: macd.signal_line,
            rsi_14: rsi_14?,
            volatility_20: volatility_20?,
            bb_width: bands?.bandwidth?,
            momentum_10: momentum_10?,
            momentum_20: momentum_20?,
            volume_ratio: volume_ratio?,
        })
    }
}

/// Turns a price history into the indicator matrix and direction labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Longest lookback of any indicator; shorter inputs yield no rows.
    pub const LARGEST_WINDOW: usize = 50;

    pub fn new() -> Self {
        Self
    }

    /// Compute the twelve indicators for every bar, label each row with the
    /// direction of the following return, and drop warm-up rows and the final
    /// row (which has no following return).
    ///
    /// A short input produces an empty matrix rather than an error; callers
    /// decide whether that is fatal.
    pub fn create_features(
        &self,
        series: &PriceSeries,
    ) -> AnalysisResult<(FeatureMatrix, LabelSeries)> {
        let bars = series.bars();
        let returns = series.returns();

        let mut indicators = IndicatorSet::new();
        let mut flat = Vec::with_capacity(bars.len() * NUM_FEATURES);
        let mut timestamps = Vec::new();
        let mut labels = Vec::new();

        for (t, bar) in bars.iter().enumerate() {
            let row = indicators.update(bar, returns[t]);

            // The last bar has no next observation
            if t + 1 >= bars.len() {
                break;
            }

            let Some(row) = row else { continue };
            if !row.is_finite() {
                continue;
            }

            let next_up = returns[t + 1].map(|r| r > 0.0).unwrap_or(false);
            flat.extend_from_slice(&row.to_array());
            timestamps.push(bar.timestamp);
            labels.push(u8::from(next_up));
        }

        let values = Array2::from_shape_vec((timestamps.len(), NUM_FEATURES), flat)
            .map_err(|e| AnalysisError::InvalidSeries(e.to_string()))?;

        Ok((FeatureMatrix::new(values, timestamps)?, LabelSeries::new(labels)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flat_series, random_walk_series, series_from_closes};

    #[test]
    fn test_short_series_is_empty() {
        let series = random_walk_series(50, 7);
        let (matrix, labels) = FeatureEngineer::new().create_features(&series).unwrap();
        assert!(matrix.is_empty());
        assert!(labels.is_empty());
    }

    #[test]
    fn test_rows_aligned_and_warmup_dropped() {
        let series = random_walk_series(120, 11);
        let (matrix, labels) = FeatureEngineer::new().create_features(&series).unwrap();

        // Rows 49..=118 survive: SMA50 warm-up in front, the last bar behind
        assert_eq!(matrix.n_rows(), 70);
        assert_eq!(labels.len(), matrix.n_rows());
        assert_eq!(matrix.n_features(), NUM_FEATURES);
        assert_eq!(matrix.timestamps()[0], series.bars()[49].timestamp);
        assert_eq!(
            *matrix.timestamps().last().unwrap(),
            series.bars()[118].timestamp
        );
        assert!(matrix.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_labels_follow_next_return() {
        let series = random_walk_series(90, 3);
        let (matrix, labels) = FeatureEngineer::new().create_features(&series).unwrap();
        let closes = series.closes();

        for (i, ts) in matrix.timestamps().iter().enumerate() {
            let t = series.bars().iter().position(|b| b.timestamp == *ts).unwrap();
            let expected = u8::from(closes[t + 1] > closes[t]);
            assert_eq!(labels.as_slice()[i], expected);
        }
    }

    #[test]
    fn test_returns_column_is_backward_looking() {
        let series = random_walk_series(80, 5);
        let (matrix, _) = FeatureEngineer::new().create_features(&series).unwrap();
        let closes = series.closes();
        let returns = matrix.column("returns").unwrap();

        let first = closes[49] / closes[48] - 1.0;
        assert!((returns[0] - first).abs() < 1e-12);
    }

    #[test]
    fn test_flat_series_stays_finite() {
        let series = flat_series(100, 25.0);
        let (matrix, labels) = FeatureEngineer::new().create_features(&series).unwrap();

        assert_eq!(matrix.n_rows(), 50);
        let rsi = matrix.column("rsi_14").unwrap();
        let macd = matrix.column("macd").unwrap();
        assert!(rsi.iter().all(|v| *v == 50.0));
        assert!(macd.iter().all(|v| *v == 0.0));
        assert_eq!(labels.positive_rate(), 0.0);
    }

    #[test]
    fn test_momentum_matches_close_ratio() {
        let closes: Vec<f64> = (0..70).map(|i| 100.0 + i as f64).collect();
        let series = series_from_closes(&closes);
        let (matrix, labels) = FeatureEngineer::new().create_features(&series).unwrap();

        let momentum = matrix.column("momentum_10").unwrap();
        assert!((momentum[0] - (149.0 / 139.0 - 1.0)).abs() < 1e-12);
        assert!(labels.as_slice().iter().all(|l| *l == 1));
    }
}
