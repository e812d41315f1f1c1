use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::config::Settings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::logging::AnalysisLog;
use crate::ml::ensemble::{EnsemblePredictor, EnsembleResult};
use crate::ml::features::FeatureEngineer;
use crate::ml::hmm::{RegimeDetector, RegimeFit};
use crate::risk::{regime_factor, KellySizer, SizingResult};
use crate::types::PriceSeries;

/// Average gain and loss per period taken from the history itself
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PayoffProfile {
    pub avg_win: f64,
    /// Mean absolute value of negative returns
    pub avg_loss: f64,
    pub win_rate: f64,
}

pub fn payoff_profile(returns: &[f64]) -> PayoffProfile {
    let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).map(f64::abs).collect();

    let mean = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };

    PayoffProfile {
        avg_win: mean(&wins),
        avg_loss: mean(&losses),
        win_rate: if returns.is_empty() {
            0.0
        } else {
            wins.len() as f64 / returns.len() as f64
        },
    }
}

/// Everything one pipeline run produces for an instrument
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub ticker: String,
    pub as_of: DateTime<Utc>,
    pub current_price: f64,
    pub bars: usize,
    pub feature_rows: usize,
    pub regime: RegimeFit,
    pub ensemble: EnsembleResult,
    pub payoff: PayoffProfile,
    pub sizing: SizingResult,
    pub elapsed_secs: f64,
}

/// Runs the full signal pipeline over one price history.
///
/// Every call trains fresh models; nothing is cached between runs.
#[derive(Debug, Clone)]
pub struct Analyzer {
    settings: Settings,
}

impl Analyzer {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// `current_price` falls back to the last close when not supplied.
    pub fn run(
        &self,
        ticker: &str,
        series: &PriceSeries,
        current_price: Option<f64>,
        log: &AnalysisLog,
    ) -> AnalysisResult<Analysis> {
        log.in_scope(|| self.run_inner(ticker, series, current_price, log))
    }

    fn run_inner(
        &self,
        ticker: &str,
        series: &PriceSeries,
        current_price: Option<f64>,
        log: &AnalysisLog,
    ) -> AnalysisResult<Analysis> {
        let started = Instant::now();

        let last = series.last().ok_or_else(|| {
            AnalysisError::InsufficientData("price series is empty".to_string())
        })?;

        let (features, labels) = FeatureEngineer::new().create_features(series)?;
        if features.is_empty() {
            return Err(AnalysisError::InsufficientData(format!(
                "{} bars leave no usable feature rows (need more than {})",
                series.len(),
                FeatureEngineer::LARGEST_WINDOW
            )));
        }

        let returns = series.clean_returns();

        let regime_started = Instant::now();
        let regime = RegimeDetector::new(self.settings.regime.clone()).fit(&returns)?;
        log.inference("regime_hmm", regime_started.elapsed().as_secs_f64());

        let mut ensemble = EnsemblePredictor::new(
            self.settings.boosting.clone(),
            self.settings.linear.clone(),
            self.settings.general.test_fraction,
        );
        let ensemble = ensemble.fit_predict(&features, &labels)?;
        for model in &ensemble.models {
            log.inference(model.name, model.elapsed_secs);
        }

        let payoff = payoff_profile(&returns);
        let mut sizer = KellySizer::from_settings(&self.settings.sizing);
        sizer.calculate(
            ensemble.win_probability,
            payoff.avg_win,
            payoff.avg_loss,
            regime_factor(regime.current_regime),
        );
        let sizing = sizer.summary()?;

        Ok(Analysis {
            ticker: ticker.to_string(),
            as_of: last.timestamp,
            current_price: current_price.unwrap_or(last.close),
            bars: series.len(),
            feature_rows: features.n_rows(),
            regime,
            ensemble,
            payoff,
            sizing,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}
