use serde::Serialize;
use tracing::debug;

use crate::config::SizingSettings;
use crate::error::{AnalysisError, AnalysisResult};

/// Fraction of the full Kelly bet that is actually recommended.
pub const KELLY_FRACTION: f64 = 0.5;
pub const MIN_WIN_PROBABILITY: f64 = 0.01;
pub const MAX_WIN_PROBABILITY: f64 = 0.99;
/// Stand-in average loss when the history has no losing periods.
pub const ZERO_LOSS_SUBSTITUTE: f64 = 0.01;
pub const DEFAULT_REGIME_FACTOR: f64 = 0.75;

/// Position multiplier for a canonical regime index.
pub fn regime_factor(regime: usize) -> f64 {
    match regime {
        0 => 0.5,
        1 => 0.75,
        2 => 1.0,
        _ => DEFAULT_REGIME_FACTOR,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingResult {
    pub full_kelly: f64,
    pub recommended: f64,
    pub max_position: f64,
    pub regime_factor: f64,
    pub payoff_ratio: f64,
    pub win_probability: f64,
}

impl SizingResult {
    pub fn full_kelly_pct(&self) -> f64 {
        round2(self.full_kelly * 100.0)
    }

    pub fn recommended_pct(&self) -> f64 {
        round2(self.recommended * 100.0)
    }

    pub fn max_position_pct(&self) -> f64 {
        round2(self.max_position * 100.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Half-Kelly position sizing scaled by regime and capped.
#[derive(Debug, Clone)]
pub struct KellySizer {
    max_position: f64,
    result: Option<SizingResult>,
}

impl KellySizer {
    pub fn new(max_position: f64) -> Self {
        Self {
            max_position,
            result: None,
        }
    }

    pub fn from_settings(settings: &SizingSettings) -> Self {
        Self::new(settings.max_position)
    }

    pub fn max_position(&self) -> f64 {
        self.max_position
    }

    /// Returns the recommended fraction of capital in `[0, max_position]`.
    pub fn calculate(
        &mut self,
        win_probability: f64,
        avg_win: f64,
        avg_loss: f64,
        regime_factor: f64,
    ) -> f64 {
        let p = win_probability.clamp(MIN_WIN_PROBABILITY, MAX_WIN_PROBABILITY);
        let avg_loss = if avg_loss == 0.0 {
            ZERO_LOSS_SUBSTITUTE
        } else {
            avg_loss
        };

        let payoff_ratio = avg_win / avg_loss;
        let full_kelly = if payoff_ratio > 0.0 && payoff_ratio.is_finite() {
            ((p * payoff_ratio - (1.0 - p)) / payoff_ratio).max(0.0)
        } else {
            0.0
        };

        let recommended = (full_kelly * KELLY_FRACTION * regime_factor)
            .min(self.max_position)
            .max(0.0);

        debug!(
            win_probability = p,
            payoff_ratio,
            full_kelly,
            recommended,
            "kelly sizing"
        );

        self.result = Some(SizingResult {
            full_kelly,
            recommended,
            max_position: self.max_position,
            regime_factor,
            payoff_ratio,
            win_probability: p,
        });
        recommended
    }

    pub fn full_kelly(&self) -> AnalysisResult<f64> {
        Ok(self.summary()?.full_kelly)
    }

    pub fn recommended_size(&self) -> AnalysisResult<f64> {
        Ok(self.summary()?.recommended)
    }

    pub fn summary(&self) -> AnalysisResult<SizingResult> {
        self.result.ok_or(AnalysisError::NotFitted("position size"))
    }
}

impl Default for KellySizer {
    fn default() -> Self {
        Self::from_settings(&SizingSettings::default())
    }
}
