use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

use super::{regime_label, regime_name, GaussianHMM};
use crate::config::RegimeSettings;
use crate::error::{AnalysisError, AnalysisResult};
use crate::indicators::annualized_volatility;

/// Relabeling of raw HMM states into canonical order.
///
/// Computed once per fit and applied to every state-indexed quantity, so the
/// current state and the probability vector can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatePermutation {
    old_to_new: Vec<usize>,
}

impl StatePermutation {
    /// Order raw states by descending key. Ties keep their raw-index order.
    pub fn by_descending(keys: &[f64]) -> Self {
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|a, b| keys[*b].partial_cmp(&keys[*a]).unwrap_or(Ordering::Equal));

        let mut old_to_new = vec![0; keys.len()];
        for (new, old) in order.into_iter().enumerate() {
            old_to_new[old] = new;
        }
        Self { old_to_new }
    }

    pub fn len(&self) -> usize {
        self.old_to_new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old_to_new.is_empty()
    }

    pub fn map_state(&self, raw: usize) -> usize {
        self.old_to_new[raw]
    }

    /// Reorder a raw-state-indexed vector into canonical order.
    pub fn apply<T: Copy + Default>(&self, raw_values: &[T]) -> Vec<T> {
        let mut out = vec![T::default(); raw_values.len()];
        for (old, value) in raw_values.iter().enumerate() {
            out[self.old_to_new[old]] = *value;
        }
        out
    }
}

/// Canonically ordered outcome of one regime fit
#[derive(Debug, Clone, Serialize)]
pub struct RegimeFit {
    pub current_regime: usize,
    /// Posterior of the final timestep, canonical order
    pub probabilities: Vec<f64>,
    /// Realized annualized volatility per canonical state
    pub volatilities: Vec<f64>,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub permutation: StatePermutation,
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl RegimeFit {
    pub fn name(&self) -> &'static str {
        regime_name(self.current_regime)
    }

    pub fn label(&self) -> String {
        regime_label(self.current_regime)
    }

    pub fn confidence(&self) -> f64 {
        self.probabilities
            .get(self.current_regime)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Fits a fresh HMM over a return series and reports the current regime
pub struct RegimeDetector {
    settings: RegimeSettings,
    fit: Option<RegimeFit>,
}

impl RegimeDetector {
    pub fn new(settings: RegimeSettings) -> Self {
        Self {
            settings,
            fit: None,
        }
    }

    pub fn n_regimes(&self) -> usize {
        self.settings.n_regimes
    }

    /// Fit and keep the result for the accessors. Returns the canonical index
    /// of the most recent regime.
    pub fn fit_predict(&mut self, returns: &[f64]) -> AnalysisResult<usize> {
        let fit = self.fit(returns)?;
        let current = fit.current_regime;
        self.fit = Some(fit);
        Ok(current)
    }

    pub fn fit(&self, returns: &[f64]) -> AnalysisResult<RegimeFit> {
        let k = self.settings.n_regimes;
        if k == 0 {
            return Err(AnalysisError::ModelFit("regime count must be positive".to_string()));
        }
        let cleaned: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();

        if cleaned.is_empty() || cleaned.len() < k {
            return Err(AnalysisError::ModelFit(format!(
                "{} usable returns for {} regimes",
                cleaned.len(),
                k
            )));
        }
        if cleaned.iter().all(|r| *r == cleaned[0]) {
            return Err(AnalysisError::InsufficientData(
                "return series has zero variance".to_string(),
            ));
        }

        let mut hmm = GaussianHMM::new(k, self.settings.max_iter, self.settings.tol, self.settings.seed);
        let report = hmm.fit(&cleaned)?;

        let path = hmm.predict(&cleaned);
        let raw_volatilities: Vec<f64> = (0..k)
            .map(|state| {
                let assigned: Vec<f64> = cleaned
                    .iter()
                    .zip(&path)
                    .filter(|(_, s)| **s == state)
                    .map(|(r, _)| *r)
                    .collect();
                annualized_volatility(&assigned)
            })
            .collect();

        let permutation = StatePermutation::by_descending(&raw_volatilities);

        let gamma = hmm.posteriors(&cleaned);
        let raw_posterior = gamma.row(cleaned.len() - 1).to_vec();
        let raw_current = path[cleaned.len() - 1];

        let fit = RegimeFit {
            current_regime: permutation.map_state(raw_current),
            probabilities: permutation.apply(&raw_posterior),
            volatilities: permutation.apply(&raw_volatilities),
            means: permutation.apply(&hmm.means.to_vec()),
            variances: permutation.apply(&hmm.variances.to_vec()),
            permutation,
            log_likelihood: report.log_likelihood,
            iterations: report.iterations,
            converged: report.converged,
        };

        debug!(
            regime = fit.current_regime,
            name = fit.name(),
            iterations = fit.iterations,
            "regime fit complete"
        );

        Ok(fit)
    }

    pub fn result(&self) -> AnalysisResult<&RegimeFit> {
        self.fit.as_ref().ok_or(AnalysisError::NotFitted("regime model"))
    }

    pub fn current_regime(&self) -> AnalysisResult<usize> {
        Ok(self.result()?.current_regime)
    }

    pub fn regime_name(&self) -> AnalysisResult<&'static str> {
        Ok(self.result()?.name())
    }

    pub fn regime_label(&self) -> AnalysisResult<String> {
        Ok(self.result()?.label())
    }

    pub fn probabilities(&self) -> AnalysisResult<&[f64]> {
        Ok(&self.result()?.probabilities)
    }

    pub fn volatilities(&self) -> AnalysisResult<&[f64]> {
        Ok(&self.result()?.volatilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::regime_switching_returns;

    fn settings(n_regimes: usize) -> RegimeSettings {
        RegimeSettings {
            n_regimes,
            ..RegimeSettings::default()
        }
    }

    #[test]
    fn test_permutation_descending_with_stable_ties() {
        let perm = StatePermutation::by_descending(&[0.1, 0.3, 0.1, 0.2]);
        assert_eq!(perm.map_state(1), 0);
        assert_eq!(perm.map_state(3), 1);
        // tied raw states 0 and 2 keep their relative order
        assert_eq!(perm.map_state(0), 2);
        assert_eq!(perm.map_state(2), 3);
        assert_eq!(perm.apply(&[10, 30, 11, 20]), vec![30, 20, 10, 11]);
    }

    #[test]
    fn test_accessors_before_fit() {
        let detector = RegimeDetector::new(RegimeSettings::default());
        assert_eq!(
            detector.current_regime().unwrap_err(),
            AnalysisError::NotFitted("regime model")
        );
        assert!(detector.probabilities().is_err());
    }

    #[test]
    fn test_zero_regimes_is_model_fit_error() {
        let returns = regime_switching_returns(&[(100, 0.01), (100, 0.03)], 7);
        let mut detector = RegimeDetector::new(settings(0));
        let err = detector.fit_predict(&returns).unwrap_err();
        assert_eq!(err.kind(), "ModelFitError");
        assert!(detector.result().is_err());
    }

    #[test]
    fn test_probabilities_sum_to_one_and_vols_descend() {
        let returns = regime_switching_returns(&[(150, 0.005), (150, 0.02), (100, 0.01)], 42);
        let mut detector = RegimeDetector::new(settings(3));
        let current = detector.fit_predict(&returns).unwrap();

        let probs = detector.probabilities().unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(current < 3);

        let vols = detector.volatilities().unwrap();
        assert!(vols.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_high_volatility_tail_is_regime_zero() {
        let returns = regime_switching_returns(&[(250, 0.004), (150, 0.03)], 7);
        let mut detector = RegimeDetector::new(settings(2));
        assert_eq!(detector.fit_predict(&returns).unwrap(), 0);
        assert_eq!(detector.regime_name().unwrap(), "HIGH VOL");
        assert_eq!(detector.regime_label().unwrap(), "[HIGH VOL]");
    }

    #[test]
    fn test_low_volatility_tail_is_last_regime() {
        let returns = regime_switching_returns(&[(150, 0.03), (250, 0.004)], 7);
        let mut detector = RegimeDetector::new(settings(2));
        assert_eq!(detector.fit_predict(&returns).unwrap(), 1);
        let fit = detector.result().unwrap();
        assert!(fit.probabilities[1] > 0.5);
    }

    #[test]
    fn test_flat_returns_are_insufficient() {
        let mut detector = RegimeDetector::new(settings(3));
        let err = detector.fit_predict(&[0.0; 100]).unwrap_err();
        assert_eq!(err.kind(), "InsufficientDataError");
    }

    #[test]
    fn test_empty_or_short_series_fail_fit() {
        let mut detector = RegimeDetector::new(settings(3));
        assert_eq!(detector.fit_predict(&[]).unwrap_err().kind(), "ModelFitError");
        assert_eq!(
            detector
                .fit_predict(&[0.01, f64::NAN, -0.01])
                .unwrap_err()
                .kind(),
            "ModelFitError"
        );
    }

    #[test]
    fn test_non_finite_values_are_dropped() {
        let mut returns = regime_switching_returns(&[(200, 0.01)], 3);
        returns.insert(0, f64::NAN);
        returns.push(f64::INFINITY);
        let detector = RegimeDetector::new(settings(2));
        let fit = detector.fit(&returns).unwrap();
        assert!(fit.log_likelihood.is_finite());
    }

    #[test]
    fn test_repeated_fits_are_identical() {
        let returns = regime_switching_returns(&[(200, 0.006), (200, 0.018)], 11);
        let detector = RegimeDetector::new(settings(3));
        let a = detector.fit(&returns).unwrap();
        let b = detector.fit(&returns).unwrap();
        assert_eq!(a.current_regime, b.current_regime);
        assert_eq!(a.probabilities, b.probabilities);
        assert_eq!(a.volatilities, b.volatilities);
    }
}
