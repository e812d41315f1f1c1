use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use tracing::{debug, warn};

use crate::error::{AnalysisError, AnalysisResult};

/// Added to every variance re-estimate so a collapsing state stays invertible.
pub const VARIANCE_FLOOR: f64 = 1e-10;

const KMEANS_MAX_ITER: usize = 100;

/// K-state hidden Markov model with scalar Gaussian emissions.
///
/// State indices are arbitrary after fitting; callers that need a stable
/// ordering relabel them (see `StatePermutation`).
#[derive(Debug, Clone)]
pub struct GaussianHMM {
    /// Number of hidden states
    pub n_states: usize,
    /// State transition matrix (K x K), rows sum to 1
    pub transition: Array2<f64>,
    /// Initial state probabilities (K)
    pub start_prob: Array1<f64>,
    /// Emission mean per state
    pub means: Array1<f64>,
    /// Emission variance per state
    pub variances: Array1<f64>,
    /// Convergence tolerance on the log-likelihood gain
    pub tol: f64,
    /// Maximum EM iterations
    pub max_iter: usize,
    seed: u64,
}

/// Outcome of a Baum-Welch run
#[derive(Debug, Clone, Copy)]
pub struct FitReport {
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl GaussianHMM {
    pub fn new(n_states: usize, max_iter: usize, tol: f64, seed: u64) -> Self {
        let uniform = 1.0 / n_states.max(1) as f64;
        Self {
            n_states,
            transition: Array2::from_elem((n_states, n_states), uniform),
            start_prob: Array1::from_elem(n_states, uniform),
            means: Array1::zeros(n_states),
            variances: Array1::ones(n_states),
            tol,
            max_iter,
            seed,
        }
    }

    /// Uniform start and transition probabilities, k-means++ means and the
    /// series variance for every state.
    pub fn initialize(&mut self, observations: &[f64]) {
        let uniform = 1.0 / self.n_states as f64;
        self.start_prob.fill(uniform);
        self.transition.fill(uniform);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let centers = kmeans_plus_plus(observations, self.n_states, &mut rng);
        self.means = Array1::from_vec(centers);

        let n = observations.len() as f64;
        let mean = observations.iter().sum::<f64>() / n;
        let variance = if observations.len() > 1 {
            observations.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        self.variances.fill(variance + VARIANCE_FLOOR);
    }

    fn log_emission_prob(&self, x: f64, state: usize) -> f64 {
        let var = self.variances[state];
        if var <= 0.0 || !var.is_finite() {
            return f64::NEG_INFINITY;
        }
        let diff = x - self.means[state];
        -0.5 * ((2.0 * PI * var).ln() + diff * diff / var)
    }

    /// Log emission probabilities, one row per observation.
    fn log_emissions(&self, observations: &[f64]) -> Array2<f64> {
        let mut log_b = Array2::zeros((observations.len(), self.n_states));
        for (t, &x) in observations.iter().enumerate() {
            for state in 0..self.n_states {
                log_b[[t, state]] = self.log_emission_prob(x, state);
            }
        }
        log_b
    }

    fn log_transition(&self) -> Array2<f64> {
        self.transition.mapv(f64::ln)
    }

    /// Forward pass in log space. Returns (log_alpha, log_likelihood).
    fn forward(&self, log_b: &Array2<f64>) -> (Array2<f64>, f64) {
        let n_obs = log_b.nrows();
        let log_a = self.log_transition();
        let mut log_alpha = Array2::from_elem((n_obs, self.n_states), f64::NEG_INFINITY);

        for state in 0..self.n_states {
            log_alpha[[0, state]] = self.start_prob[state].ln() + log_b[[0, state]];
        }

        let mut terms = vec![0.0; self.n_states];
        for t in 1..n_obs {
            for j in 0..self.n_states {
                for i in 0..self.n_states {
                    terms[i] = log_alpha[[t - 1, i]] + log_a[[i, j]];
                }
                log_alpha[[t, j]] = log_sum_exp(&terms) + log_b[[t, j]];
            }
        }

        let last: Vec<f64> = log_alpha.row(n_obs - 1).to_vec();
        let log_prob = log_sum_exp(&last);
        (log_alpha, log_prob)
    }

    fn backward(&self, log_b: &Array2<f64>) -> Array2<f64> {
        let n_obs = log_b.nrows();
        let log_a = self.log_transition();
        let mut log_beta = Array2::from_elem((n_obs, self.n_states), f64::NEG_INFINITY);

        for state in 0..self.n_states {
            log_beta[[n_obs - 1, state]] = 0.0;
        }

        let mut terms = vec![0.0; self.n_states];
        for t in (0..n_obs - 1).rev() {
            for i in 0..self.n_states {
                for j in 0..self.n_states {
                    terms[j] = log_a[[i, j]] + log_b[[t + 1, j]] + log_beta[[t + 1, j]];
                }
                log_beta[[t, i]] = log_sum_exp(&terms);
            }
        }

        log_beta
    }

    /// Baum-Welch EM from a fresh seeded initialization.
    ///
    /// Running out of iterations is reported in `FitReport::converged`, not as
    /// an error. A degenerate result (non-positive variance or non-finite
    /// likelihood) is a `ModelFit` error.
    pub fn fit(&mut self, observations: &[f64]) -> AnalysisResult<FitReport> {
        if self.n_states == 0 {
            return Err(AnalysisError::ModelFit("state count must be positive".to_string()));
        }
        let n_obs = observations.len();
        if n_obs == 0 || n_obs < self.n_states {
            return Err(AnalysisError::ModelFit(format!(
                "{} observations for {} states",
                n_obs, self.n_states
            )));
        }

        self.initialize(observations);

        let mut prev_log_prob = f64::NEG_INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..self.max_iter {
            let log_b = self.log_emissions(observations);
            let (log_alpha, log_prob) = self.forward(&log_b);
            if !log_prob.is_finite() {
                return Err(AnalysisError::ModelFit(format!(
                    "log-likelihood diverged at iteration {}",
                    iteration + 1
                )));
            }

            iterations = iteration + 1;
            if log_prob - prev_log_prob < self.tol {
                converged = true;
                break;
            }
            prev_log_prob = log_prob;

            let log_beta = self.backward(&log_b);
            self.reestimate(observations, &log_b, &log_alpha, &log_beta, log_prob);
        }

        let log_likelihood = self.score(observations);
        self.check_degenerate(log_likelihood)?;

        if converged {
            debug!(iterations, log_likelihood, "HMM converged");
        } else {
            warn!(
                iterations,
                log_likelihood, "HMM reached the iteration cap before converging"
            );
        }

        Ok(FitReport {
            log_likelihood,
            iterations,
            converged,
        })
    }

    fn reestimate(
        &mut self,
        observations: &[f64],
        log_b: &Array2<f64>,
        log_alpha: &Array2<f64>,
        log_beta: &Array2<f64>,
        log_prob: f64,
    ) {
        let n_obs = observations.len();
        let log_a = self.log_transition();

        let gamma = (log_alpha + log_beta).mapv(|v| (v - log_prob).exp());

        let mut xi_sum = Array2::<f64>::zeros((self.n_states, self.n_states));
        for t in 0..n_obs - 1 {
            for i in 0..self.n_states {
                for j in 0..self.n_states {
                    let log_xi = log_alpha[[t, i]]
                        + log_a[[i, j]]
                        + log_b[[t + 1, j]]
                        + log_beta[[t + 1, j]]
                        - log_prob;
                    xi_sum[[i, j]] += log_xi.exp();
                }
            }
        }

        let start_sum: f64 = gamma.row(0).sum();
        if start_sum > 0.0 {
            for state in 0..self.n_states {
                self.start_prob[state] = gamma[[0, state]] / start_sum;
            }
        }

        for i in 0..self.n_states {
            let row_sum: f64 = xi_sum.row(i).sum();
            if row_sum > 0.0 {
                for j in 0..self.n_states {
                    self.transition[[i, j]] = xi_sum[[i, j]] / row_sum;
                }
            }
        }

        for state in 0..self.n_states {
            let weights = gamma.column(state);
            let gamma_sum: f64 = weights.sum();
            // A state with no responsibility keeps its previous emission
            if gamma_sum <= f64::MIN_POSITIVE {
                continue;
            }

            let mean = weights
                .iter()
                .zip(observations)
                .map(|(w, x)| w * x)
                .sum::<f64>()
                / gamma_sum;
            let variance = weights
                .iter()
                .zip(observations)
                .map(|(w, x)| w * (x - mean).powi(2))
                .sum::<f64>()
                / gamma_sum;

            self.means[state] = mean;
            self.variances[state] = variance + VARIANCE_FLOOR;
        }
    }

    fn check_degenerate(&self, log_likelihood: f64) -> AnalysisResult<()> {
        if !log_likelihood.is_finite() {
            return Err(AnalysisError::ModelFit(
                "non-finite log-likelihood after fitting".to_string(),
            ));
        }
        for (state, var) in self.variances.iter().enumerate() {
            if !var.is_finite() || *var <= 0.0 {
                return Err(AnalysisError::ModelFit(format!(
                    "degenerate variance {} for state {}",
                    var, state
                )));
            }
        }
        if self.means.iter().any(|m| !m.is_finite()) {
            return Err(AnalysisError::ModelFit("non-finite state mean".to_string()));
        }
        Ok(())
    }

    /// Log-likelihood of the observations under the current parameters.
    pub fn score(&self, observations: &[f64]) -> f64 {
        if observations.is_empty() {
            return f64::NEG_INFINITY;
        }
        let log_b = self.log_emissions(observations);
        self.forward(&log_b).1
    }

    /// Posterior state probabilities per observation (forward-backward).
    pub fn posteriors(&self, observations: &[f64]) -> Array2<f64> {
        let log_b = self.log_emissions(observations);
        let (log_alpha, log_prob) = self.forward(&log_b);
        let log_beta = self.backward(&log_b);

        let mut gamma = (&log_alpha + &log_beta).mapv(|v| (v - log_prob).exp());
        for mut row in gamma.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            }
        }
        gamma
    }

    /// Most likely state sequence (Viterbi).
    pub fn predict(&self, observations: &[f64]) -> Vec<usize> {
        let n_obs = observations.len();
        if n_obs == 0 {
            return Vec::new();
        }

        let log_b = self.log_emissions(observations);
        let log_a = self.log_transition();
        let mut log_delta = Array2::from_elem((n_obs, self.n_states), f64::NEG_INFINITY);
        let mut psi = Array2::<usize>::zeros((n_obs, self.n_states));

        for state in 0..self.n_states {
            log_delta[[0, state]] = self.start_prob[state].ln() + log_b[[0, state]];
        }

        for t in 1..n_obs {
            for j in 0..self.n_states {
                let mut max_val = f64::NEG_INFINITY;
                let mut max_state = 0;
                for i in 0..self.n_states {
                    let val = log_delta[[t - 1, i]] + log_a[[i, j]];
                    if val > max_val {
                        max_val = val;
                        max_state = i;
                    }
                }
                log_delta[[t, j]] = max_val + log_b[[t, j]];
                psi[[t, j]] = max_state;
            }
        }

        let mut states = vec![0; n_obs];
        let mut max_val = f64::NEG_INFINITY;
        for state in 0..self.n_states {
            if log_delta[[n_obs - 1, state]] > max_val {
                max_val = log_delta[[n_obs - 1, state]];
                states[n_obs - 1] = state;
            }
        }

        for t in (0..n_obs - 1).rev() {
            states[t] = psi[[t + 1, states[t + 1]]];
        }

        states
    }
}

/// Seeded k-means++ seeding followed by Lloyd iterations on scalars.
fn kmeans_plus_plus(observations: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let n = observations.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(observations[rng.gen_range(0..n)]);

    while centers.len() < k {
        let distances: Vec<f64> = observations
            .iter()
            .map(|x| {
                centers
                    .iter()
                    .map(|c| (x - c).powi(2))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = distances.iter().sum();

        let idx = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            distances
                .iter()
                .position(|d| {
                    cumulative += d;
                    cumulative >= target
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centers.push(observations[idx]);
    }

    let mut labels = vec![usize::MAX; n];
    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (i, x) in observations.iter().enumerate() {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let dist = (x - center).powi(2);
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            if labels[i] != best {
                labels[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (x, &label) in observations.iter().zip(&labels) {
            sums[label] += x;
            counts[label] += 1;
        }
        for c in 0..k {
            if counts[c] > 0 {
                centers[c] = sums[c] / counts[c] as f64;
            }
        }
    }

    centers
}

/// Log-sum-exp trick for numerical stability
pub(crate) fn log_sum_exp(log_values: &[f64]) -> f64 {
    if log_values.is_empty() {
        return f64::NEG_INFINITY;
    }

    let max_val = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum_exp: f64 = log_values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum_exp.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::regime_switching_returns;

    #[test]
    fn test_hmm_creation() {
        let hmm = GaussianHMM::new(4, 100, 1e-4, 42);
        assert_eq!(hmm.n_states, 4);
        assert_eq!(hmm.transition.shape(), &[4, 4]);
        assert!((hmm.start_prob.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp() {
        let values = vec![-1.0, -2.0, -3.0];
        let result = log_sum_exp(&values);
        assert!(result > -1.0 && result < 0.0);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_zero_states_is_model_fit_error() {
        let returns = regime_switching_returns(&[(50, 0.01)], 5);
        let mut hmm = GaussianHMM::new(0, 100, 1e-4, 42);
        assert!(matches!(hmm.fit(&returns), Err(AnalysisError::ModelFit(_))));
    }

    #[test]
    fn test_fit_separates_volatility_states() {
        let returns = regime_switching_returns(&[(200, 0.004), (200, 0.03)], 42);
        let mut hmm = GaussianHMM::new(2, 500, 1e-4, 42);
        let report = hmm.fit(&returns).unwrap();

        assert!(report.log_likelihood.is_finite());
        let (lo, hi) = if hmm.variances[0] < hmm.variances[1] { (0, 1) } else { (1, 0) };
        assert!(hmm.variances[hi] / hmm.variances[lo] > 10.0);

        let path = hmm.predict(&returns);
        assert_eq!(path.len(), returns.len());
        assert_eq!(path[returns.len() - 1], hi);
    }

    #[test]
    fn test_posteriors_are_distributions() {
        let returns = regime_switching_returns(&[(120, 0.01), (80, 0.02)], 9);
        let mut hmm = GaussianHMM::new(3, 200, 1e-4, 42);
        hmm.fit(&returns).unwrap();

        let gamma = hmm.posteriors(&returns);
        assert_eq!(gamma.shape(), &[200, 3]);
        for row in gamma.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        for row in hmm.transition.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_too_few_observations() {
        let mut hmm = GaussianHMM::new(3, 10, 1e-4, 42);
        let err = hmm.fit(&[0.01, -0.02]).unwrap_err();
        assert_eq!(err.kind(), "ModelFitError");
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let returns = regime_switching_returns(&[(150, 0.01), (150, 0.025)], 1);
        let mut a = GaussianHMM::new(3, 500, 1e-4, 42);
        let mut b = GaussianHMM::new(3, 500, 1e-4, 42);
        a.fit(&returns).unwrap();
        b.fit(&returns).unwrap();

        assert_eq!(a.means, b.means);
        assert_eq!(a.variances, b.variances);
        assert_eq!(a.predict(&returns), b.predict(&returns));
    }
}
