use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::classifier::{
    accuracy_score, decide, evaluate, sigmoid, ClassifierOutcome, DirectionalClassifier,
    ProbabilisticModel,
};
use super::features::{FeatureMatrix, LabelSeries};
use super::split::validation_split;
use crate::config::LinearSettings;
use crate::error::{AnalysisError, AnalysisResult};

/// Z-score scaling with statistics taken from the rows it was fit on.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Population standard deviation; constant columns get scale 1.
    pub fn fit(x: ArrayView2<'_, f64>) -> AnalysisResult<Self> {
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| AnalysisError::ModelFit("cannot scale an empty matrix".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        (&x - &self.mean) / &self.scale
    }

    pub fn transform_row(&self, row: ArrayView1<'_, f64>) -> Array1<f64> {
        (&row - &self.mean) / &self.scale
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

/// Linear weights fitted by SGD
#[derive(Debug, Clone)]
struct LinearWeights {
    coef: Array1<f64>,
    intercept: f64,
}

impl LinearWeights {
    fn decision(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.coef.dot(&row) + self.intercept
    }
}

/// Logistic regression with an elastic-net penalty fitted by SGD.
///
/// Features are standardized with statistics from the training slice only.
/// Uses the inverse-scaling "optimal" learning rate and cumulative L1
/// truncation, with early stopping on the accuracy of a seeded validation
/// slice.
pub struct ElasticNetClassifier {
    settings: LinearSettings,
    scaler: Option<StandardScaler>,
    weights: Option<LinearWeights>,
    epochs_run: usize,
    outcome: Option<ClassifierOutcome>,
}

impl ElasticNetClassifier {
    pub fn new(settings: LinearSettings) -> Self {
        Self {
            settings,
            scaler: None,
            weights: None,
            epochs_run: 0,
            outcome: None,
        }
    }

    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref().map(|w| &w.coef)
    }

    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }
}

/// Derivative of log(1 + exp(-y p)) with respect to p, for y in {-1, 1}.
fn dloss(p: f64, y: f64) -> f64 {
    let z = p * y;
    if z > 18.0 {
        -y * (-z).exp()
    } else if z < -18.0 {
        -y
    } else {
        -y / (z.exp() + 1.0)
    }
}

fn log_loss(p: f64, y: f64) -> f64 {
    let z = p * y;
    if z > 18.0 {
        (-z).exp()
    } else if z < -18.0 {
        -z
    } else {
        (1.0 + (-z).exp()).ln()
    }
}

struct SgdState {
    weights: LinearWeights,
    /// Total L1 penalty that could have been applied so far
    u: f64,
    /// L1 penalty actually applied per coefficient
    q: Array1<f64>,
    t: f64,
    optimal_init: f64,
}

impl SgdState {
    fn new(n_features: usize, alpha: f64) -> Self {
        let typw = (1.0 / alpha.sqrt()).sqrt();
        let eta0 = typw / dloss(-typw, 1.0).abs().max(1.0);
        Self {
            weights: LinearWeights {
                coef: Array1::zeros(n_features),
                intercept: 0.0,
            },
            u: 0.0,
            q: Array1::zeros(n_features),
            t: 1.0,
            optimal_init: 1.0 / (eta0 * alpha),
        }
    }

    /// One stochastic step; returns the sample loss before the update.
    fn step(&mut self, row: ArrayView1<'_, f64>, y: f64, settings: &LinearSettings) -> f64 {
        let alpha = settings.alpha;
        let eta = 1.0 / (alpha * (self.optimal_init + self.t - 1.0));

        let p = self.weights.decision(row);
        let loss = log_loss(p, y);
        let update = -eta * dloss(p, y);

        let l2_shrink = 1.0 - (1.0 - settings.l1_ratio) * eta * alpha;
        self.weights.coef *= l2_shrink.max(1e-9);
        self.weights.coef.scaled_add(update, &row);
        self.weights.intercept += update;

        if settings.l1_ratio > 0.0 {
            self.u += settings.l1_ratio * eta * alpha;
            self.truncate_l1();
        }

        self.t += 1.0;
        loss
    }

    fn truncate_l1(&mut self) {
        for (w, q) in self.weights.coef.iter_mut().zip(self.q.iter_mut()) {
            let before = *w;
            if *w > 0.0 {
                *w = (*w - (self.u + *q)).max(0.0);
            } else if *w < 0.0 {
                *w = (*w + (self.u - *q)).min(0.0);
            }
            *q += *w - before;
        }
    }
}

fn signed_labels(y: &[u8]) -> Vec<f64> {
    y.iter().map(|l| if *l == 1 { 1.0 } else { -1.0 }).collect()
}

impl ProbabilisticModel for ElasticNetClassifier {
    fn train(&mut self, x: ArrayView2<'_, f64>, y: &[u8]) -> AnalysisResult<()> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(AnalysisError::ModelFit(format!(
                "{} rows with {} labels",
                n,
                y.len()
            )));
        }

        let scaler = StandardScaler::fit(x)?;
        let scaled = scaler.transform(x);

        let (mut fit_idx, mut val_idx) =
            validation_split(n, self.settings.validation_fraction, self.settings.seed);
        if val_idx.is_empty() || fit_idx.len() < 2 {
            fit_idx = (0..n).collect();
            val_idx.clear();
        }
        let early_stopping = !val_idx.is_empty();

        let targets = signed_labels(y);
        let val_labels: Vec<u8> = val_idx.iter().map(|&i| y[i]).collect();

        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let mut order = fit_idx.clone();
        let mut state = SgdState::new(x.ncols(), self.settings.alpha);

        let mut best_score = f64::NEG_INFINITY;
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        let mut epochs = 0;

        for epoch in 0..self.settings.max_epochs {
            order.shuffle(&mut rng);
            let mut sum_loss = 0.0;
            for &i in &order {
                sum_loss += state.step(scaled.row(i), targets[i], &self.settings);
            }
            epochs = epoch + 1;

            let improved = if early_stopping {
                let predicted: Vec<u8> = val_idx
                    .iter()
                    .map(|&i| decide(sigmoid(state.weights.decision(scaled.row(i)))).0)
                    .collect();
                let score = accuracy_score(&predicted, &val_labels);
                let improved = score >= best_score + self.settings.tol;
                best_score = best_score.max(score);
                improved
            } else {
                let improved = sum_loss <= best_loss - self.settings.tol * order.len() as f64;
                best_loss = best_loss.min(sum_loss);
                improved
            };

            if improved {
                no_improvement = 0;
            } else {
                no_improvement += 1;
            }
            if no_improvement >= self.settings.n_iter_no_change {
                break;
            }
        }

        debug!(epochs, early_stopping, "sgd training finished");

        self.epochs_run = epochs;
        self.scaler = Some(scaler);
        self.weights = Some(state.weights);
        Ok(())
    }

    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> AnalysisResult<f64> {
        let (Some(scaler), Some(weights)) = (&self.scaler, &self.weights) else {
            return Err(AnalysisError::NotFitted("elastic-net model"));
        };
        let scaled = scaler.transform_row(row);
        Ok(sigmoid(weights.decision(scaled.view())))
    }
}

impl DirectionalClassifier for ElasticNetClassifier {
    fn name(&self) -> &'static str {
        "elastic_net"
    }

    fn fit_predict(
        &mut self,
        features: &FeatureMatrix,
        labels: &LabelSeries,
        test_fraction: f64,
    ) -> AnalysisResult<(u8, f64)> {
        let name = self.name();
        let outcome = evaluate(self, name, features, labels, test_fraction)?;
        self.outcome = Some(outcome);
        Ok((outcome.prediction, outcome.confidence))
    }

    fn outcome(&self) -> AnalysisResult<&ClassifierOutcome> {
        self.outcome
            .as_ref()
            .ok_or(AnalysisError::NotFitted("elastic-net result"))
    }
}
