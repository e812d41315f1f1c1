use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use std::cmp::Ordering;
use tracing::debug;

use super::classifier::{evaluate, sigmoid, ClassifierOutcome, DirectionalClassifier, ProbabilisticModel};
use super::features::{FeatureMatrix, LabelSeries};
use super::split::validation_split;
use crate::config::BoostingSettings;
use crate::error::{AnalysisError, AnalysisResult};

/// Smallest hessian sum allowed on either side of a split.
const MIN_HESSIAN_TO_SPLIT: f64 = 1e-3;
const PROB_EPS: f64 = 1e-15;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
        match self {
            Node::Leaf { value } => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Grows one regression tree on gradient/hessian statistics.
struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    gradients: &'a [f64],
    hessians: &'a [f64],
    settings: &'a BoostingSettings,
}

impl<'a> TreeBuilder<'a> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        let denom = (h + self.settings.l2_regularization).max(MIN_HESSIAN_TO_SPLIT);
        -g / denom * self.settings.learning_rate
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.settings.l2_regularization).max(f64::MIN_POSITIVE)
    }

    fn build(&self, indices: Vec<usize>, depth: usize) -> Node {
        let g: f64 = indices.iter().map(|&i| self.gradients[i]).sum();
        let h: f64 = indices.iter().map(|&i| self.hessians[i]).sum();

        if depth >= self.settings.max_depth || indices.len() < 2 * self.settings.min_samples_leaf {
            return Node::Leaf {
                value: self.leaf_value(g, h),
            };
        }

        let Some(best) = self.best_split(&indices, g, h) else {
            return Node::Leaf {
                value: self.leaf_value(g, h),
            };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x[[i, best.feature]] <= best.threshold);

        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(self.build(left, depth + 1)),
            right: Box::new(self.build(right, depth + 1)),
        }
    }

    fn best_split(&self, indices: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let n = indices.len();
        if n < 2 {
            return None;
        }
        let min_leaf = self.settings.min_samples_leaf.max(1);
        let parent = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;

        let mut sorted = indices.to_vec();
        for feature in 0..self.x.ncols() {
            sorted.sort_by(|a, b| {
                self.x[[*a, feature]]
                    .partial_cmp(&self.x[[*b, feature]])
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(b))
            });

            let mut gl = 0.0;
            let mut hl = 0.0;
            for pos in 0..n - 1 {
                let i = sorted[pos];
                gl += self.gradients[i];
                hl += self.hessians[i];

                let here = self.x[[i, feature]];
                let next = self.x[[sorted[pos + 1], feature]];
                if here == next {
                    continue;
                }

                let n_left = pos + 1;
                if n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }

                let hr = h - hl;
                if hl < MIN_HESSIAN_TO_SPLIT || hr < MIN_HESSIAN_TO_SPLIT {
                    continue;
                }

                let gain = self.score(gl, hl) + self.score(g - gl, hr) - parent;
                let improves = match &best {
                    Some(b) => gain > b.gain,
                    None => gain > 1e-12,
                };
                if improves {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

fn select_rows(x: ArrayView2<'_, f64>, y: &[u8], indices: &[usize]) -> (Array2<f64>, Vec<u8>) {
    if indices.is_empty() {
        return (Array2::zeros((0, x.ncols())), Vec::new());
    }
    let rows = x.select(Axis(0), indices);
    let labels = indices.iter().map(|&i| y[i]).collect();
    (rows, labels)
}

fn log_loss(raw: &[f64], labels: &[u8]) -> f64 {
    let total: f64 = raw
        .iter()
        .zip(labels)
        .map(|(z, y)| {
            let p = sigmoid(*z).clamp(PROB_EPS, 1.0 - PROB_EPS);
            if *y == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / labels.len().max(1) as f64
}

/// Gradient-boosted depth-bounded trees on binary log-loss.
///
/// Starts from the log-odds of the training prior and adds one Newton-step
/// regression tree per iteration. A seeded slice of the training rows is held
/// back for early stopping on validation loss.
pub struct GradientBoostingClassifier {
    settings: BoostingSettings,
    baseline: f64,
    trees: Vec<Node>,
    fitted: bool,
    outcome: Option<ClassifierOutcome>,
}

impl GradientBoostingClassifier {
    pub fn new(settings: BoostingSettings) -> Self {
        Self {
            settings,
            baseline: 0.0,
            trees: Vec::new(),
            fitted: false,
            outcome: None,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }

    fn raw_score(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.baseline + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

impl ProbabilisticModel for GradientBoostingClassifier {
    fn train(&mut self, x: ArrayView2<'_, f64>, y: &[u8]) -> AnalysisResult<()> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(AnalysisError::ModelFit(format!(
                "{} rows with {} labels",
                n,
                y.len()
            )));
        }

        let (mut fit_idx, mut val_idx) =
            validation_split(n, self.settings.validation_fraction, self.settings.seed);
        if val_idx.len() < 2 || fit_idx.len() < 2 {
            fit_idx = (0..n).collect();
            val_idx.clear();
        }

        let (fit_x, fit_y) = select_rows(x, y, &fit_idx);
        let (val_x, val_y) = select_rows(x, y, &val_idx);

        let prior = fit_y.iter().filter(|l| **l == 1).count() as f64 / fit_y.len() as f64;
        let prior = prior.clamp(1e-6, 1.0 - 1e-6);
        self.baseline = (prior / (1.0 - prior)).ln();
        self.trees.clear();

        let mut raw_fit = vec![self.baseline; fit_y.len()];
        let mut raw_val = vec![self.baseline; val_y.len()];
        let mut gradients = vec![0.0; fit_y.len()];
        let mut hessians = vec![0.0; fit_y.len()];

        let mut best_loss = if val_y.is_empty() {
            f64::INFINITY
        } else {
            log_loss(&raw_val, &val_y)
        };
        let mut stale = 0;

        for iteration in 0..self.settings.max_iter {
            for i in 0..fit_y.len() {
                let p = sigmoid(raw_fit[i]);
                gradients[i] = p - f64::from(fit_y[i]);
                hessians[i] = p * (1.0 - p);
            }

            let builder = TreeBuilder {
                x: fit_x.view(),
                gradients: &gradients,
                hessians: &hessians,
                settings: &self.settings,
            };
            let tree = builder.build((0..fit_y.len()).collect(), 0);

            for (i, row) in fit_x.rows().into_iter().enumerate() {
                raw_fit[i] += tree.predict(row);
            }
            for (i, row) in val_x.rows().into_iter().enumerate() {
                raw_val[i] += tree.predict(row);
            }
            self.trees.push(tree);

            if val_y.is_empty() {
                continue;
            }

            let loss = log_loss(&raw_val, &val_y);
            if loss < best_loss - self.settings.tol {
                best_loss = loss;
                stale = 0;
            } else {
                stale += 1;
            }

            if stale >= self.settings.n_iter_no_change {
                debug!(
                    iterations = iteration + 1,
                    validation_loss = loss,
                    "boosting stopped early"
                );
                break;
            }
        }

        self.fitted = true;
        Ok(())
    }

    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> AnalysisResult<f64> {
        if !self.fitted {
            return Err(AnalysisError::NotFitted("gradient boosting model"));
        }
        Ok(sigmoid(self.raw_score(row)))
    }
}

impl DirectionalClassifier for GradientBoostingClassifier {
    fn name(&self) -> &'static str {
        "gradient_boosting"
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
            .ok_or(AnalysisError::NotFitted("gradient boosting result"))
    }
}
