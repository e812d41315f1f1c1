use serde::Serialize;
use tracing::debug;

use crate::config::{BoostingSettings, LinearSettings};
use crate::error::{AnalysisError, AnalysisResult};
use crate::ml::boosting::GradientBoostingClassifier;
use crate::ml::classifier::{ClassifierOutcome, DirectionalClassifier};
use crate::ml::features::{FeatureMatrix, LabelSeries};
use crate::ml::linear::ElasticNetClassifier;
use crate::types::Direction;

pub const BOOSTING_WEIGHT: f64 = 0.6;
pub const LINEAR_WEIGHT: f64 = 0.4;

/// Flat bias added to the raw win estimate before clamping.
pub const WIN_PROBABILITY_BIAS: f64 = 0.10;
pub const WIN_PROBABILITY_FLOOR: f64 = 0.30;
pub const WIN_PROBABILITY_CEILING: f64 = 0.70;

/// Per-model view reported alongside the blend
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: &'static str,
    pub weight: f64,
    pub prediction: u8,
    pub confidence: f64,
    pub accuracy: f64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnsembleResult {
    pub prediction: u8,
    pub direction: Direction,
    pub weighted_score: f64,
    pub confidence: f64,
    pub avg_accuracy: f64,
    pub win_probability: f64,
    pub models: Vec<ModelSummary>,
}

impl EnsembleResult {
    pub fn model(&self, name: &str) -> Option<&ModelSummary> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Both models agree on the direction.
    pub fn models_agree(&self) -> bool {
        self.models.windows(2).all(|w| w[0].prediction == w[1].prediction)
    }
}

/// Classifier with its fixed ensemble weight
struct WeightedModel {
    model: Box<dyn DirectionalClassifier>,
    weight: f64,
}

impl WeightedModel {
    fn summary(&self) -> AnalysisResult<ModelSummary> {
        let outcome: &ClassifierOutcome = self.model.outcome()?;
        Ok(ModelSummary {
            name: self.model.name(),
            weight: self.weight,
            prediction: outcome.prediction,
            confidence: outcome.confidence,
            accuracy: outcome.accuracy,
            elapsed_secs: outcome.elapsed_secs,
        })
    }
}

/// Raw win estimate from the blended call, then bias and clamp.
pub fn win_probability(prediction: u8, confidence: f64, avg_accuracy: f64) -> f64 {
    let raw = if prediction == 1 {
        confidence * avg_accuracy
    } else {
        (1.0 - confidence) * avg_accuracy
    };
    (raw + WIN_PROBABILITY_BIAS).clamp(WIN_PROBABILITY_FLOOR, WIN_PROBABILITY_CEILING)
}

/// Blend per-model summaries with their weights.
pub fn combine(models: Vec<ModelSummary>) -> EnsembleResult {
    let weighted_score: f64 = models.iter().map(|m| m.weight * f64::from(m.prediction)).sum();
    let confidence: f64 = models.iter().map(|m| m.weight * m.confidence).sum();
    let avg_accuracy: f64 = models.iter().map(|m| m.weight * m.accuracy).sum();

    let prediction = u8::from(weighted_score >= 0.5);

    EnsembleResult {
        prediction,
        direction: Direction::from_prediction(prediction),
        weighted_score,
        confidence,
        avg_accuracy,
        win_probability: win_probability(prediction, confidence, avg_accuracy),
        models,
    }
}

/// Runs the boosted-tree and elastic-net classifiers and blends them 0.6/0.4
pub struct EnsemblePredictor {
    models: Vec<WeightedModel>,
    test_fraction: f64,
    result: Option<EnsembleResult>,
}

impl EnsemblePredictor {
    pub fn new(boosting: BoostingSettings, linear: LinearSettings, test_fraction: f64) -> Self {
        Self::with_models(
            Box::new(GradientBoostingClassifier::new(boosting)),
            Box::new(ElasticNetClassifier::new(linear)),
            test_fraction,
        )
    }

    pub fn with_models(
        boosting: Box<dyn DirectionalClassifier>,
        linear: Box<dyn DirectionalClassifier>,
        test_fraction: f64,
    ) -> Self {
        Self {
            models: vec![
                WeightedModel {
                    model: boosting,
                    weight: BOOSTING_WEIGHT,
                },
                WeightedModel {
                    model: linear,
                    weight: LINEAR_WEIGHT,
                },
            ],
            test_fraction,
            result: None,
        }
    }

    /// Fit both classifiers and blend. Classifier errors propagate unchanged.
    pub fn fit_predict(
        &mut self,
        features: &FeatureMatrix,
        labels: &LabelSeries,
    ) -> AnalysisResult<EnsembleResult> {
        let mut summaries = Vec::with_capacity(self.models.len());
        for wm in &mut self.models {
            wm.model.fit_predict(features, labels, self.test_fraction)?;
            summaries.push(wm.summary()?);
        }

        let result = combine(summaries);
        debug!(
            prediction = result.prediction,
            confidence = result.confidence,
            win_probability = result.win_probability,
            "ensemble combined"
        );

        self.result = Some(result.clone());
        Ok(result)
    }

    pub fn result(&self) -> AnalysisResult<&EnsembleResult> {
        self.result.as_ref().ok_or(AnalysisError::NotFitted("ensemble result"))
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}
