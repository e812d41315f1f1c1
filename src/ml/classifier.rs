use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

use super::features::{FeatureMatrix, LabelSeries};
use super::split::ChronologicalSplit;
use crate::error::{AnalysisError, AnalysisResult};

/// Probability threshold above which a row is called "up".
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Held-out evaluation plus the call on the newest row
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassifierOutcome {
    pub accuracy: f64,
    pub prediction: u8,
    /// Larger of the two class probabilities, in [0.5, 1]
    pub confidence: f64,
    pub probability_up: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub elapsed_secs: f64,
}

/// A binary model that can be trained on rows and scores P(up) for one row.
pub trait ProbabilisticModel {
    fn train(&mut self, x: ArrayView2<'_, f64>, y: &[u8]) -> AnalysisResult<()>;

    fn predict_proba(&self, row: ArrayView1<'_, f64>) -> AnalysisResult<f64>;
}

/// Shared contract of the two directional models.
pub trait DirectionalClassifier: Send {
    fn name(&self) -> &'static str;

    /// Train on the chronological training slice, score the test slice and
    /// predict the newest row. Returns `(prediction, confidence)`.
    fn fit_predict(
        &mut self,
        features: &FeatureMatrix,
        labels: &LabelSeries,
        test_fraction: f64,
    ) -> AnalysisResult<(u8, f64)>;

    fn outcome(&self) -> AnalysisResult<&ClassifierOutcome>;

    fn accuracy(&self) -> AnalysisResult<f64> {
        Ok(self.outcome()?.accuracy)
    }

    fn prediction(&self) -> AnalysisResult<u8> {
        Ok(self.outcome()?.prediction)
    }

    fn confidence(&self) -> AnalysisResult<f64> {
        Ok(self.outcome()?.confidence)
    }
}

/// Map P(up) to a class and the probability of that class.
pub fn decide(probability_up: f64) -> (u8, f64) {
    let prediction = u8::from(probability_up > DECISION_THRESHOLD);
    let confidence = probability_up.max(1.0 - probability_up);
    (prediction, confidence)
}

pub fn accuracy_score(predicted: &[u8], actual: &[u8]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = predicted
        .iter()
        .zip(actual)
        .filter(|(p, a)| p == a)
        .count();
    correct as f64 / actual.len() as f64
}

/// Run the shared split/train/score/predict protocol for one model.
pub fn evaluate<M: ProbabilisticModel>(
    model: &mut M,
    name: &str,
    features: &FeatureMatrix,
    labels: &LabelSeries,
    test_fraction: f64,
) -> AnalysisResult<ClassifierOutcome> {
    if features.n_rows() != labels.len() {
        return Err(AnalysisError::InvalidSeries(format!(
            "{} feature rows but {} labels",
            features.n_rows(),
            labels.len()
        )));
    }

    let started = Instant::now();
    let split = ChronologicalSplit::new(features.n_rows(), test_fraction)?;
    split.check_classes(labels.as_slice())?;

    let train = split.train();
    model.train(features.rows(train.start, train.end), labels.slice(train.start, train.end))?;

    let test = split.test();
    let mut predicted = Vec::with_capacity(split.n_test());
    for i in test.clone() {
        let (class, _) = decide(model.predict_proba(features.row(i))?);
        predicted.push(class);
    }
    let accuracy = accuracy_score(&predicted, labels.slice(test.start, test.end));

    let probability_up = model.predict_proba(features.row(split.predict_row()))?;
    let (prediction, confidence) = decide(probability_up);

    let outcome = ClassifierOutcome {
        accuracy,
        prediction,
        confidence,
        probability_up,
        train_rows: split.n_train(),
        test_rows: split.n_test(),
        elapsed_secs: started.elapsed().as_secs_f64(),
    };

    debug!(
        model = name,
        accuracy = outcome.accuracy,
        prediction = outcome.prediction,
        confidence = outcome.confidence,
        "classifier evaluated"
    );

    Ok(outcome)
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use ndarray::Array2;

    /// Always returns the mean label seen in training.
    struct PriorModel {
        prior: Option<f64>,
    }

    impl ProbabilisticModel for PriorModel {
        fn train(&mut self, _x: ArrayView2<'_, f64>, y: &[u8]) -> AnalysisResult<()> {
            let ups = y.iter().filter(|l| **l == 1).count();
            self.prior = Some(ups as f64 / y.len() as f64);
            Ok(())
        }

        fn predict_proba(&self, _row: ArrayView1<'_, f64>) -> AnalysisResult<f64> {
            self.prior.ok_or(AnalysisError::NotFitted("prior model"))
        }
    }

    fn matrix(n: usize) -> FeatureMatrix {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let values = Array2::from_shape_fn((n, 12), |(i, j)| (i * j) as f64);
        let timestamps = (0..n).map(|i| start + Duration::days(i as i64)).collect();
        FeatureMatrix::new(values, timestamps).unwrap()
    }

    #[test]
    fn test_decide() {
        assert_eq!(decide(0.7), (1, 0.7));
        assert_eq!(decide(0.2), (0, 0.8));
        // exactly 0.5 is not "up"
        assert_eq!(decide(0.5), (0, 0.5));
    }

    #[test]
    fn test_accuracy_score() {
        assert_eq!(accuracy_score(&[1, 0, 1, 1], &[1, 1, 1, 0]), 0.5);
        assert_eq!(accuracy_score(&[], &[]), 0.0);
    }

    #[test]
    fn test_evaluate_uses_training_prior() {
        let n = 21;
        // 16 training rows: 12 up, 4 down -> prior 0.75
        let mut labels = vec![1u8; 12];
        labels.extend([0, 0, 0, 0]);
        labels.extend([1, 0, 1, 1, 0]);
        let labels = LabelSeries::new(labels);

        let mut model = PriorModel { prior: None };
        let outcome = evaluate(&mut model, "prior", &matrix(n), &labels, 0.2).unwrap();

        assert_eq!(outcome.train_rows, 16);
        assert_eq!(outcome.test_rows, 4);
        assert_eq!(outcome.prediction, 1);
        assert!((outcome.confidence - 0.75).abs() < 1e-12);
        // test labels [1, 0, 1, 1] all predicted up
        assert!((outcome.accuracy - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_rejects_misaligned_labels() {
        let mut model = PriorModel { prior: None };
        let err = evaluate(&mut model, "prior", &matrix(10), &LabelSeries::new(vec![1; 9]), 0.2)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidSeriesError");
    }

    #[test]
    fn test_evaluate_rejects_single_class() {
        let mut model = PriorModel { prior: None };
        let err = evaluate(&mut model, "prior", &matrix(10), &LabelSeries::new(vec![0; 10]), 0.2)
            .unwrap_err();
        assert_eq!(err.kind(), "ModelFitError");
    }
}
