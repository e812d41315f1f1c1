use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::ops::Range;

use crate::error::{AnalysisError, AnalysisResult};

/// Positional train/test split that holds out the newest row for prediction.
///
/// With `n` rows, row `n - 1` is the prediction target. Of the `n - 1` rows
/// before it, the trailing `ceil((n - 1) * test_fraction)` are the test slice
/// and everything earlier trains. Rows are never shuffled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChronologicalSplit {
    train_end: usize,
    test_end: usize,
}

impl ChronologicalSplit {
    pub fn new(n_rows: usize, test_fraction: f64) -> AnalysisResult<Self> {
        if n_rows == 0 {
            return Err(AnalysisError::InsufficientData(
                "feature matrix is empty".to_string(),
            ));
        }

        let labelled = n_rows - 1;
        let n_test = (labelled as f64 * test_fraction).ceil() as usize;
        let n_test = n_test.min(labelled);
        let n_train = labelled - n_test;

        if n_train < 2 {
            return Err(AnalysisError::ModelFit(format!(
                "{} training rows after holding out {} test rows",
                n_train, n_test
            )));
        }

        Ok(Self {
            train_end: n_train,
            test_end: labelled,
        })
    }

    pub fn train(&self) -> Range<usize> {
        0..self.train_end
    }

    pub fn test(&self) -> Range<usize> {
        self.train_end..self.test_end
    }

    pub fn predict_row(&self) -> usize {
        self.test_end
    }

    pub fn n_train(&self) -> usize {
        self.train_end
    }

    pub fn n_test(&self) -> usize {
        self.test_end - self.train_end
    }

    /// Both classes must appear in the training slice.
    pub fn check_classes(&self, labels: &[u8]) -> AnalysisResult<()> {
        let train = &labels[self.train()];
        let ups = train.iter().filter(|l| **l == 1).count();
        if ups == 0 || ups == train.len() {
            return Err(AnalysisError::ModelFit(format!(
                "training slice of {} rows contains a single class",
                train.len()
            )));
        }
        Ok(())
    }
}

/// Seeded random split of `0..n` into (fit, validation) index sets.
///
/// The validation set holds `ceil(n * fraction)` indices; both sets come back
/// in ascending order. Returns an empty validation set when `fraction` is 0.
pub fn validation_split(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let n_val = ((n as f64 * fraction).ceil() as usize).min(n);
    if n_val == 0 {
        return ((0..n).collect(), Vec::new());
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut validation = indices[..n_val].to_vec();
    let mut fit = indices[n_val..].to_vec();
    validation.sort_unstable();
    fit.sort_unstable();
    (fit, validation)
}
