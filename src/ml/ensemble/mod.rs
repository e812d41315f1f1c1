pub mod aggregator;

pub use aggregator::{
    combine, win_probability, EnsemblePredictor, EnsembleResult, ModelSummary, BOOSTING_WEIGHT,
    LINEAR_WEIGHT,
};
