pub mod features;
pub mod split;
pub mod classifier;
pub mod boosting;
pub mod linear;
pub mod hmm;
pub mod ensemble;

pub use features::{FeatureEngineer, FeatureMatrix, LabelSeries};
pub use classifier::{ClassifierOutcome, DirectionalClassifier};
pub use boosting::GradientBoostingClassifier;
pub use linear::ElasticNetClassifier;
pub use hmm::{RegimeDetector, RegimeFit, RegimeState};
pub use ensemble::{EnsemblePredictor, EnsembleResult};
