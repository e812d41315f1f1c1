use thiserror::Error;

/// Failure kinds of the numerical pipeline.
///
/// None of these are retried internally; they propagate to the caller, which
/// decides whether to skip the instrument or abort.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("model fit failed: {0}")]
    ModelFit(String),

    #[error("{0} accessed before it was computed")]
    NotFitted(&'static str),

    #[error("invalid price series: {0}")]
    InvalidSeries(String),
}

impl AnalysisError {
    /// Short stable name of the error kind, used in user-facing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InsufficientData(_) => "InsufficientDataError",
            AnalysisError::ModelFit(_) => "ModelFitError",
            AnalysisError::NotFitted(_) => "NotFittedError",
            AnalysisError::InvalidSeries(_) => "InvalidSeriesError",
        }
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
