pub mod config;
pub mod data;
pub mod database;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod logging;
pub mod ml;
pub mod narrative;
pub mod report;
pub mod risk;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AnalysisError, AnalysisResult};
