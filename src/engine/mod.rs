pub mod analyzer;

pub use analyzer::{payoff_profile, Analysis, Analyzer, PayoffProfile};
