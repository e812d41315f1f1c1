pub mod gaussian_hmm;
pub mod regime_detector;

pub use gaussian_hmm::{FitReport, GaussianHMM};
pub use regime_detector::{RegimeDetector, RegimeFit, StatePermutation};

/// Canonical volatility tiers, highest volatility first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegimeState {
    HighVol = 0,
    MedVol = 1,
    LowVol = 2,
}

impl RegimeState {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RegimeState::HighVol),
            1 => Some(RegimeState::MedVol),
            2 => Some(RegimeState::LowVol),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeState::HighVol => "HIGH VOL",
            RegimeState::MedVol => "MED VOL",
            RegimeState::LowVol => "LOW VOL",
        }
    }
}

pub fn regime_name(index: usize) -> &'static str {
    RegimeState::from_index(index)
        .map(|s| s.as_str())
        .unwrap_or("UNKNOWN")
}

pub fn regime_label(index: usize) -> String {
    format!("[{}]", regime_name(index))
}
