use serde::{Deserialize, Serialize};
use std::fmt;

/// Directional call derived from a binary up/down prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn from_prediction(prediction: u8) -> Self {
        if prediction == 1 {
            Direction::Long
        } else {
            Direction::Short
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalizes a user-supplied ticker symbol.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_prediction() {
        assert_eq!(Direction::from_prediction(1), Direction::Long);
        assert_eq!(Direction::from_prediction(0), Direction::Short);
        assert_eq!(Direction::Long.to_string(), "LONG");
    }

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" aapl "), "AAPL");
    }
}
