use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

/// One daily OHLCV observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Time-ordered bar history for one instrument.
///
/// Timestamps are strictly increasing; the constructor rejects anything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    bars: Vec<Bar>,
}

impl PriceSeries {
    pub fn new(bars: Vec<Bar>) -> AnalysisResult<Self> {
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(AnalysisError::InvalidSeries(format!(
                    "timestamps not strictly increasing at {}",
                    pair[1].timestamp
                )));
            }
        }
        Ok(Self { bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    /// Simple period-over-period returns. Element `i` is the return from bar
    /// `i - 1` to bar `i`; the first element is `None`.
    pub fn returns(&self) -> Vec<Option<f64>> {
        let mut out = Vec::with_capacity(self.bars.len());
        out.push(None);
        for pair in self.bars.windows(2) {
            let prev = pair[0].close;
            out.push(if prev != 0.0 {
                Some(pair[1].close / prev - 1.0)
            } else {
                None
            });
        }
        out.truncate(self.bars.len());
        out
    }

    /// Returns with the undefined entries removed.
    pub fn clean_returns(&self) -> Vec<f64> {
        self.returns()
            .into_iter()
            .flatten()
            .filter(|r| r.is_finite())
            .collect()
    }
}
