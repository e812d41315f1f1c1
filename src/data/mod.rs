pub mod yahoo;

pub use yahoo::YahooClient;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::logging::AnalysisLog;
use crate::types::{normalize_ticker, PriceSeries};

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Invalid ticker: {0}")]
    InvalidInstrument(String),

    #[error("No data available for {0}")]
    NoData(String),

    #[error("price fetch failed: {0}")]
    Fetch(String),
}

impl DataError {
    pub fn kind(&self) -> &'static str {
        match self {
            DataError::InvalidInstrument(_) => "InvalidTickerError",
            DataError::NoData(_) => "NoDataError",
            DataError::Fetch(_) => "FetchError",
        }
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        DataError::Fetch(err.to_string())
    }
}

/// Price history for one instrument as returned by a price source
#[derive(Debug, Clone, Serialize)]
pub struct PriceHistory {
    pub ticker: String,
    pub name: String,
    /// Latest quoted price; the last close when the source has no live quote
    pub current_price: f64,
    pub series: PriceSeries,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Daily bars covering at most `lookback_days` trading days, oldest first.
    async fn fetch(&self, ticker: &str, lookback_days: u32) -> Result<PriceHistory, DataError>;
}

/// Fetch through `source` with ticker normalization and logging.
pub async fn load_history(
    source: &dyn PriceSource,
    ticker: &str,
    lookback_days: u32,
    log: &AnalysisLog,
) -> Result<PriceHistory, DataError> {
    let ticker = normalize_ticker(ticker);
    if ticker.is_empty() {
        return Err(DataError::InvalidInstrument(ticker));
    }

    log.fetching(lookback_days);
    let history = source.fetch(&ticker, lookback_days).await?;
    if history.series.is_empty() {
        return Err(DataError::NoData(ticker));
    }
    log.fetched(history.series.len());
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::random_walk_series;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_load_history_normalizes_ticker() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .with(eq("AAPL"), eq(120u32))
            .times(1)
            .returning(|ticker, _| {
                Ok(PriceHistory {
                    ticker: ticker.to_string(),
                    name: "Apple Inc.".to_string(),
                    current_price: 101.5,
                    series: random_walk_series(120, 3),
                })
            });

        let log = AnalysisLog::new("AAPL");
        let history = load_history(&source, " aapl ", 120, &log).await.unwrap();
        assert_eq!(history.ticker, "AAPL");
        assert_eq!(history.series.len(), 120);
    }

    #[tokio::test]
    async fn test_load_history_rejects_empty_series() {
        let mut source = MockPriceSource::new();
        source.expect_fetch().returning(|ticker, _| {
            Ok(PriceHistory {
                ticker: ticker.to_string(),
                name: ticker.to_string(),
                current_price: 0.0,
                series: PriceSeries::default(),
            })
        });

        let err = load_history(&source, "XYZ", 30, &AnalysisLog::new("XYZ"))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::NoData(_)));
        assert_eq!(err.kind(), "NoDataError");
    }

    #[tokio::test]
    async fn test_blank_ticker_never_reaches_source() {
        let mut source = MockPriceSource::new();
        source.expect_fetch().times(0);

        let err = load_history(&source, "   ", 30, &AnalysisLog::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidInstrument(_)));
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .returning(|ticker, _| Err(DataError::InvalidInstrument(ticker.to_string())));

        let err = load_history(&source, "BAD", 30, &AnalysisLog::new("BAD"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid ticker: BAD");
    }
}
