use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{DataError, PriceHistory, PriceSource};
use crate::types::{Bar, PriceSeries};

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Calendar days requested per trading day wanted
const CALENDAR_PADDING: f64 = 1.5;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: Option<String>,
    long_name: Option<String>,
    short_name: Option<String>,
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

/// Daily bars from the Yahoo Finance v8 chart endpoint
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new() -> Result<Self, DataError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chart_url(&self, ticker: &str, lookback_days: u32, now: DateTime<Utc>) -> String {
        let calendar_days = (lookback_days as f64 * CALENDAR_PADDING).ceil() as i64;
        let period1 = (now - Duration::days(calendar_days)).timestamp();
        let period2 = now.timestamp();
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.base_url, ticker, period1, period2
        )
    }
}

#[async_trait]
impl PriceSource for YahooClient {
    async fn fetch(&self, ticker: &str, lookback_days: u32) -> Result<PriceHistory, DataError> {
        let url = self.chart_url(ticker, lookback_days, Utc::now());
        debug!("GET {}", url);

        let resp = self.client.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DataError::InvalidInstrument(ticker.to_string()));
        }
        if !resp.status().is_success() {
            return Err(DataError::Fetch(format!("HTTP {} for {}", resp.status(), ticker)));
        }

        let body: ChartResponse = resp.json().await?;
        parse_chart(ticker, body, lookback_days as usize)
    }
}

fn parse_chart(
    ticker: &str,
    resp: ChartResponse,
    lookback: usize,
) -> Result<PriceHistory, DataError> {
    let data = match (resp.chart.result, resp.chart.error) {
        (Some(results), _) => results
            .into_iter()
            .next()
            .ok_or_else(|| DataError::NoData(ticker.to_string()))?,
        (None, Some(err)) if err.code == "Not Found" => {
            return Err(DataError::InvalidInstrument(ticker.to_string()))
        }
        (None, Some(err)) => {
            return Err(DataError::Fetch(format!("{}: {}", err.code, err.description)))
        }
        (None, None) => return Err(DataError::NoData(ticker.to_string())),
    };

    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::NoData(ticker.to_string()))?;

    let mut bars: Vec<Bar> = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        // Holidays come back as all-null rows
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };
        let Some(timestamp) = DateTime::from_timestamp(ts, 0) else {
            continue;
        };
        if bars.last().is_some_and(|prev| timestamp <= prev.timestamp) {
            continue;
        }

        bars.push(Bar {
            timestamp,
            open: quote.open.get(i).copied().flatten().unwrap_or(close),
            high: quote.high.get(i).copied().flatten().unwrap_or(close),
            low: quote.low.get(i).copied().flatten().unwrap_or(close),
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0.0),
        });
    }

    if bars.is_empty() {
        return Err(DataError::NoData(ticker.to_string()));
    }
    if bars.len() > lookback {
        bars.drain(..bars.len() - lookback);
    }

    let last_close = bars[bars.len() - 1].close;
    let series = PriceSeries::new(bars).map_err(|e| DataError::Fetch(e.to_string()))?;

    let meta = data.meta;
    Ok(PriceHistory {
        ticker: meta.symbol.unwrap_or_else(|| ticker.to_string()),
        name: meta
            .long_name
            .or(meta.short_name)
            .unwrap_or_else(|| ticker.to_string()),
        current_price: meta.regular_market_price.unwrap_or(last_close),
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn chart(json: &str) -> ChartResponse {
        serde_json::from_str(json).unwrap()
    }

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL", "longName": "Apple Inc.", "regularMarketPrice": 190.5},
                "timestamp": [1704205800, 1704292200, 1704378600, 1704465000],
                "indicators": {"quote": [{
                    "open":   [185.0, null, 182.0, 181.0],
                    "high":   [186.0, null, 183.5, 182.5],
                    "low":    [184.0, null, 181.0, 180.0],
                    "close":  [185.5, null, 183.0, 181.5],
                    "volume": [50000000, null, 48000000, 47000000]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_skips_null_rows() {
        let history = parse_chart("AAPL", chart(SAMPLE), 252).unwrap();
        assert_eq!(history.series.len(), 3);
        assert_eq!(history.name, "Apple Inc.");
        assert_eq!(history.current_price, 190.5);
        assert_eq!(history.series.closes(), vec![185.5, 183.0, 181.5]);
    }

    #[test]
    fn test_parse_keeps_most_recent_bars() {
        let history = parse_chart("AAPL", chart(SAMPLE), 2).unwrap();
        assert_eq!(history.series.closes(), vec![183.0, 181.5]);
    }

    #[test]
    fn test_not_found_is_invalid_instrument() {
        let body = r#"{"chart": {"result": null,
            "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse_chart("NOPE", chart(body), 252).unwrap_err();
        assert!(matches!(err, DataError::InvalidInstrument(_)));
    }

    #[test]
    fn test_empty_quotes_are_no_data() {
        let body = r#"{"chart": {"result": [{
            "meta": {"symbol": "XYZ"},
            "indicators": {"quote": [{"open": [], "high": [], "low": [], "close": [], "volume": []}]}
        }], "error": null}}"#;
        let err = parse_chart("XYZ", chart(body), 252).unwrap_err();
        assert!(matches!(err, DataError::NoData(_)));
    }

    #[test]
    fn test_missing_market_price_uses_last_close() {
        let body = SAMPLE.replace(r#", "regularMarketPrice": 190.5"#, "");
        let history = parse_chart("AAPL", chart(&body), 252).unwrap();
        assert_eq!(history.current_price, 181.5);
    }

    #[test]
    fn test_chart_url_pads_calendar_days() {
        let client = YahooClient::with_base_url("http://localhost:9/").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let url = client.chart_url("MSFT", 100, now);

        let expected_start = (now - Duration::days(150)).timestamp();
        assert!(url.starts_with("http://localhost:9/v8/finance/chart/MSFT?"));
        assert!(url.contains(&format!("period1={}", expected_start)));
        assert!(url.ends_with("interval=1d"));
    }
}
