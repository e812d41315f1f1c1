use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::info;

use crate::engine::Analysis;
use crate::types::normalize_ticker;

/// Flat view of one analysis as stored in `trade_signals`
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct SignalRecord {
    pub id: Option<i64>,
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub regime: i64,
    pub regime_name: String,
    pub signal_strength: f64,
    pub model_allocation: f64,
    pub current_price: f64,
    pub xgb_confidence: f64,
    pub elastic_confidence: f64,
    pub ensemble_direction: String,
}

impl SignalRecord {
    pub fn from_analysis(analysis: &Analysis, timestamp: DateTime<Utc>) -> Self {
        let confidence_of = |name: &str| {
            analysis
                .ensemble
                .model(name)
                .map(|m| m.confidence)
                .unwrap_or(0.0)
        };

        Self {
            id: None,
            ticker: normalize_ticker(&analysis.ticker),
            timestamp,
            regime: analysis.regime.current_regime as i64,
            regime_name: analysis.regime.name().to_string(),
            signal_strength: analysis.ensemble.confidence,
            model_allocation: analysis.sizing.recommended,
            current_price: analysis.current_price,
            xgb_confidence: confidence_of("gradient_boosting"),
            elastic_confidence: confidence_of("elastic_net"),
            ensemble_direction: analysis.ensemble.direction.as_str().to_string(),
        }
    }
}

/// Destination for finished signals.
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Stores the record and returns its row id.
    async fn save_signal(&self, record: &SignalRecord) -> Result<i64>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database and ensure the schema exists
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_url);

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        // In-memory databases live per connection
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                regime INTEGER NOT NULL,
                regime_name TEXT NOT NULL,
                signal_strength REAL NOT NULL,
                model_allocation REAL NOT NULL,
                current_price REAL NOT NULL,
                xgb_confidence REAL NOT NULL,
                elastic_confidence REAL NOT NULL,
                ensemble_direction TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trade_signals_ticker ON trade_signals(ticker, timestamp)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent signals for one ticker, newest first
    pub async fn signals_by_ticker(&self, ticker: &str, limit: u32) -> Result<Vec<SignalRecord>> {
        let rows = sqlx::query_as::<_, SignalRecord>(
            r#"
            SELECT id, ticker, timestamp, regime, regime_name, signal_strength,
                   model_allocation, current_price, xgb_confidence,
                   elastic_confidence, ensemble_direction
            FROM trade_signals
            WHERE ticker = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(normalize_ticker(ticker))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Most recent signals across all tickers, newest first
    pub async fn recent_signals(&self, limit: u32) -> Result<Vec<SignalRecord>> {
        let rows = sqlx::query_as::<_, SignalRecord>(
            r#"
            SELECT id, ticker, timestamp, regime, regime_name, signal_strength,
                   model_allocation, current_price, xgb_confidence,
                   elastic_confidence, ensemble_direction
            FROM trade_signals
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn signal_count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_signals")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[async_trait]
impl SignalSink for Database {
    async fn save_signal(&self, record: &SignalRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_signals (
                ticker, timestamp, regime, regime_name, signal_strength,
                model_allocation, current_price, xgb_confidence,
                elastic_confidence, ensemble_direction
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(normalize_ticker(&record.ticker))
        .bind(record.timestamp)
        .bind(record.regime)
        .bind(&record.regime_name)
        .bind(record.signal_strength)
        .bind(record.model_allocation)
        .bind(record.current_price)
        .bind(record.xgb_confidence)
        .bind(record.elastic_confidence)
        .bind(&record.ensemble_direction)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(ticker: &str, day: i64) -> SignalRecord {
        SignalRecord {
            id: None,
            ticker: ticker.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap() + Duration::days(day),
            regime: 2,
            regime_name: "LOW VOL".to_string(),
            signal_strength: 0.64,
            model_allocation: 0.12,
            current_price: 180.25,
            xgb_confidence: 0.7,
            elastic_confidence: 0.55,
            ensemble_direction: "LONG".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_query_by_ticker() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        let first = db.save_signal(&record("aapl", 0)).await.unwrap();
        let second = db.save_signal(&record("AAPL", 1)).await.unwrap();
        db.save_signal(&record("MSFT", 2)).await.unwrap();
        assert!(second > first);

        let rows = db.signals_by_ticker("Aapl", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(second));
        assert!(rows.iter().all(|r| r.ticker == "AAPL"));

        let stored = &rows[1];
        assert_eq!(stored.regime_name, "LOW VOL");
        assert_eq!(stored.model_allocation, 0.12);
        assert_eq!(stored.timestamp, record("AAPL", 0).timestamp);
    }

    #[tokio::test]
    async fn test_recent_signals_newest_first_with_limit() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        for day in 0..5 {
            db.save_signal(&record("SPY", day)).await.unwrap();
        }

        let rows = db.recent_signals(3).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].timestamp > rows[1].timestamp);
        assert!(rows[1].timestamp > rows[2].timestamp);
        assert_eq!(db.signal_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_empty() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        assert!(db.signals_by_ticker("NONE", 10).await.unwrap().is_empty());
    }
}
