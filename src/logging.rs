use std::fmt::Display;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{error, info, info_span, warn, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE: &str = "system.log";

/// Install the process subscriber: console output on stderr plus an
/// appending plain-text log file under `logs_dir`.
pub fn init(logs_dir: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("creating log directory {}", logs_dir.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE))
        .context("opening log file")?;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;

    Ok(())
}

/// Per-analysis logging handle.
///
/// Wraps a span tagged with the ticker; everything logged through it, or
/// inside `in_scope`, carries that tag.
#[derive(Debug, Clone)]
pub struct AnalysisLog {
    ticker: String,
    span: Span,
}

impl AnalysisLog {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            span: info_span!("analysis", ticker = %ticker),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn in_scope<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.span.in_scope(f)
    }

    pub fn started(&self) {
        info!(parent: &self.span, "Analysis started for {}", self.ticker);
    }

    pub fn fetching(&self, lookback_days: u32) {
        info!(
            parent: &self.span,
            "Fetching data for {} | Lookback: {} days", self.ticker, lookback_days
        );
    }

    pub fn fetched(&self, bars: usize) {
        info!(parent: &self.span, bars, "Price history received");
    }

    pub fn inference(&self, model: &str, elapsed_secs: f64) {
        info!(
            parent: &self.span,
            "Model inference complete [{}] | Time: {:.4}s", model, elapsed_secs
        );
    }

    pub fn signal_saved(&self, id: i64) {
        info!(
            parent: &self.span,
            "Signal saved to database | Ticker: {} | ID: {}", self.ticker, id
        );
    }

    pub fn save_failed(&self, err: &dyn Display) {
        warn!(parent: &self.span, "Failed to save signal for {}: {}", self.ticker, err);
    }

    pub fn complete(&self, elapsed_secs: f64) {
        info!(
            parent: &self.span,
            "Analysis complete for {} | Total time: {:.2}s", self.ticker, elapsed_secs
        );
    }

    pub fn failed(&self, kind: &str, err: &dyn Display) {
        error!(
            parent: &self.span,
            kind, "Analysis unavailable for {}: {}", self.ticker, err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_without_subscriber() {
        let log = AnalysisLog::new("AAPL");
        assert_eq!(log.ticker(), "AAPL");
        log.started();
        log.inference("gradient_boosting", 0.0123);
        log.complete(1.5);
        assert_eq!(log.in_scope(|| 2 + 2), 4);
    }

    #[test]
    fn test_handles_are_independent() {
        let a = AnalysisLog::new("AAPL");
        let b = AnalysisLog::new("MSFT");
        assert_ne!(a.ticker(), b.ticker());
    }
}
