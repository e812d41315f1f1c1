use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{info, warn};

use quantai::config::Settings;
use quantai::data::{load_history, DataError, PriceSource, YahooClient};
use quantai::database::{Database, SignalRecord, SignalSink};
use quantai::engine::Analyzer;
use quantai::logging::{self, AnalysisLog};
use quantai::narrative::{Commentary, NarrativeContext};
use quantai::types::normalize_ticker;
use quantai::{report, AnalysisError};

#[derive(Parser)]
#[command(name = "quantai")]
#[command(version)]
#[command(about = "Regime-aware directional signals and Kelly position sizing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to quantai.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signal pipeline for one or more tickers
    Analyze {
        /// Ticker symbols (e.g. AAPL MSFT SPY)
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Trading days of history to use
        #[arg(short, long)]
        days: Option<u32>,

        /// Do not store signals in the database
        #[arg(long)]
        no_save: bool,

        /// Skip AI commentary and use the automated summary
        #[arg(long)]
        no_ai: bool,
    },
    /// Show stored signals
    History {
        /// Only show this ticker
        #[arg(short, long)]
        ticker: Option<String>,

        /// Maximum rows to show
        #[arg(short, long)]
        limit: Option<u32>,
    },
}

/// Shared handles for every ticker task
struct Pipeline {
    analyzer: Analyzer,
    source: Arc<dyn PriceSource>,
    sink: Option<Arc<dyn SignalSink>>,
    commentary: Commentary,
    lookback_days: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Commands::Analyze { days: Some(days), .. } = &cli.command {
        settings.general.lookback_days = *days;
    }
    if let Err(errors) = settings.validate() {
        for e in &errors {
            eprintln!("config error: {}", e);
        }
        bail!("invalid configuration ({} errors)", errors.len());
    }

    logging::init(&settings.general.logs_dir, cli.verbose)?;
    info!("QuantAI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Analyze {
            tickers,
            no_save,
            no_ai,
            ..
        } => {
            run_analysis(settings, tickers, no_save, no_ai).await?;
        }
        Commands::History { ticker, limit } => {
            show_history(&settings, ticker.as_deref(), limit).await?;
        }
    }

    Ok(())
}

async fn run_analysis(
    settings: Settings,
    tickers: Vec<String>,
    no_save: bool,
    no_ai: bool,
) -> Result<()> {
    let sink: Option<Arc<dyn SignalSink>> = if settings.storage.enabled && !no_save {
        match Database::new(&settings.storage.database_url).await {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                warn!("Signal storage unavailable, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    let commentary = if no_ai {
        Commentary::disabled()
    } else {
        Commentary::from_settings(&settings.ai)
    };

    let pipeline = Arc::new(Pipeline {
        lookback_days: settings.general.lookback_days,
        analyzer: Analyzer::new(settings),
        source: Arc::new(YahooClient::new()?),
        sink,
        commentary,
    });

    let mut tasks = JoinSet::new();
    for (index, ticker) in tickers.iter().map(|t| normalize_ticker(t)).enumerate() {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            let outcome = analyze_ticker(&pipeline, &ticker).await;
            (index, ticker, outcome)
        });
    }

    let mut outputs = Vec::with_capacity(tickers.len());
    while let Some(joined) = tasks.join_next().await {
        let (index, ticker, outcome) = joined?;
        let text = match outcome {
            Ok(report) => report,
            Err(e) => format!("analysis unavailable for {} ({}): {}\n", ticker, failure_kind(&e), e),
        };
        outputs.push((index, text));
    }

    outputs.sort_by_key(|(index, _)| *index);
    for (_, text) in outputs {
        println!("{}", text);
    }
    Ok(())
}

async fn analyze_ticker(pipeline: &Arc<Pipeline>, ticker: &str) -> Result<String> {
    let started = Instant::now();
    let log = AnalysisLog::new(ticker);
    log.started();

    let outcome = run_pipeline(pipeline, ticker, &log).await;
    match &outcome {
        Ok(_) => log.complete(started.elapsed().as_secs_f64()),
        Err(e) => log.failed(failure_kind(e), e),
    }
    outcome
}

async fn run_pipeline(pipeline: &Arc<Pipeline>, ticker: &str, log: &AnalysisLog) -> Result<String> {
    let history = load_history(pipeline.source.as_ref(), ticker, pipeline.lookback_days, log).await?;
    let closes = history.series.closes();

    // Model fitting is CPU-bound; keep it off the async workers
    let analysis = {
        let pipeline = Arc::clone(pipeline);
        let log = log.clone();
        let ticker = history.ticker.clone();
        let series = history.series.clone();
        let price = history.current_price;
        tokio::task::spawn_blocking(move || {
            pipeline.analyzer.run(&ticker, &series, Some(price), &log)
        })
        .await??
    };

    if let Some(sink) = &pipeline.sink {
        let record = SignalRecord::from_analysis(&analysis, Utc::now());
        match sink.save_signal(&record).await {
            Ok(id) => log.signal_saved(id),
            Err(e) => log.save_failed(&e),
        }
    }

    let context = NarrativeContext::from_analysis(&analysis);
    let text = pipeline.commentary.generate(&context).await;

    Ok(report::render(&analysis, &history.name, &closes, &text))
}

fn failure_kind(err: &anyhow::Error) -> &'static str {
    if let Some(e) = err.downcast_ref::<AnalysisError>() {
        e.kind()
    } else if let Some(e) = err.downcast_ref::<DataError>() {
        e.kind()
    } else {
        "InternalError"
    }
}

async fn show_history(settings: &Settings, ticker: Option<&str>, limit: Option<u32>) -> Result<()> {
    let db = Database::new(&settings.storage.database_url)
        .await
        .map_err(|e| anyhow!("opening signal database: {}", e))?;

    let records = match ticker {
        Some(t) => db.signals_by_ticker(t, limit.unwrap_or(10)).await?,
        None => db.recent_signals(limit.unwrap_or(50)).await?,
    };

    print!("{}", report::render_history(&records));
    Ok(())
}
