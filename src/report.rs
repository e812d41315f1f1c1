//! Plain-text terminal rendering of analyses and signal history.

use std::fmt;

use crate::database::SignalRecord;
use crate::engine::Analysis;
use crate::ml::hmm::regime_label;
use crate::types::Direction;

const SPARK_CHARS: [char; 5] = ['_', '.', '-', '~', '^'];
const REPORT_WIDTH: usize = 64;
const LABEL_WIDTH: usize = 22;

/// Sparkline of the last `width` values; flat or too-short input draws dashes.
pub fn sparkline(values: &[f64], width: usize) -> String {
    if values.len() < 2 {
        return "-".repeat(width);
    }

    let tail = &values[values.len().saturating_sub(width)..];
    let min = tail.iter().copied().fold(f64::INFINITY, f64::min);
    let max = tail.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        return "-".repeat(tail.len());
    }

    let top = (SPARK_CHARS.len() - 1) as f64;
    tail.iter()
        .map(|v| {
            let idx = (((v - min) / (max - min)) * top) as usize;
            SPARK_CHARS[idx.min(SPARK_CHARS.len() - 1)]
        })
        .collect()
}

pub fn horizontal_bar(value: f64, max_value: f64, width: usize) -> String {
    if max_value <= 0.0 {
        return format!("[{}]", ".".repeat(width));
    }
    let filled = ((value / max_value) * width as f64).max(0.0) as usize;
    let filled = filled.min(width);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// Change over the last `days` closes, e.g. `^ UP (+2.31%)`.
pub fn price_trend(closes: &[f64], days: usize) -> String {
    if days == 0 || closes.len() < days {
        return "N/A".to_string();
    }

    let recent = &closes[closes.len() - days..];
    let change = (recent[days - 1] - recent[0]) / recent[0] * 100.0;
    let (arrow, direction) = if change > 1.0 {
        ("^", "UP")
    } else if change < -1.0 {
        ("v", "DOWN")
    } else {
        ("-", "FLAT")
    };
    format!("{} {} ({:+.2}%)", arrow, direction, change)
}

pub fn signal_strength(confidence: f64) -> &'static str {
    if confidence >= 0.7 {
        "STRONG"
    } else if confidence >= 0.5 {
        "MODERATE"
    } else {
        "WEAK"
    }
}

fn row(f: &mut fmt::Formatter<'_>, label: &str, value: &str) -> fmt::Result {
    writeln!(f, "  {:<width$} {}", label, value, width = LABEL_WIDTH)
}

fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "{}", title)?;
    writeln!(f, "{}", "-".repeat(REPORT_WIDTH))
}

/// Full terminal report for one analysis. `closes` feeds the sparkline and
/// trend lines.
pub struct AnalysisReport<'a> {
    pub analysis: &'a Analysis,
    pub name: &'a str,
    pub closes: &'a [f64],
    pub commentary: &'a str,
}

impl AnalysisReport<'_> {
    fn header(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(REPORT_WIDTH);
        writeln!(f, "{}", rule)?;
        writeln!(f, "  {} | {}", self.analysis.ticker, self.name)?;
        writeln!(f, "{}", rule)?;
        row(f, "Price", &format!("${:.2}", self.analysis.current_price))?;
        row(f, "As of", &self.analysis.as_of.format("%Y-%m-%d").to_string())?;
        row(f, "30d", &sparkline(self.closes, 30))?;
        row(f, "5d trend", &price_trend(self.closes, 5))?;
        row(f, "20d trend", &price_trend(self.closes, 20))
    }

    fn regime(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regime = &self.analysis.regime;
        section(f, "MARKET REGIME")?;
        row(f, "Current", &regime.label())?;
        for (i, (p, vol)) in regime
            .probabilities
            .iter()
            .zip(regime.volatilities.iter())
            .enumerate()
        {
            row(
                f,
                &regime_label(i),
                &format!(
                    "{} {:>6.1}%  vol {:>5.1}%",
                    horizontal_bar(*p, 1.0, 20),
                    p * 100.0,
                    vol * 100.0
                ),
            )?;
        }
        Ok(())
    }

    fn models(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ensemble = &self.analysis.ensemble;
        section(f, "MODEL SIGNALS")?;
        for model in &ensemble.models {
            row(
                f,
                model.name,
                &format!(
                    "{:<5} conf {:>5.1}%  acc {:>5.1}%  w {:.1}",
                    Direction::from_prediction(model.prediction).as_str(),
                    model.confidence * 100.0,
                    model.accuracy * 100.0,
                    model.weight
                ),
            )?;
        }
        row(
            f,
            "Ensemble",
            &format!(
                "{} ({}) {:.2}",
                ensemble.direction,
                signal_strength(ensemble.confidence),
                ensemble.confidence
            ),
        )?;
        row(f, "Confidence", &horizontal_bar(ensemble.confidence, 1.0, 20))?;
        row(
            f,
            "Agreement",
            if ensemble.models_agree() { "Strong" } else { "Mixed" },
        )?;
        row(
            f,
            "Win probability",
            &format!("{:.1}%", ensemble.win_probability * 100.0),
        )
    }

    fn sizing(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizing = &self.analysis.sizing;
        section(f, "POSITION SIZING")?;
        row(f, "Full Kelly", &format!("{}%", sizing.full_kelly_pct()))?;
        row(
            f,
            "Recommended",
            &format!(
                "{} {}%",
                horizontal_bar(sizing.recommended, sizing.max_position, 20),
                sizing.recommended_pct()
            ),
        )?;
        row(f, "Max position", &format!("{}%", sizing.max_position_pct()))?;
        row(f, "Regime factor", &format!("{:.2}", sizing.regime_factor))?;
        row(f, "Payoff ratio", &format!("{:.2}", sizing.payoff_ratio))
    }
}

impl fmt::Display for AnalysisReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.header(f)?;
        self.regime(f)?;
        self.models(f)?;
        self.sizing(f)?;

        section(f, "COMMENTARY")?;
        for line in self.commentary.trim().lines() {
            writeln!(f, "  {}", line)?;
        }
        writeln!(f, "{}", "=".repeat(REPORT_WIDTH))
    }
}

pub fn render(analysis: &Analysis, name: &str, closes: &[f64], commentary: &str) -> String {
    AnalysisReport {
        analysis,
        name,
        closes,
        commentary,
    }
    .to_string()
}

/// Table of stored signals, one per line.
pub struct HistoryTable<'a>(pub &'a [SignalRecord]);

impl fmt::Display for HistoryTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No signals recorded.");
        }

        writeln!(
            f,
            "{:>5}  {:<8} {:<16} {:<10} {:<6} {:>7} {:>7} {:>10}",
            "ID", "TICKER", "TIMESTAMP", "REGIME", "DIR", "CONF", "ALLOC", "PRICE"
        )?;
        for r in self.0 {
            writeln!(
                f,
                "{:>5}  {:<8} {:<16} {:<10} {:<6} {:>6.1}% {:>6.2}% {:>10.2}",
                r.id.unwrap_or_default(),
                r.ticker,
                r.timestamp.format("%Y-%m-%d %H:%M"),
                r.regime_name,
                r.ensemble_direction,
                r.signal_strength * 100.0,
                r.model_allocation * 100.0,
                r.current_price
            )?;
        }
        Ok(())
    }
}

pub fn render_history(records: &[SignalRecord]) -> String {
    HistoryTable(records).to_string()
}
