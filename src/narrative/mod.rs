pub mod groq;

pub use groq::GroqClient;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AiSettings;
use crate::engine::Analysis;
use crate::ml::ensemble::ModelSummary;
use crate::types::Direction;

pub const SYSTEM_PROMPT: &str = "You are a professional quantitative analyst providing concise \
market commentary. Be direct, insightful, and focus on actionable insights. Keep responses under \
200 words. Do not use emojis.";

#[derive(Debug, Clone, Serialize)]
pub struct ModelView {
    pub name: String,
    pub prediction: u8,
    pub direction: Direction,
    pub confidence_pct: f64,
}

impl From<&ModelSummary> for ModelView {
    fn from(m: &ModelSummary) -> Self {
        Self {
            name: m.name.to_string(),
            prediction: m.prediction,
            direction: Direction::from_prediction(m.prediction),
            confidence_pct: pct(m.confidence),
        }
    }
}

/// Plain summaries of one analysis handed to a narrative generator
#[derive(Debug, Clone, Serialize)]
pub struct NarrativeContext {
    pub ticker: String,
    pub current_price: f64,
    pub regime: usize,
    pub regime_name: String,
    pub regime_probabilities: Vec<f64>,
    pub models: Vec<ModelView>,
    pub direction: Direction,
    pub confidence_pct: f64,
    pub models_agree: bool,
    pub recommended_pct: f64,
    pub full_kelly_pct: f64,
}

impl NarrativeContext {
    pub fn from_analysis(analysis: &Analysis) -> Self {
        Self {
            ticker: analysis.ticker.clone(),
            current_price: analysis.current_price,
            regime: analysis.regime.current_regime,
            regime_name: analysis.regime.name().to_string(),
            regime_probabilities: analysis
                .regime
                .probabilities
                .iter()
                .map(|p| (p * 1000.0).round() / 1000.0)
                .collect(),
            models: analysis.ensemble.models.iter().map(ModelView::from).collect(),
            direction: analysis.ensemble.direction,
            confidence_pct: pct(analysis.ensemble.confidence),
            models_agree: analysis.ensemble.models_agree(),
            recommended_pct: analysis.sizing.recommended_pct(),
            full_kelly_pct: analysis.sizing.full_kelly_pct(),
        }
    }

    pub fn prompt(&self) -> String {
        let mut models = String::new();
        for m in &self.models {
            models.push_str(&format!(
                "- {}: {} (Confidence: {}%)\n",
                m.name, m.direction, m.confidence_pct
            ));
        }

        format!(
            "Analyze the following quantitative signals for {ticker} (Current Price: ${price:.2}):\n\n\
             MARKET REGIME:\n\
             - Current State: {regime_name} ({regime})\n\
             - Regime Probabilities: {probs:?}\n\n\
             MODEL PREDICTIONS:\n\
             {models}\
             - Ensemble Direction: {direction}\n\n\
             POSITION SIZING:\n\
             - Recommended Position: {recommended}% of portfolio\n\
             - Full Kelly: {kelly}%\n\n\
             Provide a brief, professional analysis covering:\n\
             1. What the regime detection suggests about current market conditions\n\
             2. Key takeaways from the model predictions\n\
             3. Risk considerations and recommended approach\n\n\
             Do not use emojis. Be concise and professional.\n",
            ticker = self.ticker,
            price = self.current_price,
            regime_name = self.regime_name,
            regime = self.regime,
            probs = self.regime_probabilities,
            models = models,
            direction = self.direction,
            recommended = self.recommended_pct,
            kelly = self.full_kelly_pct,
        )
    }

    /// Deterministic commentary used when no generator is available.
    pub fn fallback(&self) -> String {
        let insight = match self.regime {
            0 => "high volatility environment suggests elevated risk",
            1 => "moderate volatility indicates a transitional market phase",
            2 => "low volatility environment supports trend continuation",
            _ => "current conditions require careful monitoring",
        };
        let agreement = if self.models_agree { "Strong" } else { "Mixed" };

        format!(
            "AUTOMATED ANALYSIS SUMMARY: {ticker}\n\n\
             The market regime detection indicates a {regime} state, which suggests that the {insight}.\n\n\
             The ensemble of ML models (gradient boosting + elastic net) shows a {direction} bias with \
             {confidence}% confidence. The recommended position size of {recommended}% reflects both \
             model confidence and current regime adjustments.\n\n\
             KEY CONSIDERATIONS:\n\
             - Regime-adjusted sizing provides risk management\n\
             - Model agreement: {agreement} consensus between models\n\
             - Always use stop-losses and proper risk management\n\n\
             Note: This is an automated analysis. Consider additional fundamental and macro factors \
             before trading.\n",
            ticker = self.ticker,
            regime = self.regime_name.to_lowercase(),
            insight = insight,
            direction = self.direction.as_str().to_lowercase(),
            confidence = self.confidence_pct,
            recommended = self.recommended_pct,
            agreement = agreement,
        )
    }
}

fn pct(value: f64) -> f64 {
    (value * 1000.0).round() / 10.0
}

/// Source of free-text commentary for an analysis
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, context: &NarrativeContext) -> anyhow::Result<String>;
}

/// Commentary front end: the configured generator, else the fallback text.
///
/// `generate` never fails; generator errors are logged and replaced.
pub struct Commentary {
    generator: Option<Box<dyn NarrativeGenerator>>,
}

impl Commentary {
    pub fn new(generator: Option<Box<dyn NarrativeGenerator>>) -> Self {
        Self { generator }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn from_settings(settings: &AiSettings) -> Self {
        if !settings.enabled {
            return Self::disabled();
        }
        match GroqClient::from_settings(settings) {
            Ok(Some(client)) => Self::new(Some(Box::new(client))),
            Ok(None) => {
                debug!("No Groq API key configured, using automated commentary");
                Self::disabled()
            }
            Err(e) => {
                warn!("Groq client unavailable: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_ai_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn generate(&self, context: &NarrativeContext) -> String {
        let Some(generator) = &self.generator else {
            return context.fallback();
        };

        match generator.generate(context).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("Empty AI commentary for {}, using fallback", context.ticker);
                context.fallback()
            }
            Err(e) => {
                warn!("AI commentary failed for {}: {}", context.ticker, e);
                context.fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(regime: usize, agree: bool) -> NarrativeContext {
        let boosting = ModelView {
            name: "gradient_boosting".to_string(),
            prediction: 1,
            direction: Direction::Long,
            confidence_pct: 68.2,
        };
        let linear = ModelView {
            name: "elastic_net".to_string(),
            prediction: if agree { 1 } else { 0 },
            direction: Direction::from_prediction(if agree { 1 } else { 0 }),
            confidence_pct: 55.0,
        };

        NarrativeContext {
            ticker: "AAPL".to_string(),
            current_price: 189.32,
            regime,
            regime_name: crate::ml::hmm::regime_name(regime).to_string(),
            regime_probabilities: vec![0.1, 0.2, 0.7],
            models: vec![boosting, linear],
            direction: Direction::Long,
            confidence_pct: 62.9,
            models_agree: agree,
            recommended_pct: 8.41,
            full_kelly_pct: 16.82,
        }
    }

    #[test]
    fn test_fallback_mentions_regime_and_agreement() {
        let text = context(2, true).fallback();
        assert!(text.starts_with("AUTOMATED ANALYSIS SUMMARY: AAPL"));
        assert!(text.contains("low vol state"));
        assert!(text.contains("low volatility environment supports trend continuation"));
        assert!(text.contains("long bias with 62.9% confidence"));
        assert!(text.contains("Model agreement: Strong"));

        let mixed = context(0, false).fallback();
        assert!(mixed.contains("high volatility environment suggests elevated risk"));
        assert!(mixed.contains("Model agreement: Mixed"));
    }

    #[test]
    fn test_fallback_unknown_regime() {
        let text = context(5, true).fallback();
        assert!(text.contains("current conditions require careful monitoring"));
    }

    #[test]
    fn test_prompt_lists_models() {
        let prompt = context(1, false).prompt();
        assert!(prompt.contains("AAPL (Current Price: $189.32)"));
        assert!(prompt.contains("- gradient_boosting: LONG (Confidence: 68.2%)"));
        assert!(prompt.contains("- elastic_net: SHORT (Confidence: 55%)"));
        assert!(prompt.contains("- Recommended Position: 8.41% of portfolio"));
    }

    #[tokio::test]
    async fn test_commentary_uses_generator() {
        let mut generator = MockNarrativeGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|ctx| Ok(format!("Outlook for {} is constructive.", ctx.ticker)));

        let commentary = Commentary::new(Some(Box::new(generator)));
        assert!(commentary.is_ai_enabled());
        let text = commentary.generate(&context(2, true)).await;
        assert_eq!(text, "Outlook for AAPL is constructive.");
    }

    #[tokio::test]
    async fn test_commentary_falls_back_on_error() {
        let mut generator = MockNarrativeGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("429 Too Many Requests")));

        let ctx = context(1, true);
        let text = Commentary::new(Some(Box::new(generator))).generate(&ctx).await;
        assert_eq!(text, ctx.fallback());
    }

    #[tokio::test]
    async fn test_commentary_falls_back_on_blank_text() {
        let mut generator = MockNarrativeGenerator::new();
        generator.expect_generate().returning(|_| Ok("  \n".to_string()));

        let ctx = context(1, true);
        let text = Commentary::new(Some(Box::new(generator))).generate(&ctx).await;
        assert_eq!(text, ctx.fallback());
    }

    #[test]
    fn test_disabled_commentary_is_fallback() {
        let ctx = context(2, false);
        let text = tokio_test::block_on(Commentary::disabled().generate(&ctx));
        assert_eq!(text, ctx.fallback());
    }

    #[tokio::test]
    async fn test_without_key_is_fallback() {
        let settings = AiSettings {
            api_key: None,
            ..AiSettings::default()
        };
        let commentary = Commentary::from_settings(&settings);
        assert!(!commentary.is_ai_enabled());

        let ctx = context(0, false);
        assert_eq!(commentary.generate(&ctx).await, ctx.fallback());
    }
}
