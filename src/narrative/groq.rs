use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{NarrativeContext, NarrativeGenerator, SYSTEM_PROMPT};
use crate::config::AiSettings;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client for Groq
pub struct GroqClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl GroqClient {
    /// `Ok(None)` when no API key is configured.
    pub fn from_settings(settings: &AiSettings) -> Result<Option<Self>> {
        let Some(api_key) = settings.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("building Groq HTTP client")?;

        Ok(Some(Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl NarrativeGenerator for GroqClient {
    async fn generate(&self, context: &NarrativeContext) -> Result<String> {
        let started = Instant::now();
        let prompt = context.prompt();
        let url = format!("{}/chat/completions", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&prompt))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Groq API error {}: {}", status, text));
        }

        let body: ChatResponse = resp.json().await?;
        let content = extract_content(body)?;
        debug!(
            model = %self.model,
            elapsed = started.elapsed().as_secs_f64(),
            "AI commentary received"
        );
        Ok(content)
    }
}

fn extract_content(body: ChatResponse) -> Result<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Groq response contained no message"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: Option<&str>) -> AiSettings {
        AiSettings {
            api_key: key.map(str::to_string),
            ..AiSettings::default()
        }
    }

    #[test]
    fn test_no_key_no_client() {
        assert!(GroqClient::from_settings(&settings(None)).unwrap().is_none());
        assert!(GroqClient::from_settings(&settings(Some("  "))).unwrap().is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let client = GroqClient::from_settings(&settings(Some("gsk_test")))
            .unwrap()
            .unwrap();
        let body = serde_json::to_value(client.request_body("hello")).unwrap();

        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["max_tokens"], 300);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_extract_content() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": "  Stay nimble.\n"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(body).unwrap(), "Stay nimble.");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(extract_content(empty).is_err());
    }
}
