use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{PipelineError, Result};
use crate::core::generators::TextGenerator;
use crate::core::types::{GeneratedText, TextMeta};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

/// OpenAI chat-completions text provider.
pub struct OpenAiGenerator {
    api_key: String,
    default_model: String,
    default_temperature: f32,
    base_url: String,
    client: Client,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, default_model: String, default_temperature: f32) -> Self {
        Self {
            api_key,
            default_model,
            default_temperature,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Rough spend estimate from the published per-1k-token prices.
    fn cost_estimate(model: &str, total_tokens: u32) -> f64 {
        let per_1k = if model.starts_with("gpt-4o") {
            0.03
        } else if model.starts_with("gpt-4.5") {
            0.06
        } else {
            0.002
        };
        (f64::from(total_tokens) / 1000.0) * per_1k
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate_text(
        &self,
        prompt: &str,
        model: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<GeneratedText> {
        let model = model.unwrap_or(&self.default_model);
        let req = ChatRequest {
            model,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt,
            }],
            temperature: Some(temperature.unwrap_or(self.default_temperature)),
        };

        let res = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("OpenAI request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "OpenAI API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("OpenAI response parse failed: {}", e)))?;

        let tokens = parsed.usage.and_then(|u| u.total_tokens);
        // An explicit "no content" reply becomes empty text, not an error.
        let body = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(GeneratedText {
            body,
            meta: TextMeta {
                tokens,
                cost: tokens.map(|t| Self::cost_estimate(model, t)),
                model: Some(model.to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator(server: &MockServer) -> OpenAiGenerator {
        OpenAiGenerator::new("sk-test".to_string(), "gpt-4o".to_string(), 0.7)
            .with_base_url(server.uri())
    }

    #[tokio::test]
    async fn returns_body_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Title\nBody text"}}],
                "usage": {"total_tokens": 420}
            })))
            .mount(&server)
            .await;

        let out = generator(&server)
            .generate_text("write about coffee", None, None)
            .await
            .unwrap();
        assert_eq!(out.body, "Title\nBody text");
        assert_eq!(out.meta.tokens, Some(420));
        assert!(out.meta.cost.unwrap() > 0.0);
        assert_eq!(out.meta.model.as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn empty_choices_is_no_content_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"choices": [], "usage": null})),
            )
            .mount(&server)
            .await;

        let out = generator(&server)
            .generate_text("prompt", None, None)
            .await
            .unwrap();
        assert!(out.body.is_empty());
    }

    #[tokio::test]
    async fn api_error_status_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = generator(&server)
            .generate_text("prompt", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Provider(_)));
        assert!(err.to_string().contains("429"));
    }

    #[test]
    fn cost_scales_with_model_family() {
        let gpt4o = OpenAiGenerator::cost_estimate("gpt-4o", 1000);
        let cheap = OpenAiGenerator::cost_estimate("gpt-3.5-turbo", 1000);
        assert!(gpt4o > cheap);
    }
}
