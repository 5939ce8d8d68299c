use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{PipelineError, Result};
use crate::core::generators::TextGenerator;
use crate::core::types::{GeneratedText, TextMeta};

const DEFAULT_BASE_URL: &str = "https://llm.api.cloud.yandex.net";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TOKENS: u32 = 2048;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: String,
    completion_options: CompletionOptions,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Deserialize)]
struct CompletionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Deserialize)]
struct AlternativeMessage {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionUsage {
    // The API serializes counters as JSON strings.
    total_tokens: Option<serde_json::Value>,
}

fn coerce_tokens(value: &serde_json::Value) -> Option<u32> {
    value
        .as_u64()
        .map(|n| n as u32)
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// YandexGPT text provider (Yandex Cloud Foundation Models API).
pub struct YandexGenerator {
    api_key: String,
    folder_id: String,
    default_model: String,
    default_temperature: f32,
    base_url: String,
    client: Client,
}

impl YandexGenerator {
    pub fn new(
        api_key: String,
        folder_id: String,
        default_model: String,
        default_temperature: f32,
    ) -> Self {
        Self {
            api_key,
            folder_id,
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
}

#[async_trait]
impl TextGenerator for YandexGenerator {
    async fn generate_text(
        &self,
        prompt: &str,
        model: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<GeneratedText> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::Provider("empty prompt".to_string()));
        }

        let model = model.unwrap_or(&self.default_model);
        let req = CompletionRequest {
            model_uri: format!("gpt://{}/{}/latest", self.folder_id, model),
            completion_options: CompletionOptions {
                temperature: temperature.unwrap_or(self.default_temperature),
                max_tokens: MAX_TOKENS,
            },
            messages: vec![CompletionMessage {
                role: "user",
                text: prompt,
            }],
        };

        let res = self
            .client
            .post(format!(
                "{}/foundationModels/v1/completion",
                self.base_url
            ))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .header("X-Yandex-Cloud-Folder-Id", &self.folder_id)
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("Yandex request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "Yandex API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )));
        }

        let parsed: CompletionResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("Yandex response parse failed: {}", e)))?;

        let tokens = parsed
            .result
            .usage
            .and_then(|u| u.total_tokens)
            .as_ref()
            .and_then(coerce_tokens);
        let body = parsed
            .result
            .alternatives
            .into_iter()
            .next()
            .and_then(|a| a.message.text)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        Ok(GeneratedText {
            body,
            meta: TextMeta {
                tokens,
                cost: None,
                model: Some(model.to_string()),
            },
        })
    }
}
