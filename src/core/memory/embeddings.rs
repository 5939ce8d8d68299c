use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{PipelineError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client used by the style memory's similarity index.
pub struct EmbeddingClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl EmbeddingClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let req = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let res = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("embeddings request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "embeddings API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )));
        }

        let parsed: EmbeddingResponse = res.json().await.map_err(|e| {
            PipelineError::Provider(format!("embeddings response parse failed: {}", e))
        })?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                PipelineError::Provider("embeddings response contained no vectors".to_string())
            })
    }
}
