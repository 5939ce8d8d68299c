use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::error::{PipelineError, Result};
use crate::core::generators::ImageGenerator;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
const IMAGE_SIZE: &str = "1024x1024";

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

/// DALL·E image provider (OpenAI images API, base64 response).
pub struct OpenAiImageGenerator {
    api_key: String,
    default_model: String,
    base_url: String,
    client: Client,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
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
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate_image(&self, prompt: &str, model: Option<&str>) -> Result<Vec<u8>> {
        let model = model.unwrap_or(&self.default_model);
        let req = ImageRequest {
            model,
            prompt,
            n: 1,
            size: IMAGE_SIZE,
            response_format: "b64_json",
        };

        let res = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("OpenAI image request failed: {}", e)))?;

        if !res.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "OpenAI images API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )));
        }

        let parsed: ImageResponse = res.json().await.map_err(|e| {
            PipelineError::Provider(format!("OpenAI images response parse failed: {}", e))
        })?;

        // No data entries is "no content": callers treat empty bytes as a
        // generation failure.
        let Some(datum) = parsed.data.into_iter().next() else {
            return Ok(Vec::new());
        };
        let b64 = datum.b64_json.ok_or_else(|| {
            PipelineError::ImageGeneration("image response carried no b64_json payload".to_string())
        })?;
        base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| PipelineError::ImageGeneration(format!("base64 decode failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn decodes_base64_payload() {
        let server = MockServer::start().await;
        let payload = base64::engine::general_purpose::STANDARD.encode([7u8, 8, 9]);
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"b64_json": payload}]
            })))
            .mount(&server)
            .await;

        let generator = OpenAiImageGenerator::new("sk-test".to_string(), "dall-e-3".to_string())
            .with_base_url(server.uri());
        let bytes = generator.generate_image("a cup", None).await.unwrap();
        assert_eq!(bytes, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn empty_data_returns_empty_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let generator = OpenAiImageGenerator::new("sk-test".to_string(), "dall-e-3".to_string())
            .with_base_url(server.uri());
        let bytes = generator.generate_image("a cup", None).await.unwrap();
        assert!(bytes.is_empty());
    }
}
