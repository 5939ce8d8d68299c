//! FusionBrain image provider.
//!
//! The API is job-based: submit a generation request, then poll its status
//! until `DONE`. The poll loop is bounded by an attempt count and a fixed
//! inter-poll delay; exhausting it is a typed timeout, never an endless
//! wait. A finished job returns either a download URL or an inline
//! base64 payload.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::core::error::{PipelineError, Result};
use crate::core::generators::ImageGenerator;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const IMAGE_WIDTH: u32 = 1024;
const IMAGE_HEIGHT: u32 = 1024;

#[derive(Deserialize)]
struct PipelineInfo {
    id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    uuid: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    result: Option<StatusResult>,
}

#[derive(Deserialize)]
struct StatusResult {
    #[serde(default)]
    files: Vec<String>,
}

pub struct FusionBrainImageGenerator {
    api_key: String,
    api_secret: String,
    root_url: String,
    poll_attempts: u32,
    poll_delay: Duration,
    client: Client,
}

impl FusionBrainImageGenerator {
    pub fn new(
        api_key: String,
        api_secret: String,
        base_url: &str,
        poll_attempts: u32,
        poll_delay: Duration,
    ) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        // Accept base URLs with or without the legacy /api/v1 suffix.
        let root_url = trimmed
            .strip_suffix("/api/v1")
            .unwrap_or(trimmed)
            .to_string();
        Self {
            api_key,
            api_secret,
            root_url,
            poll_attempts,
            poll_delay,
            client: Client::new(),
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-Key", format!("Key {}", self.api_key))
            .header("X-Secret", format!("Secret {}", self.api_secret))
    }

    async fn pipeline_id(&self) -> Result<String> {
        let url = format!("{}/key/api/v1/pipelines", self.root_url);
        let res = self
            .auth(self.client.get(&url).timeout(REQUEST_TIMEOUT))
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("FusionBrain pipelines fetch: {}", e)))?;
        if !res.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "FusionBrain pipelines error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )));
        }
        let pipelines: Vec<PipelineInfo> = res
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("FusionBrain pipelines parse: {}", e)))?;
        pipelines
            .into_iter()
            .next()
            .map(|p| p.id)
            .ok_or_else(|| PipelineError::Provider("FusionBrain returned no pipelines".to_string()))
    }

    async fn submit(&self, prompt: &str, pipeline_id: &str) -> Result<String> {
        let params = serde_json::json!({
            "type": "GENERATE",
            "numImages": 1,
            "width": IMAGE_WIDTH,
            "height": IMAGE_HEIGHT,
            "generateParams": {"query": prompt},
        });
        let params_part = Part::text(params.to_string())
            .mime_str("application/json")
            .map_err(|e| PipelineError::Provider(format!("params part: {}", e)))?;
        let form = Form::new()
            .text("pipeline_id", pipeline_id.to_string())
            .part("params", params_part);

        let url = format!("{}/key/api/v1/pipeline/run", self.root_url);
        let res = self
            .auth(self.client.post(&url).timeout(REQUEST_TIMEOUT))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("FusionBrain submit: {}", e)))?;
        if !res.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "FusionBrain submit error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )));
        }
        let run: RunResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("FusionBrain submit parse: {}", e)))?;
        Ok(run.uuid)
    }

    async fn poll_until_done(&self, request_id: &str) -> Result<Vec<String>> {
        let url = format!("{}/key/api/v1/pipeline/status/{}", self.root_url, request_id);
        for attempt in 1..=self.poll_attempts {
            let res = self
                .auth(self.client.get(&url).timeout(REQUEST_TIMEOUT))
                .send()
                .await
                .map_err(|e| {
                    PipelineError::Provider(format!("FusionBrain status fetch: {}", e))
                })?;
            if !res.status().is_success() {
                return Err(PipelineError::Provider(format!(
                    "FusionBrain status error {}: {}",
                    res.status(),
                    res.text().await.unwrap_or_default()
                )));
            }
            let status: StatusResponse = res
                .json()
                .await
                .map_err(|e| PipelineError::Provider(format!("FusionBrain status parse: {}", e)))?;

            match status.status.as_str() {
                "DONE" => {
                    let files = status.result.map(|r| r.files).unwrap_or_default();
                    if files.is_empty() {
                        return Err(PipelineError::ImageGeneration(
                            "FusionBrain job finished with no files".to_string(),
                        ));
                    }
                    return Ok(files);
                }
                "FAIL" => {
                    return Err(PipelineError::ImageGeneration(
                        "FusionBrain generation job failed".to_string(),
                    ));
                }
                other => {
                    debug!(
                        "FusionBrain job {} not ready (status={}, attempt {}/{})",
                        request_id, other, attempt, self.poll_attempts
                    );
                    tokio::time::sleep(self.poll_delay).await;
                }
            }
        }
        Err(PipelineError::Timeout {
            attempts: self.poll_attempts,
        })
    }

    async fn fetch_entry(&self, entry: &str) -> Result<Vec<u8>> {
        if entry.starts_with("http://") || entry.starts_with("https://") {
            let res = self
                .client
                .get(entry)
                .timeout(DOWNLOAD_TIMEOUT)
                .send()
                .await
                .map_err(|e| {
                    PipelineError::ImageGeneration(format!("image download failed: {}", e))
                })?;
            if !res.status().is_success() {
                return Err(PipelineError::ImageGeneration(format!(
                    "image download error {}",
                    res.status()
                )));
            }
            return res
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| PipelineError::ImageGeneration(format!("image read failed: {}", e)));
        }

        // Inline payload, possibly with a data: URI prefix.
        let b64 = match entry.split_once(',') {
            Some((prefix, rest)) if prefix.to_lowercase().starts_with("data:") => rest,
            _ => entry,
        };
        base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| PipelineError::ImageGeneration(format!("base64 decode failed: {}", e)))
    }
}

#[async_trait]
impl ImageGenerator for FusionBrainImageGenerator {
    async fn generate_image(&self, prompt: &str, _model: Option<&str>) -> Result<Vec<u8>> {
        let pipeline_id = self.pipeline_id().await?;
        let request_id = self.submit(prompt, &pipeline_id).await?;
        let files = self.poll_until_done(&request_id).await?;
        self.fetch_entry(&files[0]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_submit_endpoints(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/key/api/v1/pipelines"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "pipe-1", "name": "k"}])),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/key/api/v1/pipeline/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "job-1"})))
            .mount(server)
            .await;
    }

    fn generator(server: &MockServer, attempts: u32) -> FusionBrainImageGenerator {
        FusionBrainImageGenerator::new(
            "fb-key".to_string(),
            "fb-secret".to_string(),
            &server.uri(),
            attempts,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn poll_bound_exhaustion_is_timeout() {
        let server = MockServer::start().await;
        mock_submit_endpoints(&server).await;
        Mock::given(method("GET"))
            .and(path("/key/api/v1/pipeline/status/job-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "PROCESSING"})),
            )
            .mount(&server)
            .await;

        let err = generator(&server, 3)
            .generate_image("a cup", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn done_job_with_base64_file_decodes() {
        let server = MockServer::start().await;
        mock_submit_endpoints(&server).await;
        let payload = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        Mock::given(method("GET"))
            .and(path("/key/api/v1/pipeline/status/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "DONE",
                "result": {"files": [payload]}
            })))
            .mount(&server)
            .await;

        let bytes = generator(&server, 3)
            .generate_image("a cup", None)
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_job_is_image_generation_error() {
        let server = MockServer::start().await;
        mock_submit_endpoints(&server).await;
        Mock::given(method("GET"))
            .and(path("/key/api/v1/pipeline/status/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "FAIL"})))
            .mount(&server)
            .await;

        let err = generator(&server, 3)
            .generate_image("a cup", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageGeneration(_)));
    }

    #[test]
    fn base_url_suffix_is_stripped() {
        let generator = FusionBrainImageGenerator::new(
            "k".into(),
            "s".into(),
            "https://api.fusionbrain.ai/api/v1",
            1,
            Duration::ZERO,
        );
        assert_eq!(generator.root_url, "https://api.fusionbrain.ai");
    }
}
