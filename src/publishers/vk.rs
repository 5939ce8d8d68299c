//! VK wall publisher.
//!
//! Upload flow per the VK API: photos.getWallUploadServer → raw upload →
//! photos.saveWallPhoto → wall.post with the photo attachment. The
//! external id is `"{owner_id}_{post_id}"`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::info;

use crate::core::error::{PipelineError, Result};
use crate::core::types::PostContent;
use crate::publishers::Publisher;

const API_VERSION: &str = "5.131";
const DEFAULT_BASE_URL: &str = "https://api.vk.com/method";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct UploadServerEnvelope {
    response: UploadServer,
}

#[derive(Deserialize)]
struct UploadServer {
    upload_url: String,
}

#[derive(Deserialize)]
struct UploadResult {
    server: Option<i64>,
    photo: Option<String>,
    hash: Option<String>,
}

#[derive(Deserialize)]
struct SaveWallPhotoEnvelope {
    response: Vec<SavedPhoto>,
}

#[derive(Deserialize)]
struct SavedPhoto {
    owner_id: i64,
    id: i64,
}

#[derive(Deserialize)]
struct WallPostEnvelope {
    response: Option<WallPostResult>,
    error: Option<VkApiError>,
}

#[derive(Deserialize)]
struct WallPostResult {
    post_id: i64,
}

#[derive(Deserialize)]
struct VkApiError {
    error_code: i64,
    error_msg: String,
}

pub struct VkPublisher {
    token: String,
    owner_id: i64,
    base_url: String,
    client: Client,
}

impl VkPublisher {
    pub fn new(token: String, owner_id: i64) -> Self {
        Self {
            token,
            owner_id,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn upload_photo(&self, image: &[u8]) -> Result<String> {
        let owner_id = self.owner_id.to_string();

        let res = self
            .client
            .get(format!("{}/photos.getWallUploadServer", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .query(&[
                ("access_token", self.token.as_str()),
                ("v", API_VERSION),
                ("owner_id", owner_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Publish(format!("upload server fetch failed: {}", e)))?;
        let envelope: UploadServerEnvelope = res
            .json()
            .await
            .map_err(|e| PipelineError::Publish(format!("upload server parse failed: {}", e)))?;

        let part = Part::bytes(image.to_vec()).file_name("image.jpg");
        let form = Form::new().part("photo", part);
        let upload_res = self
            .client
            .post(&envelope.response.upload_url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::Publish(format!("photo upload failed: {}", e)))?;
        let uploaded: UploadResult = upload_res
            .json()
            .await
            .map_err(|e| PipelineError::Publish(format!("upload response parse failed: {}", e)))?;

        let (Some(server), Some(photo), Some(hash)) =
            (uploaded.server, uploaded.photo, uploaded.hash)
        else {
            return Err(PipelineError::Publish(
                "upload server reply is missing server/photo/hash".to_string(),
            ));
        };

        let server = server.to_string();
        let save_res = self
            .client
            .post(format!("{}/photos.saveWallPhoto", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("access_token", self.token.as_str()),
                ("v", API_VERSION),
                ("owner_id", owner_id.as_str()),
                ("server", server.as_str()),
                ("photo", photo.as_str()),
                ("hash", hash.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Publish(format!("saveWallPhoto failed: {}", e)))?;
        let saved: SaveWallPhotoEnvelope = save_res
            .json()
            .await
            .map_err(|e| PipelineError::Publish(format!("saveWallPhoto parse failed: {}", e)))?;
        let photo = saved.response.into_iter().next().ok_or_else(|| {
            PipelineError::Publish("saveWallPhoto returned no photos".to_string())
        })?;

        Ok(format!("photo{}_{}", photo.owner_id, photo.id))
    }

    async fn post_wall(&self, text: &str, attachment: &str) -> Result<Option<String>> {
        let owner_id = self.owner_id.to_string();
        let res = self
            .client
            .post(format!("{}/wall.post", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("access_token", self.token.as_str()),
                ("v", API_VERSION),
                ("owner_id", owner_id.as_str()),
                ("message", text),
                ("attachments", attachment),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Publish(format!("wall.post failed: {}", e)))?;
        let envelope: WallPostEnvelope = res
            .json()
            .await
            .map_err(|e| PipelineError::Publish(format!("wall.post parse failed: {}", e)))?;

        if let Some(error) = envelope.error {
            return Err(PipelineError::Publish(format!(
                "VK API error {}: {}",
                error.error_code, error.error_msg
            )));
        }
        Ok(envelope
            .response
            .map(|r| format!("{}_{}", self.owner_id, r.post_id)))
    }
}

#[async_trait]
impl Publisher for VkPublisher {
    async fn publish(&self, post: &PostContent) -> Result<Option<String>> {
        let attachment = self.upload_photo(&post.image).await?;
        let external_id = self.post_wall(&post.full_text(), &attachment).await?;
        if let Some(id) = &external_id {
            info!("VK post published: {}", self.permalink(id));
        }
        Ok(external_id)
    }

    fn permalink(&self, external_id: &str) -> String {
        format!("https://vk.com/wall{}", external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post() -> PostContent {
        PostContent {
            title: "Title".to_string(),
            body: "Body".to_string(),
            image: vec![0xFF, 0xD8, 0xFF],
        }
    }

    async fn mount_upload_flow(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/photos.getWallUploadServer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"upload_url": format!("{}/upload", server.uri())}
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "server": 101, "photo": "[]", "hash": "abc"
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/photos.saveWallPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": [{"owner_id": -987, "id": 4242}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn publish_runs_the_full_upload_flow() {
        let server = MockServer::start().await;
        mount_upload_flow(&server).await;
        Mock::given(method("POST"))
            .and(path("/wall.post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"post_id": 77}
            })))
            .mount(&server)
            .await;

        let publisher =
            VkPublisher::new("vk-token".to_string(), -987).with_base_url(server.uri());
        let external_id = publisher.publish(&post()).await.unwrap();
        assert_eq!(external_id.as_deref(), Some("-987_77"));
        assert_eq!(
            publisher.permalink("-987_77"),
            "https://vk.com/wall-987_77"
        );
    }

    #[tokio::test]
    async fn api_error_envelope_is_publish_error() {
        let server = MockServer::start().await;
        mount_upload_flow(&server).await;
        Mock::given(method("POST"))
            .and(path("/wall.post"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"error_code": 214, "error_msg": "Access to adding post denied"}
            })))
            .mount(&server)
            .await;

        let publisher =
            VkPublisher::new("vk-token".to_string(), -987).with_base_url(server.uri());
        let err = publisher.publish(&post()).await.unwrap_err();
        assert!(err.to_string().contains("214"));
    }
}
