//! Generation capability interfaces and the provider registry.
//!
//! Text and image generation are separate, narrow traits: a provider
//! implements only what it actually supports. The registry is a closed
//! map from provider-kind enums to implementations, built once at startup;
//! unknown keys are a typed error, not a dynamic lookup miss.

pub mod fusionbrain;
pub mod openai;
pub mod openai_image;
pub mod yandex;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::error::{PipelineError, Result};
use crate::core::types::GeneratedText;

/// Capability interface for text-producing providers.
///
/// Empty returned text means the provider explicitly reported "no
/// content"; callers must treat it exactly like an error.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(
        &self,
        prompt: &str,
        model: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<GeneratedText>;
}

/// Capability interface for image-producing providers.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, model: Option<&str>) -> Result<Vec<u8>>;
}

/// Known text providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextProviderKind {
    OpenAi,
    Yandex,
}

impl TextProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextProviderKind::OpenAi => "openai",
            TextProviderKind::Yandex => "yandex",
        }
    }
}

impl FromStr for TextProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "openai-text" | "chatgpt" => Ok(TextProviderKind::OpenAi),
            "yandex" | "yandexgpt" => Ok(TextProviderKind::Yandex),
            other => Err(PipelineError::UnknownProvider(other.to_string())),
        }
    }
}

/// Known image providers. `openai` is accepted as an alias for DALL·E.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageProviderKind {
    DallE,
    FusionBrain,
}

impl ImageProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageProviderKind::DallE => "dall-e",
            ImageProviderKind::FusionBrain => "fusionbrain",
        }
    }
}

impl FromStr for ImageProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dall-e" | "dalle" | "openai" | "openai-image" => Ok(ImageProviderKind::DallE),
            "fusionbrain" => Ok(ImageProviderKind::FusionBrain),
            other => Err(PipelineError::UnknownProvider(other.to_string())),
        }
    }
}

/// Provider registry, read-only after startup.
#[derive(Default)]
pub struct GeneratorRegistry {
    text: HashMap<TextProviderKind, Arc<dyn TextGenerator>>,
    image: HashMap<ImageProviderKind, Arc<dyn ImageGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_text(&mut self, kind: TextProviderKind, generator: Arc<dyn TextGenerator>) {
        info!("Registered text provider: {}", kind.as_str());
        self.text.insert(kind, generator);
    }

    pub fn register_image(&mut self, kind: ImageProviderKind, generator: Arc<dyn ImageGenerator>) {
        info!("Registered image provider: {}", kind.as_str());
        self.image.insert(kind, generator);
    }

    pub fn resolve_text(&self, key: &str) -> Result<Arc<dyn TextGenerator>> {
        let kind: TextProviderKind = key.parse()?;
        self.text
            .get(&kind)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownProvider(key.to_string()))
    }

    pub fn resolve_image(&self, key: &str) -> Result<Arc<dyn ImageGenerator>> {
        let kind: ImageProviderKind = key.parse()?;
        self.image
            .get(&kind)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownProvider(key.to_string()))
    }
}
