//! Subsystem wiring: turn validated settings into a ready executor.
//!
//! Providers and publishers are registered only when their credentials are
//! present; `Settings::validate` has already guaranteed that everything an
//! enabled schedule needs is configured.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::Settings;
use crate::core::error::Result;
use crate::core::generators::fusionbrain::FusionBrainImageGenerator;
use crate::core::generators::openai::OpenAiGenerator;
use crate::core::generators::openai_image::OpenAiImageGenerator;
use crate::core::generators::yandex::YandexGenerator;
use crate::core::generators::{GeneratorRegistry, ImageProviderKind, TextProviderKind};
use crate::core::memory::embeddings::EmbeddingClient;
use crate::core::memory::VectorStyleMemory;
use crate::core::pipeline::prompt::PromptLibrary;
use crate::core::pipeline::{PipelineContext, PipelineExecutor};
use crate::core::queue::sheets::SheetsQueue;
use crate::core::types::Channel;
use crate::publishers::PublisherRegistry;
use crate::publishers::telegram::TelegramPublisher;
use crate::publishers::vk::VkPublisher;

pub fn build_executor(settings: &Settings) -> Result<PipelineExecutor> {
    let secrets = &settings.secrets;

    let mut generators = GeneratorRegistry::new();
    if let Some(api_key) = &secrets.openai_api_key {
        generators.register_text(
            TextProviderKind::OpenAi,
            Arc::new(OpenAiGenerator::new(
                api_key.clone(),
                settings.openai.model.clone(),
                settings.openai.temperature,
            )),
        );
        generators.register_image(
            ImageProviderKind::DallE,
            Arc::new(OpenAiImageGenerator::new(
                api_key.clone(),
                settings.image.model.clone(),
            )),
        );
    }
    if let (Some(api_key), Some(folder_id)) =
        (&secrets.yandex_api_key, &settings.yandex.folder_id)
    {
        generators.register_text(
            TextProviderKind::Yandex,
            Arc::new(YandexGenerator::new(
                api_key.clone(),
                folder_id.clone(),
                settings.yandex.model.clone(),
                settings.yandex.temperature,
            )),
        );
    }
    if let (Some(api_key), Some(api_secret)) = (
        &secrets.fusionbrain_api_key,
        &secrets.fusionbrain_api_secret,
    ) {
        generators.register_image(
            ImageProviderKind::FusionBrain,
            Arc::new(FusionBrainImageGenerator::new(
                api_key.clone(),
                api_secret.clone(),
                &settings.fusionbrain.base_url,
                settings.fusionbrain.poll_attempts,
                Duration::from_secs(settings.fusionbrain.poll_delay_secs),
            )),
        );
    }

    let mut publishers = PublisherRegistry::new();
    if let (Some(token), Some(chat_id)) = (&secrets.telegram_token, &settings.telegram.chat_id) {
        publishers.register(
            Channel::Telegram,
            Arc::new(TelegramPublisher::new(token, chat_id)),
        );
    }
    if let (Some(token), Some(owner_id)) = (&secrets.vk_token, settings.vk.owner_id) {
        publishers.register(Channel::Vk, Arc::new(VkPublisher::new(token.clone(), owner_id)));
    }

    let queue = SheetsQueue::new(
        settings.sheets.spreadsheet_id.clone(),
        secrets.sheets_token.clone().unwrap_or_default(),
    );

    let embedder = secrets.openai_api_key.as_ref().map(|api_key| {
        EmbeddingClient::new(api_key.clone(), settings.style_memory.embedding_model.clone())
    });
    let memory = VectorStyleMemory::open(&settings.style_memory.db_path, embedder)?;

    let mut queue_tabs = HashMap::new();
    for channel in [Channel::Vk, Channel::Telegram] {
        if let Some(tab) = settings.sheets.tab_for(channel) {
            queue_tabs.insert(channel, tab.to_string());
        }
    }

    Ok(PipelineExecutor::new(PipelineContext {
        queue: Arc::new(queue),
        memory: Arc::new(memory),
        generators: Arc::new(generators),
        publishers: Arc::new(publishers),
        prompts: PromptLibrary::new(settings.prompts.clone()),
        queue_tabs,
        default_image_provider: settings.image.provider.clone(),
    }))
}
