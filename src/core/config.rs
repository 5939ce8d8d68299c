//! Startup configuration.
//!
//! Settings are read once from a TOML file plus environment secrets and
//! passed by reference into the scheduler, registries and executor. There
//! is no ambient global settings object.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::error::{PipelineError, Result};
use crate::core::generators::{ImageProviderKind, TextProviderKind};
use crate::core::types::{Channel, ScheduleDefinition};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub sheets: SheetsSettings,
    #[serde(default)]
    pub openai: OpenAiSettings,
    #[serde(default)]
    pub yandex: YandexSettings,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub fusionbrain: FusionBrainSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub vk: VkSettings,
    #[serde(default)]
    pub style_memory: StyleMemorySettings,
    /// Prompt templates, keyed by `prompt_key` with optional
    /// channel-suffixed variants (`daily_vk` beats `daily` for VK).
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDefinition>,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SheetsSettings {
    pub spreadsheet_id: String,
    pub vk_tab: Option<String>,
    pub telegram_tab: Option<String>,
}

impl SheetsSettings {
    pub fn tab_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Vk => self.vk_tab.as_deref(),
            Channel::Telegram => self.telegram_tab.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub model: String,
    pub temperature: f32,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YandexSettings {
    pub folder_id: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl Default for YandexSettings {
    fn default() -> Self {
        Self {
            folder_id: None,
            model: "yandexgpt-lite".to_string(),
            temperature: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Default image provider; schedules may override per job.
    pub provider: String,
    pub model: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "dall-e-3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionBrainSettings {
    pub base_url: String,
    pub poll_attempts: u32,
    pub poll_delay_secs: u64,
}

impl Default for FusionBrainSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.fusionbrain.ai".to_string(),
            poll_attempts: 20,
            poll_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelegramSettings {
    /// Numeric chat id or `@channelname`.
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VkSettings {
    /// Negative for communities, positive for user walls.
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StyleMemorySettings {
    pub db_path: String,
    pub embedding_model: String,
}

impl Default for StyleMemorySettings {
    fn default() -> Self {
        Self {
            db_path: "style_memory.db".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
        }
    }
}

/// API credentials, resolved from the environment exactly once at startup.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub sheets_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub yandex_api_key: Option<String>,
    pub fusionbrain_api_key: Option<String>,
    pub fusionbrain_api_secret: Option<String>,
    pub telegram_token: Option<String>,
    pub vk_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        Self {
            sheets_token: var("GOOGLE_SHEETS_TOKEN"),
            openai_api_key: var("OPENAI_API_KEY"),
            yandex_api_key: var("YANDEX_API_KEY"),
            fusionbrain_api_key: var("FUSIONBRAIN_API_KEY"),
            fusionbrain_api_secret: var("FUSIONBRAIN_API_SECRET"),
            telegram_token: var("TG_TOKEN"),
            vk_token: var("VK_TOKEN"),
        }
    }
}

impl Settings {
    /// Read settings from `path`, merge environment secrets and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut settings = Self::from_toml(&raw)?;
        settings.secrets = Secrets::from_env();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| PipelineError::Configuration(format!("cannot parse settings: {}", e)))
    }

    /// Check that every enabled schedule can actually run with the
    /// configured providers, channels and credentials. Collects all
    /// missing keys into one error.
    pub fn validate(&self) -> Result<()> {
        let mut missing: Vec<&str> = Vec::new();

        if self.sheets.spreadsheet_id.trim().is_empty() {
            missing.push("sheets.spreadsheet_id");
        }
        if self.secrets.sheets_token.is_none() {
            missing.push("GOOGLE_SHEETS_TOKEN");
        }

        for schedule in self.schedules.iter().filter(|s| s.enabled) {
            let text_kind: TextProviderKind =
                schedule.text_provider.parse().map_err(|_| {
                    PipelineError::Configuration(format!(
                        "schedule '{}': unknown text provider '{}'",
                        schedule.id, schedule.text_provider
                    ))
                })?;
            match text_kind {
                TextProviderKind::OpenAi => {
                    if self.secrets.openai_api_key.is_none() {
                        missing.push("OPENAI_API_KEY");
                    }
                }
                TextProviderKind::Yandex => {
                    if self.secrets.yandex_api_key.is_none() {
                        missing.push("YANDEX_API_KEY");
                    }
                    if self.yandex.folder_id.is_none() {
                        missing.push("yandex.folder_id");
                    }
                }
            }

            let image_key = schedule
                .image_provider
                .as_deref()
                .unwrap_or(&self.image.provider);
            let image_kind: ImageProviderKind = image_key.parse().map_err(|_| {
                PipelineError::Configuration(format!(
                    "schedule '{}': unknown image provider '{}'",
                    schedule.id, image_key
                ))
            })?;
            match image_kind {
                ImageProviderKind::DallE => {
                    if self.secrets.openai_api_key.is_none() {
                        missing.push("OPENAI_API_KEY");
                    }
                }
                ImageProviderKind::FusionBrain => {
                    if self.secrets.fusionbrain_api_key.is_none() {
                        missing.push("FUSIONBRAIN_API_KEY");
                    }
                    if self.secrets.fusionbrain_api_secret.is_none() {
                        missing.push("FUSIONBRAIN_API_SECRET");
                    }
                }
            }

            match schedule.channel {
                Channel::Vk => {
                    if self.secrets.vk_token.is_none() {
                        missing.push("VK_TOKEN");
                    }
                    if self.vk.owner_id.is_none() {
                        missing.push("vk.owner_id");
                    }
                    if self.sheets.vk_tab.is_none() {
                        missing.push("sheets.vk_tab");
                    }
                }
                Channel::Telegram => {
                    if self.secrets.telegram_token.is_none() {
                        missing.push("TG_TOKEN");
                    }
                    if self.telegram.chat_id.is_none() {
                        missing.push("telegram.chat_id");
                    }
                    if self.sheets.telegram_tab.is_none() {
                        missing.push("sheets.telegram_tab");
                    }
                }
            }
        }

        missing.sort_unstable();
        missing.dedup();
        if !missing.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    pub fn enabled_schedules(&self) -> impl Iterator<Item = &ScheduleDefinition> {
        self.schedules.iter().filter(|s| s.enabled)
    }
}
