use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::PipelineError;

/// Publish destination. Closed set: adding a network means adding a
/// variant plus a publisher implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Vk,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Vk => "vk",
            Channel::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vk" => Ok(Channel::Vk),
            "telegram" | "tg" => Ok(Channel::Telegram),
            other => Err(PipelineError::UnknownChannel(other.to_string())),
        }
    }
}

/// One cron-triggered recurring job binding a channel, a topic source and
/// provider choices. Immutable once loaded for a run.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleDefinition {
    pub id: String,
    pub channel: Channel,
    /// Five-field crontab expression.
    pub cron: String,
    /// Key into the prompt template library.
    pub prompt_key: String,
    #[serde(default = "default_text_provider")]
    pub text_provider: String,
    /// Overrides the configured default image provider when set.
    #[serde(default)]
    pub image_provider: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_text_provider() -> String {
    "openai".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Opaque reference to one queue row (1-based spreadsheet row index).
/// Valid only within a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowHandle(pub u32);

/// Column names of the work queue row schema.
pub mod columns {
    pub const TOPIC: &str = "topic";
    pub const STATUS: &str = "status";
    pub const SCHEDULED_AT: &str = "scheduled_at";
    pub const PUBLISHED_URL: &str = "published_url";
    pub const PROVIDER: &str = "provider";
    pub const MODEL: &str = "model";
    pub const NOTES: &str = "notes";
}

/// Recognized `status` values. Any other value is inert and skipped.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_DONE: &str = "done";

pub type WorkItemFields = HashMap<String, String>;

/// A pending queue row together with its handle.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub handle: RowHandle,
    pub fields: WorkItemFields,
}

impl WorkItem {
    pub fn topic(&self) -> &str {
        self.fields
            .get(columns::TOPIC)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Token/cost accounting reported by a text provider.
#[derive(Debug, Clone, Default)]
pub struct TextMeta {
    pub tokens: Option<u32>,
    pub cost: Option<f64>,
    /// Model the provider actually used (default or override).
    pub model: Option<String>,
}

impl TextMeta {
    /// Summary written to the queue `notes` column.
    pub fn notes(&self) -> String {
        format!(
            "tokens={},cost={}",
            self.tokens.unwrap_or(0),
            self.cost.unwrap_or(0.0)
        )
    }
}

/// Text produced by one generation call. Never partially consumed: the
/// title/body split is a pure function of `body`.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub body: String,
    pub meta: TextMeta,
}

/// Content bundle handed to a publisher.
#[derive(Debug, Clone)]
pub struct PostContent {
    pub title: String,
    pub body: String,
    /// Normalized JPEG bytes.
    pub image: Vec<u8>,
}

impl PostContent {
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

/// Append-only record of a published post, keyed by channel. "Latest" is
/// max `created_at` per channel.
#[derive(Debug, Clone)]
pub struct StyleRecord {
    pub channel: Channel,
    pub item_id: String,
    pub content: String,
    pub url: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}
