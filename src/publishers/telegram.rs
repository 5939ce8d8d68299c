//! Telegram publisher.
//!
//! Sends the photo first, then the Markdown text, and returns the link to
//! the text message as the external id.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, ParseMode, Recipient};
use tracing::info;

use crate::core::error::{PipelineError, Result};
use crate::core::types::PostContent;
use crate::publishers::Publisher;

pub struct TelegramPublisher {
    bot: Bot,
    chat: Recipient,
}

impl TelegramPublisher {
    pub fn new(token: &str, chat_id: &str) -> Self {
        Self {
            bot: Bot::new(token),
            chat: parse_chat(chat_id),
        }
    }
}

fn parse_chat(raw: &str) -> Recipient {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        Recipient::Id(ChatId(id))
    } else if raw.starts_with('@') {
        Recipient::ChannelUsername(raw.to_string())
    } else {
        Recipient::ChannelUsername(format!("@{}", raw))
    }
}

/// Telegram's legacy Markdown chokes on `**bold**`; headings and the rest
/// pass through untouched.
pub(crate) fn sanitize_markdown(text: &str) -> String {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    let re = BOLD.get_or_init(|| Regex::new(r"(?s)\*\*(.*?)\*\*").expect("static regex"));
    re.replace_all(text, "*$1*").to_string()
}

fn message_link(chat: &Recipient, message_id: i32) -> String {
    match chat {
        Recipient::ChannelUsername(name) => {
            format!("https://t.me/{}/{}", name.trim_start_matches('@'), message_id)
        }
        Recipient::Id(ChatId(id)) => {
            // Supergroup/channel ids carry a -100 prefix that t.me/c/ links drop.
            let raw = id.to_string();
            let internal = raw.strip_prefix("-100").unwrap_or(&raw);
            format!("https://t.me/c/{}/{}", internal, message_id)
        }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, post: &PostContent) -> Result<Option<String>> {
        if post.body.is_empty() || post.image.is_empty() {
            return Err(PipelineError::Publish(
                "telegram post needs both text and an image".to_string(),
            ));
        }

        let text = sanitize_markdown(&post.full_text());
        let photo = InputFile::memory(post.image.clone()).file_name("image.jpg");

        self.bot
            .send_photo(self.chat.clone(), photo)
            .await
            .map_err(|e| PipelineError::Publish(format!("send_photo failed: {}", e)))?;

        let message = self
            .bot
            .send_message(self.chat.clone(), text)
            .parse_mode(ParseMode::Markdown)
            .await
            .map_err(|e| PipelineError::Publish(format!("send_message failed: {}", e)))?;

        let url = message_link(&self.chat, message.id.0);
        info!("Telegram post published: {}", url);
        Ok(Some(url))
    }

    fn permalink(&self, external_id: &str) -> String {
        // The external id already is the message link.
        external_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_bold_becomes_single_star() {
        assert_eq!(sanitize_markdown("**Title**"), "*Title*");
        assert_eq!(
            sanitize_markdown("# Heading\n**bold** and *italic*"),
            "# Heading\n*bold* and *italic*"
        );
        assert_eq!(sanitize_markdown("**multi\nline**"), "*multi\nline*");
        assert_eq!(sanitize_markdown("no markup"), "no markup");
    }

    #[test]
    fn chat_parsing_handles_ids_and_usernames() {
        assert!(matches!(
            parse_chat("-1001234"),
            Recipient::Id(ChatId(-1001234))
        ));
        assert!(matches!(
            parse_chat("@brewlog"),
            Recipient::ChannelUsername(ref name) if name == "@brewlog"
        ));
        assert!(matches!(
            parse_chat("brewlog"),
            Recipient::ChannelUsername(ref name) if name == "@brewlog"
        ));
    }

    #[test]
    fn message_links_for_public_and_private_chats() {
        let public = Recipient::ChannelUsername("@brewlog".to_string());
        assert_eq!(message_link(&public, 42), "https://t.me/brewlog/42");

        let private = Recipient::Id(ChatId(-1009876));
        assert_eq!(message_link(&private, 42), "https://t.me/c/9876/42");
    }
}
