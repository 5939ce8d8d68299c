//! Prompt template resolution and rendering.

use std::collections::HashMap;

use crate::core::types::Channel;

/// Prompt templates keyed by name, with optional channel-suffixed
/// variants (`daily_vk` beats `daily` when publishing to VK).
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl PromptLibrary {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn resolve(&self, key: &str, channel: Channel) -> Option<&str> {
        let suffixed = format!("{}_{}", key, channel.as_str());
        self.templates
            .get(&suffixed)
            .or_else(|| self.templates.get(key))
            .map(String::as_str)
    }
}

/// Substitute the topic and style example into a template.
pub fn render(template: &str, idea: &str, example: &str) -> String {
    template
        .replace("{idea}", idea)
        .replace("{example}", example)
}

/// Split generated text into a title line and the remaining body.
/// Returns `None` when nothing but the title survives trimming —
/// malformed output that must not be published.
pub fn split_title_body(text: &str) -> Option<(String, String)> {
    let mut lines = text.lines();
    let title = lines.next()?.trim().to_string();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    if body.is_empty() {
        return None;
    }
    Some((title, body))
}
