//! Publish capability interface and the per-channel registry.

pub mod telegram;
pub mod vk;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::error::{PipelineError, Result};
use crate::core::types::{Channel, PostContent};

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send the bundle to the network. `Ok(None)` means the channel
    /// rejected the post without a transport error; both outcomes leave
    /// the queue item unacknowledged, they only differ in logging.
    async fn publish(&self, post: &PostContent) -> Result<Option<String>>;

    /// Public URL of a published post, derived from its external id.
    fn permalink(&self, external_id: &str) -> String;
}

/// Channel → publisher map, read-only after startup.
#[derive(Default)]
pub struct PublisherRegistry {
    publishers: HashMap<Channel, Arc<dyn Publisher>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Channel, publisher: Arc<dyn Publisher>) {
        info!("Registered publisher: {}", channel);
        self.publishers.insert(channel, publisher);
    }

    pub fn resolve(&self, channel: Channel) -> Result<Arc<dyn Publisher>> {
        self.publishers
            .get(&channel)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownChannel(channel.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullPublisher;

    #[async_trait]
    impl Publisher for NullPublisher {
        async fn publish(&self, _post: &PostContent) -> Result<Option<String>> {
            Ok(None)
        }

        fn permalink(&self, external_id: &str) -> String {
            external_id.to_string()
        }
    }

    #[test]
    fn unregistered_channel_is_an_error() {
        let mut registry = PublisherRegistry::new();
        registry.register(Channel::Vk, Arc::new(NullPublisher));

        assert!(registry.resolve(Channel::Vk).is_ok());
        assert!(matches!(
            registry.resolve(Channel::Telegram),
            Err(PipelineError::UnknownChannel(_))
        ));
    }
}
