//! Pipeline executor: one generate → publish → persist → acknowledge
//! cycle per invocation.
//!
//! The executor is a pure function of (schedule, collaborators) with side
//! effects; it keeps no state between runs. Every per-run failure is
//! contained at `run`'s boundary — nothing propagates to the scheduler,
//! and a failed run leaves the work item pending so the next trigger
//! retries it.

pub mod image;
pub mod prompt;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::core::error::{PipelineError, Result};
use crate::core::generators::GeneratorRegistry;
use crate::core::memory::StyleMemory;
use crate::core::pipeline::prompt::PromptLibrary;
use crate::core::queue::WorkQueue;
use crate::core::types::{
    Channel, PostContent, STATUS_DONE, ScheduleDefinition, StyleRecord, TextMeta, WorkItemFields,
    columns,
};
use crate::publishers::PublisherRegistry;

/// Immutable collaborators of the executor, built once at startup.
pub struct PipelineContext {
    pub queue: Arc<dyn WorkQueue>,
    pub memory: Arc<dyn StyleMemory>,
    pub generators: Arc<GeneratorRegistry>,
    pub publishers: Arc<PublisherRegistry>,
    pub prompts: PromptLibrary,
    /// Queue tab per channel (the `topic_source` of a schedule).
    pub queue_tabs: HashMap<Channel, String>,
    /// Used when a schedule has no `image_provider` override.
    pub default_image_provider: String,
}

/// What a single run amounted to.
#[derive(Debug)]
pub enum RunOutcome {
    /// No pending work item; a no-op, not an error.
    Idle,
    /// Publish succeeded. When `acknowledged` is false the queue row is
    /// still pending even though the post is out — a reconciliation
    /// concern, never retried by re-publishing.
    Published {
        external_id: String,
        acknowledged: bool,
    },
    /// The run aborted; the work item stays pending for the next tick.
    Failed(PipelineError),
}

pub struct PipelineExecutor {
    ctx: PipelineContext,
}

impl PipelineExecutor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Run one full cycle for `schedule`. Never returns an error: per-run
    /// failures are logged here and folded into the outcome.
    pub async fn run(&self, schedule: &ScheduleDefinition) -> RunOutcome {
        match self.run_inner(schedule).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("[{}] run aborted: {}", schedule.id, err);
                RunOutcome::Failed(err)
            }
        }
    }

    async fn run_inner(&self, schedule: &ScheduleDefinition) -> Result<RunOutcome> {
        let channel = schedule.channel;
        let source = self.ctx.queue_tabs.get(&channel).ok_or_else(|| {
            PipelineError::Configuration(format!("no queue tab configured for channel '{}'", channel))
        })?;

        // 1. Fetch the next pending work item.
        let Some(item) = self.ctx.queue.next_pending(source).await? else {
            info!("[{}] no pending work items", schedule.id);
            return Ok(RunOutcome::Idle);
        };

        // 2. A blank topic is skipped, not published.
        let topic = item.topic().trim().to_string();
        if topic.is_empty() {
            return Err(PipelineError::EmptyTopic(item.handle.0));
        }

        // 3. Stylistic anchor; a channel with no history yields "".
        let example = self
            .ctx
            .memory
            .recall_latest(channel)
            .await?
            .unwrap_or_default();

        // 4. Resolve and render the prompt template.
        let Some(template) = self.ctx.prompts.resolve(&schedule.prompt_key, channel) else {
            return Err(PipelineError::Configuration(format!(
                "prompt template '{}' not found for channel '{}'",
                schedule.prompt_key, channel
            )));
        };
        let prompt = prompt::render(template, &topic, &example);

        // 5. Text generation. Empty output and provider failure are the
        //    same recoverable outcome, logged with distinct causes.
        let generator = self.ctx.generators.resolve_text(&schedule.text_provider)?;
        let generated = generator
            .generate_text(&prompt, None, None)
            .await
            .map_err(|e| PipelineError::TextGeneration(e.to_string()))?;
        if generated.body.trim().is_empty() {
            return Err(PipelineError::TextGeneration(
                "provider returned no content".to_string(),
            ));
        }

        // 6. Title/body split gates image generation.
        let Some((title, body)) = prompt::split_title_body(&generated.body) else {
            return Err(PipelineError::TextGeneration(
                "generated article has no body after the title line".to_string(),
            ));
        };

        // 7. Image generation from the rendered template (not the article).
        let image_key = schedule
            .image_provider
            .as_deref()
            .unwrap_or(&self.ctx.default_image_provider);
        let image_generator = self.ctx.generators.resolve_image(image_key)?;
        let image_bytes = image_generator
            .generate_image(&prompt, None)
            .await
            .map_err(|e| match e {
                PipelineError::Timeout { .. } => e,
                other => PipelineError::ImageGeneration(other.to_string()),
            })?;
        if image_bytes.is_empty() {
            return Err(PipelineError::ImageGeneration(
                "provider returned no image data".to_string(),
            ));
        }

        // 8. Normalize — pure transform, no external call.
        let normalized = image::normalize(&image_bytes)?;

        // 9. Publish. A `None` external id is a normal failure signal.
        let publisher = self.ctx.publishers.resolve(channel)?;
        let post = PostContent {
            title,
            body,
            image: normalized,
        };
        let external_id = match publisher.publish(&post).await? {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(PipelineError::Publish(
                    "publisher returned no external id".to_string(),
                ));
            }
        };
        let published_url = publisher.permalink(&external_id);

        // 10. Remember for style continuity — best-effort, the publish and
        //     the acknowledgment below stand regardless.
        let record = StyleRecord {
            channel,
            item_id: schedule.id.clone(),
            content: post.full_text(),
            url: Some(published_url.clone()),
            metadata: record_metadata(schedule, &generated.meta),
            created_at: Utc::now(),
        };
        if let Err(e) = self.ctx.memory.remember(record).await {
            warn!("[{}] style memory write failed (publish stands): {}", schedule.id, e);
        }

        // 11. Acknowledge. The publish cannot be undone, so a failure here
        //     is flagged for reconciliation instead of retried.
        let fields = done_fields(schedule, &generated.meta, &published_url);
        match self.ctx.queue.mark_done(source, item.handle, &fields).await {
            Ok(()) => {
                info!(
                    "[{}] row {} marked done ({})",
                    schedule.id, item.handle.0, published_url
                );
                Ok(RunOutcome::Published {
                    external_id,
                    acknowledged: true,
                })
            }
            Err(e) => {
                let err = PipelineError::Acknowledgment {
                    external_id: external_id.clone(),
                    reason: e.to_string(),
                };
                error!("[{}] RECONCILIATION REQUIRED: {}", schedule.id, err);
                Ok(RunOutcome::Published {
                    external_id,
                    acknowledged: false,
                })
            }
        }
    }
}

fn record_metadata(schedule: &ScheduleDefinition, meta: &TextMeta) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert(columns::PROVIDER.to_string(), schedule.text_provider.clone());
    if let Some(model) = &meta.model {
        metadata.insert(columns::MODEL.to_string(), model.clone());
    }
    metadata.insert(columns::NOTES.to_string(), meta.notes());
    metadata
}

fn done_fields(
    schedule: &ScheduleDefinition,
    meta: &TextMeta,
    published_url: &str,
) -> WorkItemFields {
    let mut fields = WorkItemFields::new();
    fields.insert(columns::STATUS.to_string(), STATUS_DONE.to_string());
    fields.insert(
        columns::SCHEDULED_AT.to_string(),
        Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    fields.insert(columns::PUBLISHED_URL.to_string(), published_url.to_string());
    fields.insert(columns::PROVIDER.to_string(), schedule.text_provider.clone());
    fields.insert(
        columns::MODEL.to_string(),
        meta.model.clone().unwrap_or_default(),
    );
    fields.insert(columns::NOTES.to_string(), meta.notes());
    fields
}
