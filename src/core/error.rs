//! Error taxonomy for the posting pipeline.
//!
//! Per-run variants (`EmptyTopic` through `Acknowledgment`) are recoverable:
//! the executor logs them and leaves the work item pending for the next
//! trigger. `Configuration` is fatal at startup; `InvalidCron` is rejected
//! at schedule registration.

/// Top-level error type for the content pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or invalid startup configuration. The process does not start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed trigger expression. The schedule is not armed.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// The fetched work item has a blank topic.
    #[error("work item in row {0} has an empty topic")]
    EmptyTopic(u32),

    /// Provider key not present in the registry.
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// Channel key with no registered publisher.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// Transport or parse failure inside a generation provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Capability not offered by the resolved provider.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Bounded status polling exhausted without the job finishing.
    #[error("timed out after {attempts} status polls")]
    Timeout { attempts: u32 },

    /// Text generation failed or produced no content.
    #[error("text generation failed: {0}")]
    TextGeneration(String),

    /// Image generation failed or produced no bytes.
    #[error("image generation failed: {0}")]
    ImageGeneration(String),

    /// The publisher errored or returned no external id.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Work queue transport or protocol failure.
    #[error("work queue error: {0}")]
    Queue(String),

    /// Style memory storage failure.
    #[error("style memory error: {0}")]
    StyleMemory(String),

    /// The queue update failed after the publish side effect already
    /// happened. Surfaced loudly for out-of-band reconciliation; never
    /// retried by re-publishing.
    #[error("acknowledgment failed after publish (external id '{external_id}'): {reason}")]
    Acknowledgment { external_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
