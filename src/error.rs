//! Error types for command resolution, steering, and orchestration.

use thiserror::Error;

/// Fatal, construction-time configuration problems.
///
/// These prevent a [`crate::resolver::CommandResolver`] or
/// [`crate::handler::RoomCommandHandler`] from being built at all; they are
/// never surfaced to a chat user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mode '{mode_key}' must define at least one trigger")]
    ModeWithoutTrigger { mode_key: String },

    #[error("invalid trigger '{trigger}' for mode '{mode_key}': triggers must start with '!'")]
    InvalidTrigger { mode_key: String, trigger: String },

    #[error("duplicate trigger '{trigger}' in command mode config")]
    DuplicateTrigger { trigger: String },

    #[error("command.mode_classifier.labels must not be empty")]
    EmptyClassifierLabels,

    #[error("classifier label '{label}' points to unknown trigger '{trigger}'")]
    UnknownClassifierTarget { label: String, trigger: String },

    #[error("classifier fallback label '{label}' is not defined")]
    UnknownFallbackLabel { label: String },

    #[error("room config does not match the expected shape: {0}")]
    Deserialize(String),
}

/// A fatal error raised while substituting `{!trigger_model}` placeholders
/// into a mode's prompt template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("prompt placeholder '{{{trigger}_model}}' references unknown trigger")]
    UnknownTriggerPlaceholder { trigger: String },

    #[error("command mode '{mode}' not found in config")]
    UnknownMode { mode: String },
}

/// Errors that can reach a caller of [`crate::steering_queue::SteeringQueue`]
/// completion futures: either the session was aborted with a cause, or the
/// sender side of the completion channel was dropped without resolving it
/// (a bug, not an expected outcome).
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("steering session aborted: {0}")]
    Aborted(#[from] std::sync::Arc<anyhow::Error>),

    #[error("completion sender dropped without resolving")]
    SenderDropped,
}
