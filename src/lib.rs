//! Chat-room command resolution, steering-session coordination, and
//! proactive-interjection debouncing for a single room/channel.
//!
//! This crate owns none of its collaborators: conversation history, the LLM
//! agent runtime, periodic summarisation, and artifact sharing are all
//! injected through the trait boundaries in [`ports`]. [`handler`] is the
//! top-level orchestrator a transport adapter calls into.

pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod model_spec;
pub mod ports;
pub mod proactive;
pub mod rate_limiter;
pub mod resolver;
pub mod steering_queue;
pub mod text;

pub use error::{CompletionError, ConfigError, TemplateError};
pub use handler::{ProactiveDecision, RoomCommandHandler};
pub use message::{ContextMessage, RoomMessage, SteeringKey};
pub use ports::{
    ActorCallbacks, ActorRunParams, AgentResult, AgentRuntime, ArtifactSharer, Autochronicler, HistoryStore,
    ModelRouter, PersistenceCallback, ProgressCallback, ReplySender, ResponseCleaner, SteeringMessageProvider,
};
pub use resolver::{CommandResolver, ParsedPrefix, ResolvedCommand, Runtime};
