//! Trait boundaries standing in for collaborators this crate does not
//! implement: conversation history, model invocation, the agent runtime that
//! actually runs tools, periodic summarisation, and long-response artifact
//! sharing. Every one of them is `async_trait` and injected by value (an
//! `Arc<dyn Trait>` field), never a global — mirroring the dependency style
//! the rest of this codebase uses for its own collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::config::ModeConfig;
use crate::message::ContextMessage;

/// What an actor run produced, before any length/artifact handling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResult {
    pub text: String,
    pub total_cost: f64,
    /// The model spec actually billed, used to resolve `(provider, name)`
    /// for `log_llm_call`. `None` when the run incurred no cost.
    pub primary_model: Option<String>,
    pub tool_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AgentResult {
    /// Synthesize the failure result `_run_actor` returns when the agent
    /// runtime itself errors out, so the failure still flows through the
    /// normal reply/persist path instead of aborting the session.
    pub fn failure(err: &anyhow::Error) -> Self {
        AgentResult {
            text: format!("Error: {err}"),
            ..Default::default()
        }
    }
}

/// The run parameters threaded through to the agent runtime, composed from
/// the resolved command plus the owning handler's channel identity.
#[derive(Debug, Clone, Default)]
pub struct ActorRunParams {
    pub mode: String,
    pub reasoning_effort: String,
    pub arc: String,
    pub no_context: bool,
    pub reduce_context: bool,
    pub model: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub extra_prompt: Option<String>,
}

/// Generic "send this text back to the room" callback. Transport adapters
/// (IRC/Discord/Slack) are not modelled; this closure is the only seam.
pub type ReplySender = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Optional post-processing hook applied to an actor's raw text before it is
/// sent, given `(text, mode_key)`.
pub type ResponseCleaner = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Drains any steering messages queued for the running session, formatted
/// as context entries ready to splice into the next LLM call.
pub type SteeringMessageProvider = Arc<dyn Fn() -> BoxFuture<'static, Vec<ContextMessage>> + Send + Sync>;

/// Sends and persists an intermediate progress line (e.g. a tool-call status
/// update) as it happens, rather than waiting for the whole turn to finish.
pub type ProgressCallback = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Persists text as an unsent "internal monologue" history entry.
pub type PersistenceCallback = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// The three callbacks a long-running actor turn needs: to drain steering
/// input, to report progress, and to log its reasoning without sending it.
#[derive(Clone)]
pub struct ActorCallbacks {
    pub steering_message_provider: SteeringMessageProvider,
    pub progress: ProgressCallback,
    pub persistence: PersistenceCallback,
}

/// Conversation history and LLM-call accounting.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get_context_for_message(&self, arc: &str, size: u32) -> anyhow::Result<Vec<ContextMessage>>;

    async fn add_message(&self, arc: &str, role: &str, content: &str) -> anyhow::Result<i64>;

    async fn add_message_with_template(
        &self,
        arc: &str,
        role: &str,
        content: &str,
        content_template: &str,
    ) -> anyhow::Result<i64>;

    async fn add_message_with_mode(
        &self,
        arc: &str,
        role: &str,
        content: &str,
        mode: &str,
        llm_call_id: Option<i64>,
    ) -> anyhow::Result<i64>;

    async fn get_recent_messages_since(
        &self,
        arc: &str,
        nick: &str,
        thread_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ContextMessage>>;

    async fn log_llm_call(&self, arc: &str, provider: &str, model: &str, cost: f64) -> anyhow::Result<i64>;

    async fn update_llm_call_response(&self, llm_call_id: i64, message_id: i64) -> anyhow::Result<()>;

    async fn get_arc_cost_today(&self, arc: &str) -> anyhow::Result<f64>;
}

/// Raw "run this prompt against this model" calls, used uniformly by mode
/// classification and the proactive-interjection validator cascade.
#[async_trait]
pub trait ModelRouter: Send + Sync {
    async fn call_raw_with_model(
        &self,
        model: &str,
        context: &[ContextMessage],
        prompt: &str,
    ) -> anyhow::Result<String>;
}

/// The actual LLM-and-tools agent. Everything this crate knows about a turn
/// (mode, secrets, steering drain, progress reporting) is handed to it here;
/// it is solely responsible for deciding how to use them.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run_actor(
        &self,
        context: &[ContextMessage],
        mode_cfg: &ModeConfig,
        system_prompt: &str,
        secrets: &HashMap<String, String>,
        callbacks: ActorCallbacks,
        run_params: &ActorRunParams,
    ) -> anyhow::Result<Option<AgentResult>>;
}

/// Periodic summarisation of a channel's history, invoked opportunistically
/// after every command and passive handling.
#[async_trait]
pub trait Autochronicler: Send + Sync {
    async fn check_and_chronicle(
        &self,
        mynick: &str,
        server_tag: &str,
        channel_name: &str,
        history_size: u32,
    ) -> anyhow::Result<()>;
}

/// Publishes an oversized response somewhere durable and returns a URL,
/// used by the long-response spill path.
#[async_trait]
pub trait ArtifactSharer: Send + Sync {
    async fn share(&self, full_text: &str) -> anyhow::Result<String>;
}
