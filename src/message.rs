//! Inbound room message and the key used to scope steering sessions.

use std::collections::HashMap;

/// A single inbound chat message, normalised by the (out-of-scope) transport
/// adapter before it reaches this crate. Immutable per delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomMessage {
    /// Raw server/network identifier, possibly carrying a `discord:`/`slack:`
    /// prefix (see [`crate::resolver::CommandResolver::channel_key`]).
    pub server_tag: String,
    pub channel_name: String,
    pub nick: String,
    /// The bot's own nickname on this network, used for `{mynick}` prompt
    /// substitution and for tagging the bot's own replies back into history.
    pub mynick: String,
    pub content: String,
    /// Opaque conversation-group identifier for cost accounting and
    /// autochronicling. Unrelated to `server_tag`/`channel_name`.
    pub arc: String,
    /// Opaque per-message secrets blob forwarded to the agent runtime
    /// untouched; this crate never inspects it.
    pub secrets: HashMap<String, String>,
    /// Set on threaded platforms; `None` on flat channels.
    pub thread_id: Option<String>,
}

impl RoomMessage {
    /// Build a "reply" message that reuses this message's channel identity
    /// but is authored by the bot, for persisting replies/internal
    /// monologue/rate-limit notices back into history.
    ///
    /// Rust analogue of `dataclasses.replace(msg, nick=msg.mynick, content=...)`.
    pub fn reauthored(&self, content: impl Into<String>) -> RoomMessage {
        RoomMessage {
            nick: self.mynick.clone(),
            content: content.into(),
            ..self.clone()
        }
    }
}

/// Scopes a steering session: shared within a thread, isolated per sender on
/// a flat channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SteeringKey {
    pub arc: String,
    pub scope: String,
    pub thread_id: Option<String>,
}

impl SteeringKey {
    /// Non-threaded steering stays scoped to the same sender; in a thread,
    /// steering is shared by all thread participants.
    pub fn for_message(msg: &RoomMessage) -> SteeringKey {
        match &msg.thread_id {
            Some(thread_id) => SteeringKey {
                arc: msg.arc.clone(),
                scope: "*".to_string(),
                thread_id: Some(thread_id.clone()),
            },
            None => SteeringKey {
                arc: msg.arc.clone(),
                scope: msg.nick.to_lowercase(),
                thread_id: None,
            },
        }
    }
}

/// A single `{role, content}` entry of conversation context, as produced by
/// the history store and consumed by the classifier/validators/actor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContextMessage {
    pub role: String,
    pub content: String,
}

impl ContextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ContextMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Format a queued message as steering context: `{role: "user", content: "<nick> content"}`.
    pub fn steering_context(msg: &RoomMessage) -> ContextMessage {
        ContextMessage::user(format!("<{}> {}", msg.nick, msg.content))
    }
}
