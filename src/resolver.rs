//! Prefix parsing and channel-policy resolution (§4.1).
//!
//! [`CommandResolver`] is built once at startup from a validated
//! [`CommandConfig`] and is immutable thereafter: every trigger/label lookup
//! used at message-handling time is a plain map lookup against structures
//! indexed during construction, never a runtime re-validation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::CommandConfig;
use crate::error::ConfigError;
use crate::message::{ContextMessage, RoomMessage};
use crate::model_spec::model_str_core;
use crate::ports::ModelRouter;
use crate::text::strip_irc_nick_prefix;

const HELP_TOKEN: &str = "!h";
const FLAG_TOKENS: &[&str] = &["!c"];

/// The outcome of tokenising a raw message against the known trigger/flag
/// vocabulary, before any channel policy or classifier is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPrefix {
    pub no_context: bool,
    pub mode_token: Option<String>,
    pub model_override: Option<String>,
    pub query_text: String,
    pub error: Option<String>,
}

/// A mode's fully composed runtime parameters: per-trigger overrides layered
/// on mode-level settings, layered on hard defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Runtime {
    pub reasoning_effort: String,
    pub allowed_tools: Option<Vec<String>>,
    pub steering: bool,
    /// Trigger-level model override, if any. `None` means "use the mode's
    /// own model", which is the [`crate::ports::AgentRuntime`] implementor's
    /// job to resolve from the mode config it is also given.
    pub model: Option<String>,
    pub history_size: u32,
}

/// The fully resolved outcome of a single inbound message: either an error,
/// a help request, or a mode/trigger/runtime selection ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    pub no_context: bool,
    pub query_text: String,
    pub model_override: Option<String>,
    pub selected_label: Option<String>,
    pub selected_trigger: Option<String>,
    pub mode_key: Option<String>,
    pub runtime: Option<Runtime>,
    pub error: Option<String>,
    pub help_requested: bool,
    pub channel_mode: Option<String>,
    pub selected_automatically: bool,
}

impl ResolvedCommand {
    fn error(query_text: String, message: String) -> Self {
        ResolvedCommand {
            no_context: false,
            query_text,
            model_override: None,
            selected_label: None,
            selected_trigger: None,
            mode_key: None,
            runtime: None,
            error: Some(message),
            help_requested: false,
            channel_mode: None,
            selected_automatically: false,
        }
    }

    fn help(parsed: &ParsedPrefix) -> Self {
        ResolvedCommand {
            no_context: parsed.no_context,
            query_text: parsed.query_text.clone(),
            model_override: parsed.model_override.clone(),
            selected_label: None,
            selected_trigger: None,
            mode_key: None,
            runtime: None,
            error: None,
            help_requested: true,
            channel_mode: None,
            selected_automatically: false,
        }
    }
}

pub struct CommandResolver {
    command_config: CommandConfig,
    model_router: Arc<dyn ModelRouter>,
    help_token: String,
    flag_tokens: HashSet<String>,
    trigger_to_mode: HashMap<String, String>,
    default_trigger_by_mode: HashMap<String, String>,
    fallback_classifier_label: String,
}

impl CommandResolver {
    pub fn new(command_config: CommandConfig, model_router: Arc<dyn ModelRouter>) -> Result<Self, ConfigError> {
        Self::with_tokens(command_config, model_router, HELP_TOKEN, FLAG_TOKENS.iter().copied())
    }

    pub fn with_tokens(
        command_config: CommandConfig,
        model_router: Arc<dyn ModelRouter>,
        help_token: impl Into<String>,
        flag_tokens: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ConfigError> {
        let help_token = help_token.into();
        let flag_tokens: HashSet<String> = flag_tokens.into_iter().map(Into::into).collect();

        let mut trigger_to_mode = HashMap::new();
        let mut default_trigger_by_mode = HashMap::new();

        for (mode_key, mode_cfg) in command_config.modes.iter() {
            if mode_cfg.triggers.is_empty() {
                return Err(ConfigError::ModeWithoutTrigger {
                    mode_key: mode_key.to_string(),
                });
            }
            default_trigger_by_mode.insert(
                mode_key.to_string(),
                mode_cfg
                    .triggers
                    .first_key()
                    .expect("just checked non-empty")
                    .to_string(),
            );
            for trigger in mode_cfg.triggers.keys() {
                if !trigger.starts_with('!') {
                    return Err(ConfigError::InvalidTrigger {
                        mode_key: mode_key.to_string(),
                        trigger: trigger.to_string(),
                    });
                }
                if trigger_to_mode.contains_key(trigger) {
                    return Err(ConfigError::DuplicateTrigger {
                        trigger: trigger.to_string(),
                    });
                }
                trigger_to_mode.insert(trigger.to_string(), mode_key.to_string());
            }
        }

        let labels = &command_config.mode_classifier.labels;
        if labels.is_empty() {
            return Err(ConfigError::EmptyClassifierLabels);
        }
        for (label, trigger) in labels.iter() {
            if !trigger_to_mode.contains_key(trigger) {
                return Err(ConfigError::UnknownClassifierTarget {
                    label: label.to_string(),
                    trigger: trigger.to_string(),
                });
            }
        }
        let fallback_classifier_label = command_config
            .mode_classifier
            .fallback_label
            .clone()
            .unwrap_or_else(|| labels.first_key().expect("just checked non-empty").to_string());
        if !labels.contains_key(&fallback_classifier_label) {
            return Err(ConfigError::UnknownFallbackLabel {
                label: fallback_classifier_label,
            });
        }

        Ok(CommandResolver {
            command_config,
            model_router,
            help_token,
            flag_tokens,
            trigger_to_mode,
            default_trigger_by_mode,
            fallback_classifier_label,
        })
    }

    pub fn command_config(&self) -> &CommandConfig {
        &self.command_config
    }

    /// Tokenise `text` against the known flag/trigger/`@model` vocabulary.
    pub fn parse_prefix(&self, text: &str) -> ParsedPrefix {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ParsedPrefix::default();
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let mut no_context = false;
        let mut mode_token: Option<String> = None;
        let mut model_override: Option<String> = None;
        let mut error: Option<String> = None;
        let mut consumed = 0usize;

        for (i, tok) in tokens.iter().enumerate() {
            if self.flag_tokens.contains(*tok) {
                no_context = true;
                consumed = i + 1;
                continue;
            }
            if *tok == self.help_token || self.trigger_to_mode.contains_key(*tok) {
                if mode_token.is_some() {
                    error = Some("Only one mode command allowed.".to_string());
                    break;
                }
                mode_token = Some((*tok).to_string());
                consumed = i + 1;
                continue;
            }
            if tok.len() > 1 && tok.starts_with('@') {
                if model_override.is_none() {
                    model_override = Some(tok[1..].to_string());
                }
                consumed = i + 1;
                continue;
            }
            if tok.starts_with('!') {
                error = Some(format!(
                    "Unknown command '{tok}'. Use {} for help.",
                    self.help_token
                ));
                break;
            }
            break;
        }

        let query_text = if consumed > 0 {
            tokens[consumed..].join(" ")
        } else {
            trimmed.to_string()
        };

        ParsedPrefix {
            no_context,
            mode_token,
            model_override,
            query_text,
            error,
        }
    }

    /// The mode key that owns `trigger`, if any.
    pub fn mode_for_trigger(&self, trigger: &str) -> Option<&str> {
        self.trigger_to_mode.get(trigger).map(String::as_str)
    }

    /// Compose a trigger's full runtime: per-trigger overrides layered on
    /// mode-level settings, layered on hard defaults. Returns the owning
    /// `mode_key` alongside it.
    pub fn runtime_for_trigger(&self, trigger: &str) -> Option<(String, Runtime)> {
        let mode_key = self.trigger_to_mode.get(trigger)?.clone();
        let mode_cfg = self.command_config.modes.get(&mode_key)?;
        let overrides = mode_cfg.triggers.get(trigger)?;

        let reasoning_effort = overrides
            .reasoning_effort
            .clone()
            .or_else(|| mode_cfg.reasoning_effort.clone())
            .unwrap_or_else(|| "minimal".to_string());
        let allowed_tools = overrides
            .allowed_tools
            .clone()
            .or_else(|| mode_cfg.allowed_tools.clone());
        let steering = overrides.steering.unwrap_or(mode_cfg.steering);
        let model = overrides.model.as_ref().map(|m| m.primary().to_string());
        let history_size = mode_cfg.history_size.unwrap_or(self.command_config.history_size);

        Some((
            mode_key,
            Runtime {
                reasoning_effort,
                allowed_tools,
                steering,
                model,
                history_size,
            },
        ))
    }

    /// The trigger a classifier label maps to, falling back to the
    /// fallback label's trigger (and logging) for an unrecognised label.
    pub fn trigger_for_label(&self, label: &str) -> String {
        match self.command_config.mode_classifier.labels.get(label) {
            Some(trigger) => trigger.clone(),
            None => {
                tracing::warn!(
                    label,
                    fallback = %self.fallback_classifier_label,
                    "unknown classifier label, using fallback"
                );
                self.command_config
                    .mode_classifier
                    .labels
                    .get(&self.fallback_classifier_label)
                    .cloned()
                    .expect("fallback label validated at construction")
            }
        }
    }

    pub fn normalize_server_tag(server_tag: &str) -> &str {
        server_tag
            .strip_prefix("discord:")
            .or_else(|| server_tag.strip_prefix("slack:"))
            .unwrap_or(server_tag)
    }

    pub fn channel_key(server_tag: &str, channel_name: &str) -> String {
        format!("{}#{}", Self::normalize_server_tag(server_tag), channel_name)
    }

    pub fn get_channel_mode(&self, server_tag: &str, channel_name: &str) -> String {
        let key = Self::channel_key(server_tag, channel_name);
        self.command_config
            .channel_modes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.command_config.default_mode.clone())
    }

    /// Whether `msg` will certainly bypass the steering queue, decided
    /// without running the (async, costly) classifier.
    pub fn should_bypass_steering_queue(&self, msg: &RoomMessage) -> bool {
        let parsed = self.parse_prefix(&msg.content);
        if parsed.error.is_some() || parsed.no_context {
            return true;
        }
        if parsed.mode_token.as_deref() == Some(self.help_token.as_str()) {
            return true;
        }
        if let Some(token) = &parsed.mode_token {
            return match self.runtime_for_trigger(token) {
                Some((_, runtime)) => !runtime.steering,
                None => false,
            };
        }

        let channel_mode = self.get_channel_mode(&msg.server_tag, &msg.channel_name);
        if let Some((_, runtime)) = self.runtime_for_trigger(&channel_mode) {
            return !runtime.steering;
        }
        if let Some(default_trigger) = self.default_trigger_by_mode.get(&channel_mode) {
            if let Some((_, runtime)) = self.runtime_for_trigger(default_trigger) {
                return !runtime.steering;
            }
        }
        false
    }

    pub fn build_help_message(&self, server_tag: &str, channel_name: &str) -> String {
        let classifier_model = &self.command_config.mode_classifier.model;
        let channel_mode = self.get_channel_mode(server_tag, channel_name);

        let default_desc = if channel_mode == "classifier" {
            format!("automatic mode ({classifier_model} decides)")
        } else if let Some(constrained) = channel_mode.strip_prefix("classifier:") {
            format!("automatic mode constrained to {constrained}")
        } else if let Some(mode_key) = self.trigger_to_mode.get(&channel_mode) {
            format!("forced trigger {channel_mode} ({mode_key})")
        } else if self.command_config.modes.contains_key(&channel_mode) {
            format!("forced mode {channel_mode}")
        } else {
            format!("{channel_mode} mode")
        };

        let mut mode_parts = Vec::new();
        for (mode_key, mode_cfg) in self.command_config.modes.iter() {
            if mode_cfg.triggers.is_empty() {
                continue;
            }
            let trigger_list: Vec<&str> = mode_cfg.triggers.keys().collect();
            let model_desc = model_str_core(mode_cfg.model.primary());
            mode_parts.push(format!("{} = {mode_key} ({model_desc})", trigger_list.join("/")));
        }

        format!(
            "default is {default_desc}; modes: {}; use @modelid to override the model for this message; {} disables context",
            mode_parts.join(", "),
            FLAG_TOKENS.first().copied().unwrap_or("!c")
        )
    }

    /// Run the mode classifier on `context`, returning the winning label.
    /// Any failure (transport error, empty response, no label matched)
    /// falls back to the configured fallback label rather than erroring.
    pub async fn classify_mode(&self, context: &[ContextMessage]) -> String {
        let Some(current) = context.last() else {
            tracing::error!("cannot classify mode from empty context");
            return self.fallback_classifier_label.clone();
        };
        let current_message = strip_irc_nick_prefix(&current.content);
        let prompt = self
            .command_config
            .mode_classifier
            .prompt
            .replace("{message}", &current_message);

        let response = match self
            .model_router
            .call_raw_with_model(&self.command_config.mode_classifier.model, context, &prompt)
            .await
        {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!(error = %err, "mode classifier call failed, using fallback");
                return self.fallback_classifier_label.clone();
            }
        };

        let response_upper = response.to_uppercase();
        let mut best_label: Option<String> = None;
        let mut best_count = 0usize;
        for (label, _trigger) in self.command_config.mode_classifier.labels.iter() {
            let count = response_upper.matches(&label.to_uppercase()).count();
            if best_label.is_none() || count > best_count {
                best_label = Some(label.to_string());
                best_count = count;
            }
        }

        match best_label {
            Some(label) if best_count > 0 => label,
            _ => {
                tracing::warn!(response = %response, "no classifier label matched response, using fallback");
                self.fallback_classifier_label.clone()
            }
        }
    }

    /// Resolve `msg` against `context` into a fully specified command, per
    /// §4.1's channel-policy resolution order. `default_size` bounds how
    /// much of `context` a `classifier:MODE` policy considers.
    pub async fn resolve(
        &self,
        msg: &RoomMessage,
        context: &[ContextMessage],
        default_size: usize,
    ) -> ResolvedCommand {
        let parsed = self.parse_prefix(&msg.content);

        if let Some(err) = parsed.error {
            return ResolvedCommand::error(parsed.query_text, err);
        }
        if parsed.mode_token.as_deref() == Some(self.help_token.as_str()) {
            return ResolvedCommand::help(&parsed);
        }

        if let Some(trigger) = parsed.mode_token.clone() {
            return match self.runtime_for_trigger(&trigger) {
                Some((mode_key, runtime)) => ResolvedCommand {
                    no_context: parsed.no_context,
                    query_text: parsed.query_text,
                    model_override: parsed.model_override,
                    selected_label: None,
                    selected_trigger: Some(trigger),
                    mode_key: Some(mode_key),
                    runtime: Some(runtime),
                    error: None,
                    help_requested: false,
                    channel_mode: None,
                    selected_automatically: false,
                },
                None => ResolvedCommand::error(parsed.query_text, format!("Unknown trigger '{trigger}'.")),
            };
        }

        let channel_mode = self.get_channel_mode(&msg.server_tag, &msg.channel_name);

        if channel_mode == "classifier" {
            let label = self.classify_mode(context).await;
            let trigger = self.trigger_for_label(&label);
            return self.finish_automatic(parsed, channel_mode, Some(label), trigger);
        }

        if let Some(constrained_mode) = channel_mode.strip_prefix("classifier:") {
            if !self.command_config.modes.contains_key(constrained_mode) {
                return ResolvedCommand::error(
                    parsed.query_text,
                    format!("Unknown channel mode policy '{channel_mode}'"),
                );
            }
            let window_start = context.len().saturating_sub(default_size);
            let label = self.classify_mode(&context[window_start..]).await;
            let trigger = self.trigger_for_label(&label);
            let resolved_mode = self.trigger_to_mode.get(&trigger).cloned();
            let trigger = if resolved_mode.as_deref() == Some(constrained_mode) {
                trigger
            } else {
                match self.default_trigger_by_mode.get(constrained_mode) {
                    Some(default_trigger) => default_trigger.clone(),
                    None => {
                        return ResolvedCommand::error(
                            parsed.query_text,
                            format!("Unknown channel mode policy '{channel_mode}'"),
                        );
                    }
                }
            };
            return self.finish_automatic(parsed, channel_mode, Some(label), trigger);
        }

        if self.trigger_to_mode.contains_key(&channel_mode) {
            let trigger = channel_mode.clone();
            return self.finish_automatic(parsed, channel_mode, None, trigger);
        }

        if let Some(default_trigger) = self.default_trigger_by_mode.get(&channel_mode) {
            let trigger = default_trigger.clone();
            return self.finish_automatic(parsed, channel_mode, None, trigger);
        }

        ResolvedCommand::error(
            parsed.query_text,
            format!("Unknown channel mode policy '{channel_mode}'"),
        )
    }

    fn finish_automatic(
        &self,
        parsed: ParsedPrefix,
        channel_mode: String,
        selected_label: Option<String>,
        trigger: String,
    ) -> ResolvedCommand {
        match self.runtime_for_trigger(&trigger) {
            Some((mode_key, runtime)) => ResolvedCommand {
                no_context: parsed.no_context,
                query_text: parsed.query_text,
                model_override: parsed.model_override,
                selected_label,
                selected_trigger: Some(trigger),
                mode_key: Some(mode_key),
                runtime: Some(runtime),
                error: None,
                help_requested: false,
                channel_mode: Some(channel_mode),
                selected_automatically: true,
            },
            None => ResolvedCommand::error(parsed.query_text, format!("Unknown trigger '{trigger}'.")),
        }
    }
}
