//! The orchestrator (§4.4): wires [`CommandResolver`], [`SteeringQueue`],
//! [`ProactiveDebouncer`], rate limiters, and the injected ports together
//! into the two inbound entry points a transport adapter calls:
//! [`RoomCommandHandler::handle_command`] and
//! [`RoomCommandHandler::handle_passive_message`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use regex::Regex;

use crate::config::RoomConfig;
use crate::error::{ConfigError, TemplateError};
use crate::message::{ContextMessage, RoomMessage, SteeringKey};
use crate::model_spec::{model_str_core, parse_model_spec};
use crate::ports::{
    ActorCallbacks, ActorRunParams, AgentResult, AgentRuntime, ArtifactSharer, Autochronicler, HistoryStore,
    ModelRouter, PersistenceCallback, ProgressCallback, ReplySender, ResponseCleaner, SteeringMessageProvider,
};
use crate::proactive::{ProactiveCallback, ProactiveDebouncer};
use crate::rate_limiter::RateLimiter;
use crate::resolver::CommandResolver;
use crate::steering_queue::{fail_item, finish_item, InboundKind, SteeringQueue};
use crate::text::strip_loose_sender_prefix;

static TRIGGER_MODEL_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(![\w-]+)_model\}").unwrap());
static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s*/\s*10").unwrap());

fn parse_score(response: &str) -> Option<u32> {
    SCORE_RE.captures(response)?.get(1)?.as_str().parse().ok()
}

fn truncate_utf8_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Truncate `text` to fit `max_bytes` (including the appended link), never
/// splitting a UTF-8 character, preferring to end at a sentence or word
/// boundary within the last 100 characters kept.
fn truncate_with_artifact_link(text: &str, max_bytes: usize, url: &str) -> String {
    let tail = format!("... full response: {url}");
    let budget = max_bytes.saturating_sub(tail.len());
    let truncated = truncate_utf8_boundary(text, budget);

    let window_start = truncated
        .char_indices()
        .rev()
        .take(100)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window = &truncated[window_start..];
    let truncated = if let Some(pos) = window.rfind('.') {
        &truncated[..window_start + pos + 1]
    } else if let Some(pos) = window.rfind(' ') {
        &truncated[..window_start + pos]
    } else {
        truncated
    };

    format!("{truncated}{tail}")
}

fn last_n(context: &[ContextMessage], n: usize) -> Vec<ContextMessage> {
    let start = context.len().saturating_sub(n);
    context[start..].to_vec()
}

/// Outcome of the proactive validator cascade (§4.4's `should_interject_proactively`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProactiveDecision {
    NoInterject,
    Interject { score: u32 },
    TestMode { score: u32 },
}

/// Orchestrates a single room/channel's command and passive-message
/// handling, wiring the resolver, steering queue, proactive debouncer, rate
/// limiters, and every injected port together.
pub struct RoomCommandHandler {
    room_config: RoomConfig,
    resolver: CommandResolver,
    steering_queue: Arc<SteeringQueue>,
    proactive_debouncer: Arc<ProactiveDebouncer>,
    command_rate_limiter: Arc<dyn RateLimiter>,
    proactive_rate_limiter: Arc<dyn RateLimiter>,
    model_router: Arc<dyn ModelRouter>,
    history: Arc<dyn HistoryStore>,
    agent_runtime: Arc<dyn AgentRuntime>,
    autochronicler: Arc<dyn Autochronicler>,
    artifact_sharer: Arc<dyn ArtifactSharer>,
    response_cleaner: Option<ResponseCleaner>,
    self_weak: Weak<RoomCommandHandler>,
}

impl RoomCommandHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room_config: RoomConfig,
        model_router: Arc<dyn ModelRouter>,
        history: Arc<dyn HistoryStore>,
        agent_runtime: Arc<dyn AgentRuntime>,
        autochronicler: Arc<dyn Autochronicler>,
        artifact_sharer: Arc<dyn ArtifactSharer>,
        command_rate_limiter: Arc<dyn RateLimiter>,
        proactive_rate_limiter: Arc<dyn RateLimiter>,
        response_cleaner: Option<ResponseCleaner>,
    ) -> Result<Arc<Self>, ConfigError> {
        let resolver = CommandResolver::new(room_config.command.clone(), model_router.clone())?;
        let proactive_debouncer =
            ProactiveDebouncer::new(Duration::from_secs_f64(room_config.proactive.debounce_seconds));

        Ok(Arc::new_cyclic(|weak| RoomCommandHandler {
            room_config,
            resolver,
            steering_queue: Arc::new(SteeringQueue::new()),
            proactive_debouncer,
            command_rate_limiter,
            proactive_rate_limiter,
            model_router,
            history,
            agent_runtime,
            autochronicler,
            artifact_sharer,
            response_cleaner,
            self_weak: weak.clone(),
        }))
    }

    /// Upgrade this handler's own weak self-reference, for building
    /// callbacks (the proactive debounce callback) that must outlive the
    /// call that created them. Only ever called on a handler already held
    /// in an `Arc`, which [`RoomCommandHandler::new`] guarantees.
    fn arc_self(&self) -> Arc<Self> {
        self.self_weak
            .upgrade()
            .expect("RoomCommandHandler accessed after its own Arc was dropped")
    }

    fn max_history_size(&self) -> u32 {
        let command_config = self.resolver.command_config();
        let widest_mode = command_config
            .modes
            .iter()
            .filter_map(|(_, mode_cfg)| mode_cfg.history_size)
            .max()
            .unwrap_or(0);
        command_config.history_size.max(widest_mode)
    }

    fn trigger_model_core(&self, trigger: &str, current_mode: &str, model_override: Option<&str>) -> Option<String> {
        let mode_key = self.resolver.mode_for_trigger(trigger)?;
        if mode_key == current_mode {
            if let Some(ov) = model_override {
                return Some(model_str_core(ov));
            }
        }
        let mode_cfg = self.resolver.command_config().modes.get(mode_key)?;
        let overrides = mode_cfg.triggers.get(trigger)?;
        let spec = overrides
            .model
            .as_ref()
            .map(|m| m.primary().to_string())
            .unwrap_or_else(|| mode_cfg.model.primary().to_string());
        Some(model_str_core(&spec))
    }

    /// Substitute `{mynick}`, `{current_time}`, every `prompt_vars` entry,
    /// and any `{!trigger_model}` placeholder into `mode`'s prompt template.
    /// An unknown trigger placeholder is a fatal [`TemplateError`].
    pub fn build_system_prompt(
        &self,
        mode: &str,
        mynick: &str,
        model_override: Option<&str>,
    ) -> Result<String, TemplateError> {
        let mode_cfg = self
            .resolver
            .command_config()
            .modes
            .get(mode)
            .ok_or_else(|| TemplateError::UnknownMode { mode: mode.to_string() })?;

        let mut result = String::with_capacity(mode_cfg.prompt.len());
        let mut last_end = 0;
        for caps in TRIGGER_MODEL_PLACEHOLDER_RE.captures_iter(&mode_cfg.prompt) {
            let whole = caps.get(0).expect("group 0 always matches");
            let trigger = caps.get(1).expect("capture group 1 is required by the pattern").as_str();
            let core = self
                .trigger_model_core(trigger, mode, model_override)
                .ok_or_else(|| TemplateError::UnknownTriggerPlaceholder {
                    trigger: trigger.to_string(),
                })?;
            result.push_str(&mode_cfg.prompt[last_end..whole.start()]);
            result.push_str(&core);
            last_end = whole.end();
        }
        result.push_str(&mode_cfg.prompt[last_end..]);

        let current_time = chrono::Local::now().format("%Y-%m-%d %H:%M").to_string();
        result = result.replace("{mynick}", mynick);
        result = result.replace("{current_time}", &current_time);
        for (key, value) in &self.room_config.prompt_vars {
            result = result.replace(&format!("{{{key}}}"), value);
        }

        Ok(result)
    }

    pub fn should_ignore_user(&self, nick: &str) -> bool {
        self.resolver
            .command_config()
            .ignore_users
            .iter()
            .any(|ignored| ignored.eq_ignore_ascii_case(nick))
    }

    /// Run the mode classifier. A thin pass-through to the resolver, which
    /// owns the model router and fallback-label bookkeeping needed for it.
    pub async fn classify_mode(&self, context: &[ContextMessage]) -> String {
        self.resolver.classify_mode(context).await
    }

    /// Run the proactive validator cascade over `context`'s last message.
    pub async fn should_interject_proactively(&self, context: &[ContextMessage]) -> ProactiveDecision {
        let Some(current) = context.last() else {
            return ProactiveDecision::NoInterject;
        };
        let stripped = strip_loose_sender_prefix(&current.content);
        let proactive = &self.room_config.proactive;
        let prompt = proactive.prompts.interject.replace("{message}", &stripped);
        let threshold = proactive.interject_threshold;

        let mut last_score = None;
        for model in &proactive.models.validation {
            let response = match self.model_router.call_raw_with_model(model, context, &prompt).await {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!(error = %err, model, "proactive validator call failed");
                    return ProactiveDecision::NoInterject;
                }
            };
            if response.trim().is_empty() || response.starts_with("API error:") {
                tracing::warn!(model, "proactive validator returned an empty or error response");
                return ProactiveDecision::NoInterject;
            }
            let Some(score) = parse_score(&response) else {
                tracing::warn!(model, response = %response, "proactive validator response had no N/10 score");
                return ProactiveDecision::NoInterject;
            };
            if score + 1 < threshold {
                return ProactiveDecision::NoInterject;
            }
            last_score = Some(score);
        }

        match last_score {
            Some(score) if score >= threshold => ProactiveDecision::Interject { score },
            Some(score) => ProactiveDecision::TestMode { score },
            None => ProactiveDecision::NoInterject,
        }
    }

    async fn run_actor(
        &self,
        context: &[ContextMessage],
        mode: &str,
        system_prompt: &str,
        secrets: &HashMap<String, String>,
        callbacks: ActorCallbacks,
        run_params: &ActorRunParams,
    ) -> Option<AgentResult> {
        let Some(mode_cfg) = self.resolver.command_config().modes.get(mode) else {
            tracing::error!(mode, "run_actor called with an unknown mode");
            return None;
        };
        let mut mode_cfg = mode_cfg.clone();
        let mut run_params = run_params.clone();

        let mut effective_context = context.to_vec();
        if run_params.no_context {
            if let Some(last) = effective_context.last().cloned() {
                effective_context = vec![last];
            }
            mode_cfg.include_chapter_summary = Some(false);
        } else if mode_cfg.auto_reduce_context.unwrap_or(false) && effective_context.len() > 1 {
            run_params.reduce_context = true;
        }

        match self
            .agent_runtime
            .run_actor(&effective_context, &mode_cfg, system_prompt, secrets, callbacks, &run_params)
            .await
        {
            Ok(Some(result)) => Some(self.apply_length_limit(result).await),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "actor run failed");
                Some(AgentResult::failure(&err))
            }
        }
    }

    async fn apply_length_limit(&self, mut result: AgentResult) -> AgentResult {
        let limit = self.room_config.command.response_max_bytes;
        if result.text.len() <= limit {
            result.text = result.text.trim().to_string();
            return result;
        }
        match self.artifact_sharer.share(&result.text).await {
            Ok(url) => {
                result.text = truncate_with_artifact_link(&result.text, limit, &url);
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to share long response as an artifact");
                result.text = truncate_utf8_boundary(&result.text, limit).trim().to_string();
            }
        }
        result
    }

    /// Entry point for an explicit command. Cancels any pending proactive
    /// check for the channel, then either runs inline (steering bypassed)
    /// or enters the steering queue.
    pub async fn handle_command(
        &self,
        msg: RoomMessage,
        trigger_message_id: i64,
        reply_sender: ReplySender,
    ) -> anyhow::Result<()> {
        let channel_key = CommandResolver::channel_key(&msg.server_tag, &msg.channel_name);
        self.proactive_debouncer.cancel_channel(&channel_key).await;

        if self.resolver.should_bypass_steering_queue(&msg) {
            let key = SteeringKey::for_message(&msg);
            return self.handle_command_core(msg, reply_sender, key).await;
        }

        self.run_or_queue_command(msg, trigger_message_id, reply_sender).await
    }

    async fn run_or_queue_command(
        &self,
        msg: RoomMessage,
        trigger_message_id: i64,
        reply_sender: ReplySender,
    ) -> anyhow::Result<()> {
        let (is_runner, key, item, completion) = self
            .steering_queue
            .enqueue_command_or_start_runner(msg, trigger_message_id, reply_sender)
            .await;

        if !is_runner {
            return completion.wait().await.map_err(anyhow::Error::from);
        }

        let mut current = item;
        loop {
            let result = match current.kind {
                InboundKind::Command { .. } => {
                    self.handle_command_core(current.msg.clone(), current.reply_sender.clone(), key.clone())
                        .await
                }
                InboundKind::Passive => {
                    self.handle_passive_message_core(current.msg.clone(), current.reply_sender.clone())
                        .await
                }
            };

            if let Err(err) = result {
                let err = Arc::new(err);
                self.steering_queue.abort_session(&key, err.clone()).await;
                fail_item(&current, err.clone());
                return Err(anyhow::anyhow!("{err}"));
            }

            finish_item(&current);
            let (dropped, next) = self.steering_queue.take_next_work_compacted(&key).await;
            for dropped_item in dropped {
                finish_item(&dropped_item);
            }
            match next {
                Some(next_item) => current = next_item,
                None => break,
            }
        }
        Ok(())
    }

    async fn handle_command_core(
        &self,
        msg: RoomMessage,
        reply_sender: ReplySender,
        key: SteeringKey,
    ) -> anyhow::Result<()> {
        if !self.command_rate_limiter.check_limit() {
            let reply = format!("{}: Slow down a little, will you? (rate limiting)", msg.nick);
            reply_sender(reply.clone()).await?;
            let reply_msg = msg.reauthored(reply);
            self.history
                .add_message(&reply_msg.arc, "assistant", &reply_msg.content)
                .await?;
            return Ok(());
        }

        let max_history = self.max_history_size();
        let mut context = self.history.get_context_for_message(&msg.arc, max_history).await?;

        let debounce = self.room_config.command.debounce;
        if debounce > 0.0 {
            let started_at = chrono::Utc::now();
            tokio::time::sleep(Duration::from_secs_f64(debounce)).await;
            let followups = self
                .history
                .get_recent_messages_since(&msg.arc, &msg.nick, msg.thread_id.as_deref(), started_at)
                .await?;
            if !followups.is_empty() {
                if let Some(last) = context.last_mut() {
                    for followup in &followups {
                        last.content.push('\n');
                        last.content.push_str(&followup.content);
                    }
                }
            }
        }

        let resolved = self
            .resolver
            .resolve(&msg, &context, self.room_config.command.history_size as usize)
            .await;

        self.route_command(&msg, &reply_sender, &key, &context, resolved).await?;

        let channel_key = CommandResolver::channel_key(&msg.server_tag, &msg.channel_name);
        self.proactive_debouncer.cancel_channel(&channel_key).await;

        self.autochronicler
            .check_and_chronicle(
                &msg.mynick,
                &msg.server_tag,
                &msg.channel_name,
                self.room_config.command.history_size,
            )
            .await?;

        Ok(())
    }

    async fn route_command(
        &self,
        msg: &RoomMessage,
        reply_sender: &ReplySender,
        key: &SteeringKey,
        context: &[ContextMessage],
        resolved: crate::resolver::ResolvedCommand,
    ) -> anyhow::Result<()> {
        if let Some(err) = resolved.error {
            let reply = format!("{}: {err}", msg.nick);
            reply_sender(reply.clone()).await?;
            let reply_msg = msg.reauthored(reply);
            self.history
                .add_message(&reply_msg.arc, "assistant", &reply_msg.content)
                .await?;
            return Ok(());
        }

        if resolved.help_requested {
            let help = self.resolver.build_help_message(&msg.server_tag, &msg.channel_name);
            reply_sender(help.clone()).await?;
            let reply_msg = msg.reauthored(help);
            self.history
                .add_message(&reply_msg.arc, "assistant", &reply_msg.content)
                .await?;
            return Ok(());
        }

        let mode_key = resolved.mode_key.expect("resolved command always has a mode");
        let runtime = resolved.runtime.expect("resolved command always has a runtime");
        let selected_trigger = resolved.selected_trigger.clone().unwrap_or_default();
        let no_context = resolved.no_context;
        let model_override = resolved.model_override.clone();

        let steering_enabled = runtime.steering && !no_context;
        let steering_message_provider: SteeringMessageProvider = if steering_enabled {
            let steering_queue = self.steering_queue.clone();
            let key = key.clone();
            Arc::new(move || {
                let steering_queue = steering_queue.clone();
                let key = key.clone();
                Box::pin(async move { steering_queue.drain_steering_context_messages(&key).await })
            })
        } else {
            Arc::new(|| Box::pin(async { Vec::new() }))
        };

        let progress: ProgressCallback = {
            let history = self.history.clone();
            let arc = msg.arc.clone();
            let reply_sender = reply_sender.clone();
            Arc::new(move |text: String| {
                let history = history.clone();
                let arc = arc.clone();
                let reply_sender = reply_sender.clone();
                Box::pin(async move {
                    reply_sender(text.clone()).await?;
                    history.add_message(&arc, "assistant", &text).await?;
                    Ok(())
                })
            })
        };

        let persistence: PersistenceCallback = {
            let history = self.history.clone();
            let arc = msg.arc.clone();
            Arc::new(move |text: String| {
                let history = history.clone();
                let arc = arc.clone();
                Box::pin(async move {
                    history
                        .add_message_with_template(&arc, "assistant", &text, "[internal monologue] {message}")
                        .await?;
                    Ok(())
                })
            })
        };

        let callbacks = ActorCallbacks {
            steering_message_provider,
            progress,
            persistence,
        };

        let system_prompt = self.build_system_prompt(&mode_key, &msg.mynick, model_override.as_deref())?;
        let model = model_override.clone().or_else(|| runtime.model.clone());
        let windowed_context = last_n(context, runtime.history_size as usize);

        let run_params = ActorRunParams {
            mode: mode_key.clone(),
            reasoning_effort: runtime.reasoning_effort.clone(),
            arc: msg.arc.clone(),
            no_context,
            reduce_context: false,
            model,
            allowed_tools: runtime.allowed_tools.clone(),
            extra_prompt: None,
        };

        let Some(result) = self
            .run_actor(&windowed_context, &mode_key, &system_prompt, &msg.secrets, callbacks, &run_params)
            .await
        else {
            return Ok(());
        };

        let cleaned = match &self.response_cleaner {
            Some(cleaner) => cleaner(result.text.trim(), &mode_key),
            None => result.text.trim().to_string(),
        };
        if cleaned.is_empty() {
            return Ok(());
        }

        let mut llm_call_id = None;
        if result.total_cost > 0.0 {
            if let Some(spec) = &result.primary_model {
                if let Ok(parsed) = parse_model_spec(spec) {
                    llm_call_id = self
                        .history
                        .log_llm_call(&msg.arc, &parsed.provider, &parsed.name, result.total_cost)
                        .await
                        .ok();
                }
            }
        }

        reply_sender(cleaned.clone()).await?;
        let reply_msg = msg.reauthored(cleaned.clone());
        let reply_id = self
            .history
            .add_message_with_mode(&reply_msg.arc, "assistant", &reply_msg.content, &selected_trigger, llm_call_id)
            .await?;
        if let Some(call_id) = llm_call_id {
            self.history.update_llm_call_response(call_id, reply_id).await?;
        }

        if result.total_cost > 0.20 {
            let followup = format!(
                "(this message used {} tool calls, {} in / {} out tokens, and cost ${:.4})",
                result.tool_calls, result.input_tokens, result.output_tokens, result.total_cost
            );
            reply_sender(followup.clone()).await?;
            let followup_msg = msg.reauthored(followup);
            self.history
                .add_message(&followup_msg.arc, "assistant", &followup_msg.content)
                .await?;
        }

        let today = self.history.get_arc_cost_today(&msg.arc).await?;
        let before = today - result.total_cost;
        if today.floor() > before.floor() {
            let milestone = format!("(fun fact: my messages in this channel have already cost ${today:.4} today)");
            reply_sender(milestone.clone()).await?;
            let milestone_msg = msg.reauthored(milestone);
            self.history
                .add_message(&milestone_msg.arc, "assistant", &milestone_msg.content)
                .await?;
        }

        Ok(())
    }

    /// Entry point for a non-command message. Rides an existing steering
    /// session if one exists for the key; otherwise handled inline.
    pub async fn handle_passive_message(&self, msg: RoomMessage, reply_sender: ReplySender) -> anyhow::Result<()> {
        match self
            .steering_queue
            .enqueue_passive_if_session_exists(msg.clone(), reply_sender.clone())
            .await
        {
            Some((_item, completion)) => completion.wait().await.map_err(anyhow::Error::from),
            None => self.handle_passive_message_core(msg, reply_sender).await,
        }
    }

    async fn handle_passive_message_core(&self, msg: RoomMessage, reply_sender: ReplySender) -> anyhow::Result<()> {
        let channel_key = CommandResolver::channel_key(&msg.server_tag, &msg.channel_name);
        let proactive = &self.room_config.proactive;
        if proactive.interjecting.contains(&channel_key) || proactive.interjecting_test.contains(&channel_key) {
            let handler = self.arc_self();
            let callback: ProactiveCallback = Arc::new(move |msg, reply_sender| {
                let handler = handler.clone();
                Box::pin(async move {
                    handler.handle_debounced_proactive_check(msg, reply_sender).await;
                })
            });
            self.proactive_debouncer
                .schedule_check(msg.clone(), channel_key, reply_sender, callback)
                .await;
        }

        self.autochronicler
            .check_and_chronicle(
                &msg.mynick,
                &msg.server_tag,
                &msg.channel_name,
                self.room_config.command.history_size,
            )
            .await?;

        Ok(())
    }

    async fn handle_debounced_proactive_check(&self, msg: RoomMessage, reply_sender: ReplySender) {
        if !self.proactive_rate_limiter.check_limit() {
            return;
        }

        let context = match self
            .history
            .get_context_for_message(&msg.arc, self.room_config.proactive.history_size)
            .await
        {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "failed to fetch context for proactive check");
                return;
            }
        };

        let decision = self.should_interject_proactively(&context).await;
        let (score, test_mode) = match decision {
            ProactiveDecision::NoInterject => return,
            ProactiveDecision::Interject { score } => (score, false),
            ProactiveDecision::TestMode { score } => (score, true),
        };

        let label = self.resolver.classify_mode(&context).await;
        let trigger = self.resolver.trigger_for_label(&label);
        let Some((mode_key, runtime)) = self.resolver.runtime_for_trigger(&trigger) else {
            tracing::warn!(trigger, "proactive classifier selected an unknown trigger, aborting");
            return;
        };
        if mode_key != "serious" {
            tracing::info!(mode_key, "proactive interjection classified outside serious mode, aborting");
            return;
        }

        let channel_key = CommandResolver::channel_key(&msg.server_tag, &msg.channel_name);
        let test_override = self
            .room_config
            .behavior
            .proactive_interjecting_test
            .contains(&channel_key);

        let model = self.room_config.proactive.models.serious.clone();
        let extra_prompt = format!(" {}", self.room_config.proactive.prompts.serious_extra);

        let system_prompt = match self.build_system_prompt("serious", &msg.mynick, None) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build proactive system prompt");
                return;
            }
        };

        let callbacks = ActorCallbacks {
            steering_message_provider: Arc::new(|| Box::pin(async { Vec::new() })),
            progress: Arc::new(|_text| Box::pin(async { Ok(()) })),
            persistence: Arc::new(|_text| Box::pin(async { Ok(()) })),
        };

        let run_params = ActorRunParams {
            mode: "serious".to_string(),
            reasoning_effort: runtime.reasoning_effort.clone(),
            arc: msg.arc.clone(),
            no_context: false,
            reduce_context: false,
            model: Some(model.clone()),
            allowed_tools: None,
            extra_prompt: Some(extra_prompt),
        };

        let Some(result) = self
            .run_actor(&context, "serious", &system_prompt, &msg.secrets, callbacks, &run_params)
            .await
        else {
            return;
        };

        if result.text.starts_with("Error: ") {
            tracing::warn!(text = %result.text, "proactive actor run failed");
            return;
        }

        let model_core = model_str_core(&model);
        let final_text = format!("[{model_core}] {}", result.text);

        if test_mode || test_override {
            tracing::info!(
                channel_key,
                score,
                test_mode,
                test_override,
                text = %final_text,
                "[TEST MODE] Generated proactive response for {channel_key}"
            );
            return;
        }

        if let Err(err) = reply_sender(final_text.clone()).await {
            tracing::warn!(error = %err, "failed to send proactive interjection");
            return;
        }
        let reply_msg = msg.reauthored(final_text);
        if let Err(err) = self
            .history
            .add_message_with_mode(&reply_msg.arc, "assistant", &reply_msg.content, "serious", None)
            .await
        {
            tracing::warn!(error = %err, "failed to persist proactive interjection");
        }
        if let Err(err) = self
            .autochronicler
            .check_and_chronicle(
                &msg.mynick,
                &msg.server_tag,
                &msg.channel_name,
                self.room_config.command.history_size,
            )
            .await
        {
            tracing::warn!(error = %err, "autochronicle failed after proactive interjection");
        }
    }
}
