//! Fakes and fixtures shared by the integration test binaries. Not a test
//! binary itself (no `mod.rs` file directly under `tests/` is ever treated
//! as one); each scenario file pulls this in with `mod common;`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Notify;

use steercore::config::RoomConfig;
use steercore::{
    ActorCallbacks, ActorRunParams, AgentResult, AgentRuntime, ArtifactSharer, Autochronicler, ContextMessage,
    HistoryStore, ModelRouter, ReplySender, RoomMessage,
};

pub fn room_message(nick: &str, content: &str, thread_id: Option<&str>) -> RoomMessage {
    RoomMessage {
        server_tag: "irc".to_string(),
        channel_name: "#room".to_string(),
        nick: nick.to_string(),
        mynick: "bot".to_string(),
        content: content.to_string(),
        arc: "arc1".to_string(),
        secrets: HashMap::new(),
        thread_id: thread_id.map(str::to_string),
    }
}

pub fn fixture_room_config() -> RoomConfig {
    let src = r#"
        [command]
        history_size = 10
        rate_limit = 5
        rate_period = 60
        response_max_bytes = 600

        [command.mode_classifier]
        model = "classifier-model"
        prompt = "classify: {message}"
        fallback_label = "CHAT"

        [command.mode_classifier.labels]
        CHAT = "!c0"
        SERIOUS = "!s"

        [command.modes.chat]
        prompt = "chat prompt"
        model = "dummy-chat"
        [command.modes.chat.triggers]
        "!c0" = {}

        [command.modes.serious]
        prompt = "serious prompt for {mynick}"
        model = "dummy-serious"
        [command.modes.serious.triggers]
        "!s" = {}

        [command.modes.unsafe]
        prompt = "unsafe prompt"
        model = "dummy-unsafe"
        [command.modes.unsafe.triggers]
        "!u" = {}

        [command.modes.dismissive]
        prompt = "dismissive prompt"
        model = "dummy-dismissive"
        steering = false
        [command.modes.dismissive.triggers]
        "!d" = {}

        [proactive]
        rate_limit = 5
        rate_period = 60
        debounce_seconds = 0.05
        history_size = 5
        interject_threshold = 7

        [proactive.models]
        validation = ["validator-model"]
        serious = "dummy-serious"

        [proactive.prompts]
        interject = "rate: {message}"
        serious_extra = "Stay serious."
    "#;
    toml::from_str(src).unwrap()
}

pub fn stub_model_router(response: impl Into<String>) -> Arc<dyn ModelRouter> {
    Arc::new(FixedModelRouter {
        response: response.into(),
    })
}

struct FixedModelRouter {
    response: String,
}

#[async_trait]
impl ModelRouter for FixedModelRouter {
    async fn call_raw_with_model(
        &self,
        _model: &str,
        _context: &[ContextMessage],
        _prompt: &str,
    ) -> anyhow::Result<String> {
        Ok(self.response.clone())
    }
}

pub fn noop_reply_sender() -> ReplySender {
    Arc::new(|_text| Box::pin(async { Ok(()) }))
}

/// Pushes every sent reply (in send order) into a shared, lockable vector.
pub fn capturing_reply_sender(sink: Arc<Mutex<Vec<String>>>) -> ReplySender {
    Arc::new(move |text: String| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().unwrap().push(text);
            Ok(())
        })
    })
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub arc: String,
    pub role: String,
    pub content: String,
    pub mode: Option<String>,
}

#[derive(Default)]
pub struct FakeHistoryStore {
    messages: Mutex<Vec<StoredMessage>>,
    next_id: AtomicI64,
    cost_today: Mutex<f64>,
}

impl FakeHistoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, arc: &str, role: &str, content: &str) {
        self.messages.lock().unwrap().push(StoredMessage {
            arc: arc.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            mode: None,
        });
    }

    pub fn set_cost_today(&self, cost: f64) {
        *self.cost_today.lock().unwrap() = cost;
    }

    pub fn persisted(&self) -> Vec<StoredMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryStore for FakeHistoryStore {
    async fn get_context_for_message(&self, arc: &str, size: u32) -> anyhow::Result<Vec<ContextMessage>> {
        let messages = self.messages.lock().unwrap();
        let matching: Vec<ContextMessage> = messages
            .iter()
            .filter(|m| m.arc == arc)
            .map(|m| ContextMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();
        let start = matching.len().saturating_sub(size as usize);
        Ok(matching[start..].to_vec())
    }

    async fn add_message(&self, arc: &str, role: &str, content: &str) -> anyhow::Result<i64> {
        self.seed(arc, role, content);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn add_message_with_template(
        &self,
        arc: &str,
        role: &str,
        content: &str,
        _content_template: &str,
    ) -> anyhow::Result<i64> {
        self.seed(arc, role, content);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn add_message_with_mode(
        &self,
        arc: &str,
        role: &str,
        content: &str,
        mode: &str,
        _llm_call_id: Option<i64>,
    ) -> anyhow::Result<i64> {
        self.messages.lock().unwrap().push(StoredMessage {
            arc: arc.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            mode: Some(mode.to_string()),
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn get_recent_messages_since(
        &self,
        _arc: &str,
        _nick: &str,
        _thread_id: Option<&str>,
        _since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ContextMessage>> {
        Ok(Vec::new())
    }

    async fn log_llm_call(&self, _arc: &str, _provider: &str, _model: &str, _cost: f64) -> anyhow::Result<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn update_llm_call_response(&self, _llm_call_id: i64, _message_id: i64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_arc_cost_today(&self, _arc: &str) -> anyhow::Result<f64> {
        Ok(*self.cost_today.lock().unwrap())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedActorCall {
    pub mode: String,
    pub model: Option<String>,
    pub steering_drain: Vec<ContextMessage>,
}

/// An agent runtime whose replies are scripted in advance. Every call drains
/// steering input exactly once, immediately on entry — mirroring a turn
/// that checks for anything queued up behind it the moment it becomes the
/// current item, not continuously while it runs. The next call to hit this
/// drain can then be held "in flight" (after its own drain, before
/// producing a reply) so a test can enqueue further messages behind it and
/// observe that they are NOT swept up by the held call's own drain.
pub struct FakeAgentRuntime {
    calls: Mutex<Vec<RecordedActorCall>>,
    responses: Mutex<VecDeque<String>>,
    hold_first: Notify,
    hold_first_enabled: AtomicUsize,
    entered: Notify,
}

impl FakeAgentRuntime {
    pub fn new(responses: Vec<&str>) -> Arc<Self> {
        Arc::new(FakeAgentRuntime {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            hold_first: Notify::new(),
            hold_first_enabled: AtomicUsize::new(0),
            entered: Notify::new(),
        })
    }

    /// The next call to `run_actor` will block (after its own steering
    /// drain) until [`Self::release_first`] is called.
    pub fn hold_next_call(&self) {
        self.hold_first_enabled.store(1, Ordering::SeqCst);
    }

    pub fn release_first(&self) {
        self.hold_first.notify_one();
    }

    /// Resolves once a held call has performed its drain and is parked
    /// waiting on [`Self::release_first`]. Safe to call before or after
    /// that point: [`Notify`] stores a single wakeup permit.
    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> Vec<RecordedActorCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRuntime for FakeAgentRuntime {
    async fn run_actor(
        &self,
        _context: &[ContextMessage],
        mode_cfg: &steercore::config::ModeConfig,
        _system_prompt: &str,
        _secrets: &HashMap<String, String>,
        callbacks: ActorCallbacks,
        run_params: &ActorRunParams,
    ) -> anyhow::Result<Option<AgentResult>> {
        let steering_drain = (callbacks.steering_message_provider)().await;

        if self.hold_first_enabled.swap(0, Ordering::SeqCst) == 1 {
            self.entered.notify_one();
            self.hold_first.notified().await;
        }

        let reply = self.responses.lock().unwrap().pop_front().unwrap_or_default();

        self.calls.lock().unwrap().push(RecordedActorCall {
            mode: run_params.mode.clone(),
            model: run_params.model.clone(),
            steering_drain,
        });
        let _ = &mode_cfg.prompt;

        Ok(Some(AgentResult {
            text: reply,
            total_cost: 0.0,
            primary_model: None,
            tool_calls: 0,
            input_tokens: 0,
            output_tokens: 0,
        }))
    }
}

pub struct NoopAutochronicler;

#[async_trait]
impl Autochronicler for NoopAutochronicler {
    async fn check_and_chronicle(
        &self,
        _mynick: &str,
        _server_tag: &str,
        _channel_name: &str,
        _history_size: u32,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct NoopArtifactSharer;

#[async_trait]
impl ArtifactSharer for NoopArtifactSharer {
    async fn share(&self, _full_text: &str) -> anyhow::Result<String> {
        Ok("https://artifacts.example.test/r".to_string())
    }
}

pub struct AlwaysAllow;

impl steercore::rate_limiter::RateLimiter for AlwaysAllow {
    fn check_limit(&self) -> bool {
        true
    }
}

pub struct AlwaysDeny;

impl steercore::rate_limiter::RateLimiter for AlwaysDeny {
    fn check_limit(&self) -> bool {
        false
    }
}
