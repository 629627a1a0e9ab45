//! Per-key FIFO queue with runner ownership and noise compaction (§4.2).
//!
//! A single [`tokio::sync::Mutex`] guards the whole `sessions` map and every
//! session's queue. Every public operation here is a short critical section;
//! nothing awaits anything other than acquiring that lock while holding it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{oneshot, Mutex};

use crate::error::CompletionError;
use crate::message::{ContextMessage, RoomMessage, SteeringKey};
use crate::ports::ReplySender;

/// Whether a queued item is the command that triggered its session, or a
/// passive message riding along behind one. A plain two-variant enum, not a
/// trait-object hierarchy — there is nothing polymorphic about the two
/// besides this one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Command { trigger_message_id: i64 },
    Passive,
}

type CompletionResult = Result<(), Arc<anyhow::Error>>;

/// A single inbound message waiting its turn in a steering session.
/// `completion` resolves exactly once, however the item is ultimately
/// disposed of: run, compacted away, or the whole session aborted.
pub struct QueuedInboundMessage {
    pub kind: InboundKind,
    pub msg: RoomMessage,
    pub reply_sender: ReplySender,
    completion: StdMutex<Option<oneshot::Sender<CompletionResult>>>,
}

impl QueuedInboundMessage {
    fn new(kind: InboundKind, msg: RoomMessage, reply_sender: ReplySender) -> (Arc<Self>, Completion) {
        let (tx, rx) = oneshot::channel();
        let item = Arc::new(QueuedInboundMessage {
            kind,
            msg,
            reply_sender,
            completion: StdMutex::new(Some(tx)),
        });
        (item, Completion { receiver: rx })
    }

    fn complete(&self, result: CompletionResult) {
        let sender = self.completion.lock().expect("completion mutex poisoned").take();
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }
}

/// Future side of a [`QueuedInboundMessage`]'s completion, awaited by
/// whoever enqueued it but isn't the runner processing it themselves.
pub struct Completion {
    receiver: oneshot::Receiver<CompletionResult>,
}

impl Completion {
    pub async fn wait(self) -> Result<(), CompletionError> {
        match self.receiver.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(CompletionError::Aborted(err)),
            Err(_) => Err(CompletionError::SenderDropped),
        }
    }
}

/// Resolve an item's completion successfully. A free function (not a method
/// requiring the queue's lock) since completion state lives on the item.
pub fn finish_item(item: &QueuedInboundMessage) {
    item.complete(Ok(()));
}

/// Resolve an item's completion with a failure.
pub fn fail_item(item: &QueuedInboundMessage, err: Arc<anyhow::Error>) {
    item.complete(Err(err));
}

struct SteeringSession {
    queue: VecDeque<Arc<QueuedInboundMessage>>,
}

/// Owns every in-flight steering session, keyed by [`SteeringKey`].
///
/// Invariant: the session for a key is owned by exactly one runner, which
/// terminates the first time [`SteeringQueue::take_next_work_compacted`]
/// returns `(_, None)` — at that point the session is already gone, so a
/// passive message arriving a moment later finds no session and is handled
/// inline instead. This is by design, not a race to paper over.
pub struct SteeringQueue {
    sessions: Mutex<HashMap<SteeringKey, SteeringSession>>,
}

impl Default for SteeringQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SteeringQueue {
    pub fn new() -> Self {
        SteeringQueue {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a pending item for `msg`. If no session exists for its key,
    /// starts one (the caller becomes the runner and should process the
    /// returned item directly, not via its `Completion`). Otherwise appends
    /// to the existing session's queue for the runner to pick up later.
    pub async fn enqueue_command_or_start_runner(
        &self,
        msg: RoomMessage,
        trigger_message_id: i64,
        reply_sender: ReplySender,
    ) -> (bool, SteeringKey, Arc<QueuedInboundMessage>, Completion) {
        let key = SteeringKey::for_message(&msg);
        let (item, completion) = QueuedInboundMessage::new(
            InboundKind::Command { trigger_message_id },
            msg,
            reply_sender,
        );

        let mut sessions = self.sessions.lock().await;
        let is_runner = !sessions.contains_key(&key);
        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| SteeringSession { queue: VecDeque::new() });
        if !is_runner {
            session.queue.push_back(item.clone());
        }
        (is_runner, key, item, completion)
    }

    /// Append a passive message behind an existing session. Returns `None`
    /// if no session exists for the key; callers must then handle the
    /// message inline instead of waiting on a completion that will never
    /// come.
    pub async fn enqueue_passive_if_session_exists(
        &self,
        msg: RoomMessage,
        reply_sender: ReplySender,
    ) -> Option<(Arc<QueuedInboundMessage>, Completion)> {
        let key = SteeringKey::for_message(&msg);
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(&key)?;
        let (item, completion) = QueuedInboundMessage::new(InboundKind::Passive, msg, reply_sender);
        session.queue.push_back(item.clone());
        Some((item, completion))
    }

    /// Snapshot and clear the queue for `key`, resolving every drained
    /// item's completion and formatting it as steering context, in FIFO
    /// order.
    pub async fn drain_steering_context_messages(&self, key: &SteeringKey) -> Vec<ContextMessage> {
        let drained: Vec<Arc<QueuedInboundMessage>> = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(key) {
                Some(session) => session.queue.drain(..).collect(),
                None => Vec::new(),
            }
        };

        let mut out = Vec::with_capacity(drained.len());
        for item in &drained {
            finish_item(item);
            out.push(ContextMessage::steering_context(&item.msg));
        }
        out
    }

    /// Pull the next item of work for `key`, compacting away passive noise
    /// ahead of it. See §4.2 for the exact compaction rule: leading passives
    /// before the first queued command are dropped; if the queue holds only
    /// passives, all but the last are dropped.
    ///
    /// Removes the session (ending the runner's loop) the moment the queue
    /// is found empty.
    pub async fn take_next_work_compacted(
        &self,
        key: &SteeringKey,
    ) -> (Vec<Arc<QueuedInboundMessage>>, Option<Arc<QueuedInboundMessage>>) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(key) else {
            return (Vec::new(), None);
        };

        if session.queue.is_empty() {
            sessions.remove(key);
            return (Vec::new(), None);
        }

        let first_command_idx = session
            .queue
            .iter()
            .position(|item| matches!(item.kind, InboundKind::Command { .. }));

        match first_command_idx {
            Some(i) => {
                let dropped: Vec<_> = session.queue.drain(..i).collect();
                let next = session.queue.pop_front();
                (dropped, next)
            }
            None => {
                let next = session.queue.pop_back();
                let dropped: Vec<_> = session.queue.drain(..).collect();
                (dropped, next)
            }
        }
    }

    /// Remove the session for `key` and fail every item still queued for
    /// it with `exc`. Called once by the runner when its loop errors out.
    pub async fn abort_session(&self, key: &SteeringKey, exc: Arc<anyhow::Error>) {
        let remaining: Vec<Arc<QueuedInboundMessage>> = {
            let mut sessions = self.sessions.lock().await;
            match sessions.remove(key) {
                Some(session) => session.queue.into_iter().collect(),
                None => Vec::new(),
            }
        };
        for item in remaining {
            fail_item(&item, exc.clone());
        }
    }

    #[cfg(test)]
    async fn has_session(&self, key: &SteeringKey) -> bool {
        self.sessions.lock().await.contains_key(key)
    }
}
