//! Debounced proactive-interjection scheduling (§4.3).
//!
//! Modelled with a per-channel `u64` generation counter rather than a full
//! cancellation-token type: scheduling bumps the generation and spawns a
//! `tokio::time::sleep` task carrying its own generation number. On wake,
//! the task re-acquires the lock and fires its callback only if its
//! generation is still the channel's current one. A stale generation is
//! enough to detect supersession (a newer schedule arrived) or cancellation
//! (`cancel_channel` bumped it) without needing to wake the sleeping task
//! early.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::message::RoomMessage;
use crate::ports::ReplySender;

/// Invoked at most once per scheduling, with the most recently scheduled
/// message and reply sender for the channel.
pub type ProactiveCallback = Arc<dyn Fn(RoomMessage, ReplySender) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct ProactiveDebouncer {
    debounce: Duration,
    generations: Mutex<HashMap<String, u64>>,
}

impl ProactiveDebouncer {
    pub fn new(debounce: Duration) -> Arc<Self> {
        Arc::new(ProactiveDebouncer {
            debounce,
            generations: Mutex::new(HashMap::new()),
        })
    }

    /// Set or reset `channel_key`'s timer. Re-scheduling before expiry
    /// replaces the payload and restarts the timer; the replaced schedule's
    /// task will see its generation superseded and silently do nothing.
    pub async fn schedule_check(
        self: &Arc<Self>,
        msg: RoomMessage,
        channel_key: String,
        reply_sender: ReplySender,
        callback: ProactiveCallback,
    ) {
        let generation = {
            let mut generations = self.generations.lock().await;
            let entry = generations.entry(channel_key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let this = Arc::clone(self);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let still_current = {
                let generations = this.generations.lock().await;
                generations.get(&channel_key).copied() == Some(generation)
            };
            if still_current {
                callback(msg, reply_sender).await;
            }
        });
    }

    /// Cancel any pending timer for `channel_key`. A no-op if none is
    /// pending; harmless if one fires concurrently, since it will already
    /// have observed the bumped generation by the time it checks.
    pub async fn cancel_channel(&self, channel_key: &str) {
        let mut generations = self.generations.lock().await;
        if let Some(generation) = generations.get_mut(channel_key) {
            *generation += 1;
        }
    }
}
