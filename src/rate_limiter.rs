//! Sliding-window rate limiting.
//!
//! The rate limiter is an external collaborator by spec (out of scope as an
//! implementation concern), but the command and proactive paths each need a
//! working instance to be exercised, so a reference sliding-window
//! implementation is provided behind the same [`RateLimiter`] trait a real
//! deployment's limiter would implement.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A thread-safe limiter answering "is one more call allowed right now?".
///
/// Implementations must be cheap and non-blocking: both the command path and
/// the proactive path call `check_limit` synchronously inline with message
/// handling.
pub trait RateLimiter: Send + Sync {
    fn check_limit(&self) -> bool;
}

/// Sliding-window counter: at most `limit` calls may succeed within any
/// trailing `period`.
pub struct SlidingWindowRateLimiter {
    limit: usize,
    period: Duration,
    hits: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit: usize, period: Duration) -> Self {
        Self {
            limit,
            period,
            hits: Mutex::new(VecDeque::new()),
        }
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check_limit(&self) -> bool {
        if self.limit == 0 {
            return false;
        }
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter mutex poisoned");
        while let Some(front) = hits.front() {
            if now.duration_since(*front) > self.period {
                hits.pop_front();
            } else {
                break;
            }
        }
        if hits.len() >= self.limit {
            return false;
        }
        hits.push_back(now);
        true
    }
}

/// A limiter that never rejects, useful for tests and for channels with
/// rate limiting disabled.
pub struct UnlimitedRateLimiter;

impl RateLimiter for UnlimitedRateLimiter {
    fn check_limit(&self) -> bool {
        true
    }
}
