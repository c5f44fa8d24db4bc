//! Deduplicating, delay-capable queue of keys awaiting reconciliation.
//!
//! A key lives in at most one of three places at a time: `ready` (handed out
//! by the next `get`), `processing` (a worker holds it), or `waiting` (a
//! delayed re-add). `dirty` tracks keys that must be handed out again; a key
//! that is dirty while processing is re-queued when the worker calls `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::BackoffConfig;
use crate::key::ObjectKey;

// Stand-in deadline for delays that overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before retry number `attempt` (zero-based): `initial * 2^attempt`,
    /// capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }
}

impl From<&BackoffConfig> for ExponentialBackoff {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    waiting: HashMap<ObjectKey, Instant>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

impl QueueState {
    fn insert(&mut self, key: ObjectKey) -> bool {
        self.waiting.remove(&key);
        if !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    fn promote_expired(&mut self, now: Instant) -> bool {
        let expired: Vec<ObjectKey> = self
            .waiting
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut promoted = false;
        for key in expired {
            promoted |= self.insert(key);
        }
        promoted
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.values().min().copied()
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

impl WorkQueue {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn add(&self, key: ObjectKey) {
        let queued = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.insert(key)
        };
        if queued {
            self.notify.notify_one();
        }
    }

    /// Makes `key` visible after `delay` without blocking. If the key already
    /// has an earlier pending schedule, or is already ready, that one wins.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            if state.dirty.contains(&key) && !state.processing.contains(&key) {
                return;
            }
            let now = Instant::now();
            let at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
            let entry = state.waiting.entry(key).or_insert(at);
            if at < *entry {
                *entry = at;
            }
        }
        self.notify.notify_one();
    }

    /// Re-adds `key` after the backoff delay for its consecutive failure count
    /// and bumps that count.
    pub fn add_rate_limited(&self, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    pub fn forget(&self, key: &ObjectKey) {
        self.state.lock().failures.remove(key);
    }

    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Waits for the next ready key. Returns `None` once the queue has been
    /// shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                state.promote_expired(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                state.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks processing of `key` finished. A key re-added meanwhile is queued
    /// again now.
    pub fn done(&self, key: &ObjectKey) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.ready.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_delayed(&self) -> usize {
        self.state.lock().waiting.len()
    }

    pub fn is_processing(&self, key: &ObjectKey) -> bool {
        self.state.lock().processing.contains(key)
    }

    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
