//! Rate-limited, deduplicating retry queue.
//!
//! Items are keyed by `(action, instance key)`. While a key is pending, adding
//! it again only refreshes the snapshot it carries. A key handed to a worker
//! is never handed to a second worker; re-adding it in flight parks it until
//! the first worker calls [`RetryQueue::done`].
//!
//! Delays come from [`RetryPolicy`]: the larger of a per-item exponential
//! backoff and an overall `governor` rate limit.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use governor::clock::Clock;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use meshreg_core::{InstanceKey, InstanceSnapshot};

use crate::error::DaemonError;

/// What a retry should do once it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Action {
    Register,
    Cancel,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Register => write!(f, "Register"),
            Action::Cancel => write!(f, "Cancel"),
        }
    }
}

/// Deduplication key of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkKey {
    pub action: Action,
    pub key: InstanceKey,
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.action, self.key)
    }
}

/// A queued retry, carrying the snapshot it originated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub action: Action,
    pub snapshot: InstanceSnapshot,
}

impl WorkItem {
    pub fn new(action: Action, snapshot: InstanceSnapshot) -> Self {
        Self { action, snapshot }
    }

    pub fn work_key(&self) -> WorkKey {
        WorkKey {
            action: self.action,
            key: self.snapshot.key(),
        }
    }
}

const DEFAULT_QPS: NonZeroU32 = match NonZeroU32::new(10) {
    Some(qps) => qps,
    None => NonZeroU32::MIN,
};
const DEFAULT_BURST: NonZeroU32 = match NonZeroU32::new(100) {
    Some(burst) => burst,
    None => NonZeroU32::MIN,
};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First per-item delay; doubles on every consecutive failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Overall admission rate, items per second.
    pub qps: NonZeroU32,
    pub burst: NonZeroU32,
}

impl RetryPolicy {
    /// Default backoff with the given overall rate. A zero rate or burst is
    /// rejected.
    pub fn with_rate(qps: u32, burst: u32) -> Result<Self, DaemonError> {
        let qps = NonZeroU32::new(qps)
            .ok_or_else(|| DaemonError::InvalidPolicy("qps must be positive".to_string()))?;
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| DaemonError::InvalidPolicy("burst must be positive".to_string()))?;
        Ok(Self {
            qps,
            burst,
            ..Self::default()
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: DEFAULT_QPS,
            burst: DEFAULT_BURST,
        }
    }
}

struct Backoff {
    policy: RetryPolicy,
    failures: HashMap<WorkKey, u32>,
    limiter: DefaultDirectRateLimiter,
}

impl Backoff {
    fn new(policy: RetryPolicy) -> Self {
        let quota = Quota::per_second(policy.qps).allow_burst(policy.burst);
        Self {
            limiter: RateLimiter::direct(quota),
            failures: HashMap::new(),
            policy,
        }
    }

    /// Delay owed to the overall limit. A denied check takes no cell, so the
    /// wait is the earliest moment the limiter admits anything again.
    fn overall(&self) -> Duration {
        match self.limiter.check() {
            Ok(()) => Duration::ZERO,
            Err(not_until) => not_until.wait_time_from(self.limiter.clock().now()),
        }
    }

    fn when(&mut self, key: &WorkKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let factor = 2u32.saturating_pow(*failures);
        *failures = failures.saturating_add(1);
        let per_item = self
            .policy
            .base_delay
            .saturating_mul(factor)
            .min(self.policy.max_delay);
        per_item.max(self.overall())
    }
}

struct State {
    ready: VecDeque<WorkKey>,
    /// Snapshot of every key that still has to be handed out.
    pending: HashMap<WorkKey, InstanceSnapshot>,
    processing: HashSet<WorkKey>,
    /// Delayed keys. Never overlaps `pending`.
    waiting: BTreeMap<(Instant, u64), WorkKey>,
    waiting_index: HashMap<WorkKey, ((Instant, u64), InstanceSnapshot)>,
    seq: u64,
    backoff: Backoff,
    shutting_down: bool,
}

impl State {
    /// Returns `true` when a worker may now pick the key up.
    fn insert(&mut self, key: WorkKey, snapshot: InstanceSnapshot) -> bool {
        if self.pending.insert(key.clone(), snapshot).is_some() {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some((&slot, _)) = self.waiting.first_key_value() {
            if slot.0 > now {
                break;
            }
            let Some(key) = self.waiting.remove(&slot) else { break };
            if let Some((_, snapshot)) = self.waiting_index.remove(&key) {
                self.insert(key, snapshot);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.keys().next().map(|(at, _)| *at)
    }
}

pub struct RetryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(State {
                ready: VecDeque::new(),
                pending: HashMap::new(),
                processing: HashSet::new(),
                waiting: BTreeMap::new(),
                waiting_index: HashMap::new(),
                seq: 0,
                backoff: Backoff::new(policy),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `item` immediately. A delayed entry for the same key is
    /// superseded.
    pub fn add(&self, item: WorkItem) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        let key = item.work_key();
        if let Some((slot, _)) = state.waiting_index.remove(&key) {
            state.waiting.remove(&slot);
        }
        if state.insert(key, item.snapshot) {
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Queue `item` once `delay` has elapsed. A key that is already queued, or
    /// waiting with an earlier deadline, keeps its place; the snapshot is
    /// always refreshed.
    pub fn add_after(&self, item: WorkItem, delay: Duration) {
        if delay.is_zero() {
            return self.add(item);
        }
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.shutting_down {
            return;
        }
        let key = item.work_key();
        if let Some(snapshot) = state.pending.get_mut(&key) {
            *snapshot = item.snapshot;
            return;
        }
        let ready_at = Instant::now() + delay;

        if let Some((slot, snapshot)) = state.waiting_index.get_mut(&key) {
            if slot.0 <= ready_at {
                *snapshot = item.snapshot;
                return;
            }
            let old = *slot;
            state.waiting.remove(&old);
        }

        state.seq += 1;
        let slot = (ready_at, state.seq);
        state.waiting.insert(slot, key.clone());
        state.waiting_index.insert(key, (slot, item.snapshot));
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Queue `item` after its backoff delay and count one more failure.
    pub fn add_rate_limited(&self, item: WorkItem) {
        let delay = {
            let mut state = self.lock();
            state.backoff.when(&item.work_key())
        };
        tracing::debug!(item = %item.work_key(), delay_ms = delay.as_millis() as u64, "retry scheduled");
        self.add_after(item, delay);
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &WorkKey) {
        self.lock().backoff.failures.remove(key);
    }

    pub fn num_requeues(&self, key: &WorkKey) -> u32 {
        self.lock().backoff.failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    if let Some(snapshot) = state.pending.remove(&key) {
                        state.processing.insert(key.clone());
                        return Some(WorkItem::new(key.action, snapshot));
                    }
                    continue;
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

    /// Mark `key` as finished. A re-add that arrived in flight is queued now.
    pub fn done(&self, key: &WorkKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.pending.contains_key(key) {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Wake every waiter and refuse further work.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Items ready to be handed out.
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items still inside their backoff delay.
    pub fn waiting(&self) -> usize {
        self.lock().waiting_index.len()
    }
}
