//! Deduplicating work queue of resource identities.
//!
//! An identity is in at most one of three places: waiting in `ready`,
//! held by a worker (`processing`), or neither. Adding an identity that is
//! already queued coalesces. Adding one that a worker holds marks it dirty
//! and it is re-queued exactly once when the worker calls `done`, so two
//! workers never reconcile the same identity at the same time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::model::ResourceIdentity;

/// Where an identity currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Idle,
    Queued,
    Running,
    /// Running, with another pass already requested.
    RunningDirty,
    /// Only scheduled for later via `add_after`.
    Waiting,
}

#[derive(Debug, PartialEq, Eq)]
struct Delayed {
    ready_at: Instant,
    seq: u64,
    identity: ResourceIdentity,
}

// Min-heap on (ready_at, seq).
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ResourceIdentity>,
    dirty: HashSet<ResourceIdentity>,
    processing: HashSet<ResourceIdentity>,
    delayed: BinaryHeap<Delayed>,
    /// Earliest pending deadline per identity; heap entries that disagree
    /// are superseded and skipped.
    waiting: HashMap<ResourceIdentity, Instant>,
    shutting_down: bool,
}

impl QueueState {
    /// Returns true when the identity became newly runnable.
    fn add(&mut self, identity: ResourceIdentity) -> bool {
        if self.shutting_down || !self.dirty.insert(identity.clone()) {
            return false;
        }
        if self.processing.contains(&identity) {
            return false;
        }
        self.ready.push_back(identity);
        true
    }

    fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while let Some(top) = self.delayed.peek() {
            if top.ready_at > now {
                break;
            }
            let Some(entry) = self.delayed.pop() else { break };
            if self.waiting.get(&entry.identity) != Some(&entry.ready_at) {
                continue;
            }
            self.waiting.remove(&entry.identity);
            if self.add(entry.identity) {
                promoted += 1;
            }
        }
        promoted
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|d| d.ready_at)
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    seq: AtomicU64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Request a reconciliation pass for `identity`.
    pub fn add(&self, identity: ResourceIdentity) {
        let woke = self.state.lock().add(identity);
        if woke {
            self.notify.notify_one();
        }
    }

    /// Request a pass no sooner than `delay` from now. A shorter pending
    /// delay for the same identity wins.
    pub fn add_after(&self, identity: ResourceIdentity, delay: Duration) {
        if delay.is_zero() {
            self.add(identity);
            return;
        }
        let ready_at = Instant::now() + delay;
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            if state
                .waiting
                .get(&identity)
                .is_some_and(|existing| *existing <= ready_at)
            {
                return;
            }
            state.waiting.insert(identity.clone(), ready_at);
            state.delayed.push(Delayed {
                ready_at,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                identity,
            });
        }
        // Wake a sleeper so it can shorten its timer.
        self.notify.notify_one();
    }

    /// Wait for the next identity to process. Returns `None` once the queue
    /// is shut down and drained.
    pub async fn get(&self) -> Option<ResourceIdentity> {
        loop {
            let notified = self.notify.notified();
            let deadline = {
                let mut state = self.state.lock();
                state.promote_due(Instant::now());
                if let Some(identity) = state.ready.pop_front() {
                    state.dirty.remove(&identity);
                    state.processing.insert(identity.clone());
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(identity);
                }
                if state.shutting_down {
                    return None;
                }
                state.next_deadline()
            };
            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Non-blocking `get`.
    pub fn try_get(&self) -> Option<ResourceIdentity> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        let identity = state.ready.pop_front()?;
        state.dirty.remove(&identity);
        state.processing.insert(identity.clone());
        Some(identity)
    }

    /// Release an identity taken with `get`. If it was added again while
    /// held, it goes back on the queue now.
    pub fn done(&self, identity: &ResourceIdentity) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(identity);
            if state.dirty.contains(identity) && !state.shutting_down {
                state.ready.push_back(identity.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stop accepting work and wake every waiter.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.ready.clear();
            state.dirty.clear();
            state.delayed.clear();
            state.waiting.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Identities ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn processing_count(&self) -> usize {
        self.state.lock().processing.len()
    }

    pub fn delayed_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    /// Nothing queued, running, or scheduled.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.processing.is_empty() && state.waiting.is_empty()
    }

    pub fn state_of(&self, identity: &ResourceIdentity) -> ItemState {
        let state = self.state.lock();
        let dirty = state.dirty.contains(identity);
        if state.processing.contains(identity) {
            if dirty {
                ItemState::RunningDirty
            } else {
                ItemState::Running
            }
        } else if dirty {
            ItemState::Queued
        } else if state.waiting.contains_key(identity) {
            ItemState::Waiting
        } else {
            ItemState::Idle
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
