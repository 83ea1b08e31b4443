//! Deadline scheduler for wall-clock callbacks.
//!
//! Order auto-cancel timers and risk-breaker recovery checks are all
//! `(fire_at, action)` pairs in one min-heap, drained by whichever clock
//! tick the owner runs. Cancelling a pending task is a guaranteed removal:
//! the heap entry may linger, but a cancelled id is dropped on pop, so a
//! revoked timer can never act on a stale order or handler.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

/// Opaque handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Min-heap of pending deadlines carrying an action payload.
#[derive(Debug)]
pub struct TaskScheduler<T> {
    heap: BinaryHeap<Reverse<(i64, u64)>>,
    pending: HashMap<u64, (DateTime<Utc>, T)>,
    next_id: u64,
}

impl<T> TaskScheduler<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Schedule `action` to fire at `fire_at`.
    pub fn schedule(&mut self, fire_at: DateTime<Utc>, action: T) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, (fire_at, action));
        self.heap.push(Reverse((fire_at.timestamp_millis(), id)));
        TaskId(id)
    }

    /// Schedule `action` to fire `after` from now.
    pub fn schedule_in(&mut self, after: chrono::Duration, action: T) -> TaskId {
        self.schedule(Utc::now() + after, action)
    }

    /// Revoke a pending task. Returns the action if it had not fired yet.
    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        self.pending.remove(&id.0).map(|(_, action)| action)
    }

    /// Whether a task is still pending.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending.contains_key(&id.0)
    }

    /// Number of live (not fired, not cancelled) tasks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|(at, _)| *at).min()
    }

    /// Pop every task whose deadline is at or before `now`, in deadline
    /// order. Cancelled entries are skipped and dropped.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<(TaskId, T)> {
        let now_ms = now.timestamp_millis();
        let mut due = Vec::new();
        while let Some(&Reverse((fire_ms, id))) = self.heap.peek() {
            if fire_ms > now_ms {
                break;
            }
            self.heap.pop();
            if let Some((_, action)) = self.pending.remove(&id) {
                due.push((TaskId(id), action));
            }
        }
        due
    }
}

impl<T> Default for TaskScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
