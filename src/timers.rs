//! Cooperative timers for the single-threaded session.
//!
//! DESIGN
//! ======
//! Nothing here sleeps. Components schedule a [`TimerTask`] for a deadline
//! and the host drives the queue by calling `MapSession::tick`. Tasks carry
//! the epoch or generation of the state that scheduled them; the owner
//! checks liveness when the task fires, not when it is scheduled, so a task
//! outliving its owner is a no-op.

#[cfg(test)]
#[path = "timers_test.rs"]
mod timers_test;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::backend::SurfaceSlot;

/// Identifier handed out by [`TimerQueue::schedule`].
pub type TimerId = u64;

/// Work to perform when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    /// Clear the programmatic-update guard on a surface.
    ReleaseProgrammatic { slot: SurfaceSlot, epoch: u64 },
    /// Create the ground marker and heading indicator after layout settles.
    CreateGroundOverlays { generation: u64 },
}

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for tests and replay. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self { now: Rc::new(Cell::new(Instant::now())) }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// Deadline-ordered set of pending tasks.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: TimerId,
    pending: BTreeMap<TimerId, (Instant, TimerTask)>,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to fire at `at`.
    pub fn schedule(&mut self, at: Instant, task: TimerTask) -> TimerId {
        self.next_id += 1;
        self.pending.insert(self.next_id, (at, task));
        self.next_id
    }

    /// Cancel a pending timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    #[must_use]
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every task due at `now`, earliest deadline first.
    /// Ties keep scheduling order.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerId, TimerTask)> {
        let mut due: Vec<(Instant, TimerId, TimerTask)> = self
            .pending
            .iter()
            .filter(|(_, (at, _))| *at <= now)
            .map(|(id, (at, task))| (*at, *id, *task))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, id, _) in &due {
            self.pending.remove(id);
        }
        due.into_iter().map(|(_, id, task)| (id, task)).collect()
    }
}
