//! Canonical view state and its propagation across surfaces.
//!
//! DESIGN
//! ======
//! The synchronizer owns the only mutable [`ViewState`] of a session. Every
//! surface reports "view changed" notifications; the synchronizer reads the
//! reporting backend, discards noise below the position epsilon, adopts the
//! new state, and pushes it to every other surface.
//!
//! Two guards keep the surfaces from fighting:
//! - a per-surface programmatic guard, raised right before a push and
//!   released by a `ReleaseProgrammatic` timer after the grace window, so
//!   the surface's echo of our own push is ignored;
//! - a session-wide drag guard, raised between drag-start and drag-end,
//!   during which no push happens and the canonical state does not move.
//!   The latest state seen mid-drag is applied when the drag ends.
//!
//! Each guard raise bumps the surface's epoch. A release timer carrying an
//! older epoch is stale and does nothing.
//!
//! ERROR HANDLING
//! ==============
//! A failed `get_state` skips the notification and leaves the canonical
//! state untouched. After `state_failure_threshold` consecutive failures on
//! the same surface the failure is returned once as `StateReadFailure`.
//! Push failures are logged and swallowed.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{SurfaceSet, SurfaceSlot};
use crate::config::SessionConfig;
use crate::error::MapError;
use crate::geo::LatLng;
use crate::timers::{TimerId, TimerQueue, TimerTask};
use crate::view::ViewState;

/// What a view-changed notification led to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncOutcome {
    /// The canonical state moved and was pushed to the other surfaces.
    Updated(ViewState),
    /// Below the noise threshold.
    Unchanged,
    /// The surface is still inside its programmatic grace window.
    EchoIgnored,
    /// A drag is in progress; the state will be applied at drag end.
    Deferred,
    /// The backend could not report its state this time.
    Skipped,
}

#[derive(Debug, Default, Clone, Copy)]
struct Guard {
    programmatic: bool,
    epoch: u64,
    release: Option<TimerId>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    state: ViewState,
    source: Option<SurfaceSlot>,
}

/// Owner of the canonical view state.
#[derive(Debug)]
pub struct ViewSynchronizer {
    canonical: ViewState,
    grace: Duration,
    failure_threshold: u32,
    guards: BTreeMap<SurfaceSlot, Guard>,
    failures: BTreeMap<SurfaceSlot, u32>,
    dragging: bool,
    pending: Option<Pending>,
}

impl ViewSynchronizer {
    #[must_use]
    pub fn new(initial: ViewState, config: &SessionConfig) -> Self {
        Self {
            canonical: initial,
            grace: config.sync_grace,
            failure_threshold: config.state_failure_threshold,
            guards: BTreeMap::new(),
            failures: BTreeMap::new(),
            dragging: false,
            pending: None,
        }
    }

    /// A copy of the canonical state.
    #[must_use]
    pub fn canonical(&self) -> ViewState {
        self.canonical
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Whether `slot` is inside a programmatic grace window.
    #[must_use]
    pub fn is_guarded(&self, slot: SurfaceSlot) -> bool {
        self.guards.get(&slot).is_some_and(|g| g.programmatic)
    }

    /// Consecutive read failures recorded for `slot`.
    #[must_use]
    pub fn failure_count(&self, slot: SurfaceSlot) -> u32 {
        self.failures.get(&slot).copied().unwrap_or(0)
    }

    // --- Inbound ---

    /// Handle a view-changed notification from `slot`.
    ///
    /// # Errors
    ///
    /// `MissingSurface` when nothing is attached to `slot`;
    /// `StateReadFailure` once the surface has failed to report its state
    /// `state_failure_threshold` times in a row.
    pub fn on_view_changed(
        &mut self,
        slot: SurfaceSlot,
        surfaces: &mut SurfaceSet,
        timers: &mut TimerQueue,
        now: Instant,
    ) -> Result<SyncOutcome, MapError> {
        if self.is_guarded(slot) {
            debug!(%slot, "ignoring echo of programmatic update");
            return Ok(SyncOutcome::EchoIgnored);
        }

        let handle = surfaces.get(slot).ok_or(MapError::MissingSurface(slot))?;
        let state = match handle.get_state() {
            Ok(state) => {
                self.failures.remove(&slot);
                state
            }
            Err(source) => {
                let count = self.failures.entry(slot).or_insert(0);
                *count += 1;
                warn!(%slot, failures = *count, error = %source, "view state read failed; skipping");
                if *count == self.failure_threshold {
                    return Err(MapError::StateReadFailure { slot, source });
                }
                return Ok(SyncOutcome::Skipped);
            }
        };

        Ok(self.adopt(state, Some(slot), surfaces, timers, now))
    }

    /// A user gesture started on some surface. Pushes stop until [`Self::drag_end`].
    pub fn drag_start(&mut self) {
        if !self.dragging {
            debug!("drag started; holding programmatic pushes");
        }
        self.dragging = true;
    }

    /// The gesture ended. Applies whatever arrived during the drag.
    pub fn drag_end(&mut self, surfaces: &mut SurfaceSet, timers: &mut TimerQueue, now: Instant) -> SyncOutcome {
        self.dragging = false;
        match self.pending.take() {
            Some(Pending { state, source }) => self.adopt(state, source, surfaces, timers, now),
            None => SyncOutcome::Unchanged,
        }
    }

    // --- Programmatic ---

    /// Jump every surface except `source` to `state`.
    pub fn propose(
        &mut self,
        state: ViewState,
        source: Option<SurfaceSlot>,
        surfaces: &mut SurfaceSet,
        timers: &mut TimerQueue,
        now: Instant,
    ) -> SyncOutcome {
        self.adopt(state, source, surfaces, timers, now)
    }

    /// Re-center every surface on `center`, keeping the canonical zoom.
    pub fn follow(
        &mut self,
        center: LatLng,
        surfaces: &mut SurfaceSet,
        timers: &mut TimerQueue,
        now: Instant,
    ) -> SyncOutcome {
        let state = match self.pending {
            Some(p) => p.state.with_center(center),
            None => self.canonical.with_center(center),
        };
        self.adopt(state, None, surfaces, timers, now)
    }

    /// Push the canonical state into one surface, raising its guard.
    ///
    /// Does nothing while dragging or when the surface already shows the
    /// canonical state.
    pub fn push_to(&mut self, slot: SurfaceSlot, surfaces: &mut SurfaceSet, timers: &mut TimerQueue, now: Instant) {
        if self.dragging {
            return;
        }
        let Some(handle) = surfaces.get_mut(slot) else {
            return;
        };
        if let Ok(current) = handle.get_state()
            && !current.differs_from(&self.canonical)
        {
            return;
        }

        let guard = self.guards.entry(slot).or_default();
        if let Some(old) = guard.release.take() {
            timers.cancel(old);
        }
        guard.epoch += 1;
        guard.programmatic = true;
        guard.release = Some(timers.schedule(
            now + self.grace,
            TimerTask::ReleaseProgrammatic { slot, epoch: guard.epoch },
        ));

        if let Err(e) = handle.set_state(self.canonical) {
            warn!(%slot, backend = handle.name(), error = %e, "programmatic push failed");
        }
    }

    /// Timer callback: drop the guard on `slot` if `epoch` is still current.
    pub fn release(&mut self, slot: SurfaceSlot, epoch: u64) -> bool {
        match self.guards.get_mut(&slot) {
            Some(guard) if guard.epoch == epoch => {
                guard.programmatic = false;
                guard.release = None;
                true
            }
            _ => {
                debug!(%slot, epoch, "stale guard release ignored");
                false
            }
        }
    }

    /// Forget per-surface bookkeeping when a surface is detached or swapped.
    pub fn forget(&mut self, slot: SurfaceSlot, timers: &mut TimerQueue) {
        if let Some(guard) = self.guards.remove(&slot)
            && let Some(id) = guard.release
        {
            timers.cancel(id);
        }
        self.failures.remove(&slot);
        if self.pending.is_some_and(|p| p.source == Some(slot)) {
            self.pending = None;
        }
    }

    fn adopt(
        &mut self,
        state: ViewState,
        source: Option<SurfaceSlot>,
        surfaces: &mut SurfaceSet,
        timers: &mut TimerQueue,
        now: Instant,
    ) -> SyncOutcome {
        if self.dragging {
            self.pending = Some(Pending { state, source });
            return SyncOutcome::Deferred;
        }
        if !state.differs_from(&self.canonical) {
            return SyncOutcome::Unchanged;
        }

        self.canonical = state;
        info!(lat = state.lat, lng = state.lng, zoom = state.zoom, source = ?source, "canonical view updated");
        for slot in surfaces.slots() {
            if Some(slot) != source {
                self.push_to(slot, surfaces, timers, now);
            }
        }
        SyncOutcome::Updated(state)
    }
}
