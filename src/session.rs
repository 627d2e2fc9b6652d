//! One map session: surfaces, the canonical view, ground view, measurement.
//!
//! DESIGN
//! ======
//! `MapSession` is the only type a host talks to. It owns every surface's
//! [`BackendHandle`], the [`ViewSynchronizer`], the [`GroundViewBridge`],
//! the [`MeasurementEngine`], the external-service layers, and the timer
//! queue. The host drives it from its event loop:
//!
//! - `pump()` drains each surface's event queue in slot order, routes every
//!   event to its owner, then fires due timers;
//! - `execute(Command)` runs a toolbar action;
//! - `tick()` fires due timers alone.
//!
//! Both `pump()` and `execute()` return the [`SessionEvent`]s produced
//! since the last call. Errors that are not user facing are logged and
//! dropped here; the rest are returned as `SessionEvent::Error`.
//!
//! Swapping or detaching a surface first removes everything derived from
//! it: ground view (primary or mini), measurements and layers (primary),
//! its listeners and its sync guard. Only then is the backend cleaned up.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::loader::{ReadinessGate, init_when_ready};
use crate::backend::{BackendHandle, Container, EventKind, ListenerId, MapEvent, SurfaceSet, SurfaceSlot};
use crate::config::SessionConfig;
use crate::error::{ErrorCode, MapError};
use crate::geo::LatLng;
use crate::ground::{GroundPhase, GroundViewBridge};
use crate::layers::{BoundaryFeature, BoundaryLayer, BoundaryLookup, RouteLayer, RouteResult};
use crate::measure::{ControlOutcome, MeasureMode, MeasurementEngine};
use crate::sync::{SyncOutcome, ViewSynchronizer};
use crate::timers::{Clock, SystemClock, TimerQueue, TimerTask};
use crate::view::ViewState;

/// Upper bound on drain rounds per `pump()`. Handlers may queue follow-up
/// events (echoes, anchor answers); anything left waits for the next pump.
const MAX_PUMP_ROUNDS: usize = 8;

/// Toolbar actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    OpenGroundViewAt(LatLng),
    /// Arm (or disarm) "open ground view at the next primary click".
    ToggleGroundPick,
    CloseGroundView,
    MeasureDistance,
    MeasureArea,
    MeasureOff,
    /// Remove measurement overlays, keep the mode.
    ClearMeasurements,
    /// Close ground view, stop measuring, clear every layer.
    ClearAll,
}

/// Notifications for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ViewChanged(ViewState),
    GroundPickChanged { armed: bool },
    GroundViewOpened { anchor_id: String, position: LatLng },
    GroundViewClosed,
    MeasurementFinalized { id: Uuid, mode: MeasureMode, value: f64, text: String },
    /// A finalize below the vertex minimum threw the drawing away.
    MeasurementDiscarded { mode: MeasureMode, vertices: usize },
    MeasurementLabelDismissed { id: Uuid },
    MeasurementDeleted { id: Uuid },
    Error(MapError),
}

pub struct MapSession {
    config: SessionConfig,
    clock: Rc<dyn Clock>,
    surfaces: SurfaceSet,
    containers: BTreeMap<SurfaceSlot, Container>,
    listeners: BTreeMap<SurfaceSlot, Vec<ListenerId>>,
    ground_pick: Option<ListenerId>,
    sync: ViewSynchronizer,
    ground: GroundViewBridge,
    measure: MeasurementEngine,
    boundaries: BoundaryLayer,
    route: RouteLayer,
    timers: TimerQueue,
    outbox: Vec<SessionEvent>,
}

impl MapSession {
    #[must_use]
    pub fn new(config: SessionConfig, initial: ViewState, clock: Rc<dyn Clock>) -> Self {
        Self {
            sync: ViewSynchronizer::new(initial, &config),
            ground: GroundViewBridge::new(&config),
            boundaries: BoundaryLayer::new(config.boundary_fallback_bbox_deg2),
            config,
            clock,
            surfaces: SurfaceSet::new(),
            containers: BTreeMap::new(),
            listeners: BTreeMap::new(),
            ground_pick: None,
            measure: MeasurementEngine::new(),
            route: RouteLayer::new(),
            timers: TimerQueue::new(),
            outbox: Vec::new(),
        }
    }

    /// Session on the wall clock.
    #[must_use]
    pub fn with_system_clock(config: SessionConfig, initial: ViewState) -> Self {
        Self::new(config, initial, Rc::new(SystemClock))
    }

    // --- Accessors ---

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn canonical(&self) -> ViewState {
        self.sync.canonical()
    }

    #[must_use]
    pub fn surfaces(&self) -> &SurfaceSet {
        &self.surfaces
    }

    #[must_use]
    pub fn sync(&self) -> &ViewSynchronizer {
        &self.sync
    }

    #[must_use]
    pub fn ground(&self) -> &GroundViewBridge {
        &self.ground
    }

    #[must_use]
    pub fn ground_phase(&self) -> GroundPhase {
        self.ground.phase()
    }

    #[must_use]
    pub fn measurement(&self) -> &MeasurementEngine {
        &self.measure
    }

    #[must_use]
    pub fn boundaries(&self) -> &BoundaryLayer {
        &self.boundaries
    }

    #[must_use]
    pub fn route(&self) -> &RouteLayer {
        &self.route
    }

    #[must_use]
    pub fn is_ground_pick_armed(&self) -> bool {
        self.ground_pick.is_some()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    // =========================================================================
    // SURFACES
    // =========================================================================

    /// Attach `handle` to `slot`, replacing whatever was there.
    ///
    /// An uninitialized handle is initialized in `container` at the
    /// canonical view; an initialized one is brought to it.
    ///
    /// # Errors
    ///
    /// Backend failure during `init` or listener subscription. The slot is
    /// left empty.
    pub fn attach_surface(
        &mut self,
        slot: SurfaceSlot,
        mut handle: BackendHandle,
        container: Container,
    ) -> Result<(), MapError> {
        self.teardown_slot(slot);
        if !handle.is_initialized() {
            handle.init(&container, self.sync.canonical())?;
        }

        let mut ids = Vec::new();
        for kind in core_event_kinds(slot) {
            match handle.backend_mut().subscribe(kind) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        handle.discard_listener(id);
                    }
                    handle.cleanup();
                    return Err(e.into());
                }
            }
        }

        info!(%slot, backend = handle.name(), container = %container.id, "surface attached");
        self.listeners.insert(slot, ids);
        self.containers.insert(slot, container);
        self.surfaces.insert(slot, handle);
        let now = self.clock.now();
        self.sync.push_to(slot, &mut self.surfaces, &mut self.timers, now);
        Ok(())
    }

    /// Wait for the backend's readiness signal, then attach it.
    ///
    /// # Errors
    ///
    /// `BackendLoadTimeout` when the vendor library never became ready, or
    /// any error from [`Self::attach_surface`].
    pub async fn attach_when_ready(
        &mut self,
        slot: SurfaceSlot,
        mut handle: BackendHandle,
        container: Container,
        gate: ReadinessGate,
    ) -> Result<(), MapError> {
        let initial = self.sync.canonical();
        init_when_ready(
            &mut handle,
            gate,
            &container,
            initial,
            self.config.backend_ready_timeout,
            self.config.backend_poll,
        )
        .await?;
        self.attach_surface(slot, handle, container)
    }

    /// Replace the backend of an attached slot, keeping its container.
    /// An active measurement mode carries over to a new primary backend;
    /// its finished results do not.
    ///
    /// # Errors
    ///
    /// `MissingSurface` when `slot` was never attached, or any error from
    /// [`Self::attach_surface`].
    pub fn swap_backend(&mut self, slot: SurfaceSlot, handle: BackendHandle) -> Result<(), MapError> {
        let container = self.containers.get(&slot).cloned().ok_or(MapError::MissingSurface(slot))?;
        let mode = if slot == SurfaceSlot::Primary { self.measure.mode() } else { None };
        let from = self.surfaces.get(slot).map(|h| h.name().to_owned());

        self.attach_surface(slot, handle, container)?;
        info!(%slot, from = ?from, to = self.surfaces.get(slot).map(BackendHandle::name), "backend swapped");

        if let Some(mode) = mode {
            let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
            self.measure.activate(mode, primary)?;
        }
        Ok(())
    }

    /// Remove a surface and everything derived from it.
    pub fn detach(&mut self, slot: SurfaceSlot) -> bool {
        let removed = self.teardown_slot(slot);
        self.containers.remove(&slot);
        removed
    }

    /// Detach every surface and drop every pending timer.
    pub fn shutdown(&mut self) -> Vec<SessionEvent> {
        for slot in self.surfaces.slots().into_iter().rev() {
            self.detach(slot);
        }
        self.timers = TimerQueue::new();
        info!("session shut down");
        std::mem::take(&mut self.outbox)
    }

    fn teardown_slot(&mut self, slot: SurfaceSlot) -> bool {
        if !self.surfaces.contains(slot) {
            return false;
        }

        if matches!(slot, SurfaceSlot::Primary | SurfaceSlot::Mini)
            && self.ground.close(&mut self.surfaces, &mut self.timers)
        {
            self.outbox.push(SessionEvent::GroundViewClosed);
        }
        if slot == SurfaceSlot::Primary
            && let Some(primary) = self.surfaces.get_mut(slot)
        {
            self.measure.deactivate(primary);
            self.boundaries.clear(primary);
            self.route.clear(primary);
            if let Some(id) = self.ground_pick.take() {
                primary.discard_listener(id);
                self.outbox.push(SessionEvent::GroundPickChanged { armed: false });
            }
        }

        self.sync.forget(slot, &mut self.timers);
        let Some(mut handle) = self.surfaces.remove(slot) else {
            return false;
        };
        for id in self.listeners.remove(&slot).unwrap_or_default() {
            handle.discard_listener(id);
        }
        handle.cleanup();
        info!(%slot, backend = handle.name(), "surface detached");
        true
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Run a toolbar action.
    pub fn execute(&mut self, command: Command) -> Vec<SessionEvent> {
        debug!(?command, "command");
        if let Err(e) = self.run(command) {
            self.report(e);
        }
        std::mem::take(&mut self.outbox)
    }

    fn run(&mut self, command: Command) -> Result<(), MapError> {
        match command {
            Command::OpenGroundViewAt(at) => self.ground.open(at, &mut self.surfaces, &mut self.timers),
            Command::ToggleGroundPick => self.toggle_ground_pick(),
            Command::CloseGroundView => {
                self.close_ground();
                Ok(())
            }
            Command::MeasureDistance => self.start_measuring(MeasureMode::Distance),
            Command::MeasureArea => self.start_measuring(MeasureMode::Area),
            Command::MeasureOff => {
                let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
                self.measure.deactivate(primary);
                Ok(())
            }
            Command::ClearMeasurements => {
                let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
                self.measure.clear(primary);
                Ok(())
            }
            Command::ClearAll => {
                self.close_ground();
                if let Some(primary) = self.surfaces.get_mut(SurfaceSlot::Primary) {
                    self.measure.deactivate(primary);
                    self.boundaries.clear(primary);
                    self.route.clear(primary);
                    if let Some(id) = self.ground_pick.take() {
                        primary.discard_listener(id);
                        self.outbox.push(SessionEvent::GroundPickChanged { armed: false });
                    }
                }
                Ok(())
            }
        }
    }

    fn start_measuring(&mut self, mode: MeasureMode) -> Result<(), MapError> {
        let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
        self.measure.activate(mode, primary)
    }

    fn toggle_ground_pick(&mut self) -> Result<(), MapError> {
        let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
        let armed = match self.ground_pick.take() {
            Some(id) => {
                primary.discard_listener(id);
                false
            }
            None => {
                if !primary.capabilities().supports_ground_view {
                    return Err(MapError::Unsupported { slot: SurfaceSlot::Primary, what: "ground view" });
                }
                self.ground_pick = Some(primary.backend_mut().subscribe(EventKind::Click)?);
                true
            }
        };
        self.outbox.push(SessionEvent::GroundPickChanged { armed });
        Ok(())
    }

    fn close_ground(&mut self) {
        if self.ground.close(&mut self.surfaces, &mut self.timers) {
            self.outbox.push(SessionEvent::GroundViewClosed);
        }
    }

    /// Jump every surface to `state`.
    pub fn jump_to(&mut self, state: ViewState) -> Vec<SessionEvent> {
        let now = self.clock.now();
        if let SyncOutcome::Updated(state) = self.sync.propose(state, None, &mut self.surfaces, &mut self.timers, now)
        {
            self.outbox.push(SessionEvent::ViewChanged(state));
        }
        std::mem::take(&mut self.outbox)
    }

    /// Highlight the administrative boundary at `at`.
    ///
    /// # Errors
    ///
    /// `MissingSurface` without a primary surface, or the lookup's failure.
    pub fn show_boundary(
        &mut self,
        at: LatLng,
        lookup: &mut dyn BoundaryLookup,
    ) -> Result<Option<BoundaryFeature>, MapError> {
        let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
        Ok(self.boundaries.show(at, lookup, primary)?.cloned())
    }

    /// Draw a route returned by the routing provider.
    ///
    /// # Errors
    ///
    /// `MissingSurface`, `Unsupported` without routing, or a drawing failure.
    pub fn show_route(&mut self, route: &RouteResult) -> Result<(), MapError> {
        let primary = self.surfaces.require_mut(SurfaceSlot::Primary)?;
        self.route.show(route, primary)
    }

    // =========================================================================
    // EVENT LOOP
    // =========================================================================

    /// Drain backend events, route them, then fire due timers.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut batch = Vec::new();
            for slot in self.surfaces.slots() {
                if let Some(handle) = self.surfaces.get_mut(slot) {
                    batch.extend(handle.backend_mut().poll_events().into_iter().map(|e| (slot, e)));
                }
            }
            if batch.is_empty() {
                break;
            }
            for (slot, event) in batch {
                self.dispatch(slot, event);
            }
        }
        self.tick();
        std::mem::take(&mut self.outbox)
    }

    /// Fire every timer that is due.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        for (id, task) in self.timers.take_due(now) {
            debug!(id, ?task, "timer fired");
            match task {
                TimerTask::ReleaseProgrammatic { slot, epoch } => {
                    self.sync.release(slot, epoch);
                }
                TimerTask::CreateGroundOverlays { generation } => {
                    self.ground.on_create_timer(generation, &mut self.surfaces);
                }
            }
        }
    }

    fn dispatch(&mut self, slot: SurfaceSlot, event: MapEvent) {
        let now = self.clock.now();
        match event {
            MapEvent::ViewChanged => {
                let zoom_before = self.sync.canonical().zoom;
                match self.sync.on_view_changed(slot, &mut self.surfaces, &mut self.timers, now) {
                    Ok(outcome) => self.view_outcome(outcome, zoom_before),
                    Err(e) => self.report(e),
                }
            }
            MapEvent::DragStart => self.sync.drag_start(),
            MapEvent::DragEnd => {
                let zoom_before = self.sync.canonical().zoom;
                let outcome = self.sync.drag_end(&mut self.surfaces, &mut self.timers, now);
                self.view_outcome(outcome, zoom_before);
            }
            MapEvent::Click(at) if slot == SurfaceSlot::Primary => self.on_primary_click(at),
            MapEvent::PointerMove(at) if slot == SurfaceSlot::Primary => {
                if let Some(primary) = self.surfaces.get_mut(slot) {
                    self.measure.on_pointer_move(at, primary);
                }
            }
            MapEvent::SecondaryClick(_) if slot == SurfaceSlot::Primary => self.on_finalize(),
            MapEvent::ControlClicked { overlay, control } if slot == SurfaceSlot::Primary => {
                let Some(primary) = self.surfaces.get_mut(slot) else {
                    return;
                };
                match self.measure.on_control_clicked(overlay, control, primary) {
                    Some(ControlOutcome::LabelDismissed(id)) => {
                        self.outbox.push(SessionEvent::MeasurementLabelDismissed { id });
                    }
                    Some(ControlOutcome::Deleted(id)) => self.outbox.push(SessionEvent::MeasurementDeleted { id }),
                    None => {}
                }
            }
            MapEvent::AnchorResolved { request, anchor } => {
                match self.ground.on_anchor_resolved(request, anchor, &mut self.surfaces, &mut self.timers, now) {
                    Ok(Some(anchor)) => {
                        self.outbox.push(SessionEvent::GroundViewOpened {
                            anchor_id: anchor.id,
                            position: anchor.position,
                        });
                        self.follow(anchor.position);
                    }
                    Ok(None) => {}
                    Err(e) => self.report(e),
                }
            }
            MapEvent::PanoramaMoved(to) => {
                if let Some(position) = self.ground.on_panorama_moved(to, &mut self.surfaces) {
                    self.follow(position);
                }
            }
            MapEvent::PanoramaHeading(heading) => self.ground.on_heading(heading, &mut self.surfaces),
            MapEvent::ContainerResized(rect) if slot == SurfaceSlot::Mini => {
                self.ground.on_container_resized(rect, &mut self.surfaces, &mut self.timers, now);
            }
            other => debug!(%slot, kind = ?other.kind(), "event not routed"),
        }
    }

    fn view_outcome(&mut self, outcome: SyncOutcome, zoom_before: i32) {
        if let SyncOutcome::Updated(state) = outcome {
            self.outbox.push(SessionEvent::ViewChanged(state));
            if state.zoom != zoom_before {
                self.ground.on_mini_view_changed(&mut self.surfaces);
            }
        }
    }

    fn follow(&mut self, position: LatLng) {
        let now = self.clock.now();
        if let SyncOutcome::Updated(state) = self.sync.follow(position, &mut self.surfaces, &mut self.timers, now) {
            self.outbox.push(SessionEvent::ViewChanged(state));
        }
    }

    fn on_primary_click(&mut self, at: LatLng) {
        if self.measure.take_suppression() {
            debug!("click consumed by label control");
            return;
        }
        if let Some(id) = self.ground_pick.take() {
            if let Some(primary) = self.surfaces.get_mut(SurfaceSlot::Primary) {
                primary.discard_listener(id);
            }
            self.outbox.push(SessionEvent::GroundPickChanged { armed: false });
            if let Err(e) = self.ground.open(at, &mut self.surfaces, &mut self.timers) {
                self.report(e);
            }
            return;
        }
        if let Some(primary) = self.surfaces.get_mut(SurfaceSlot::Primary) {
            self.measure.on_click(at, primary);
        }
    }

    fn on_finalize(&mut self) {
        let Some(primary) = self.surfaces.get_mut(SurfaceSlot::Primary) else {
            return;
        };
        match self.measure.on_secondary_click(primary) {
            Ok(Some(done)) => self.outbox.push(SessionEvent::MeasurementFinalized {
                id: done.id,
                mode: done.mode,
                value: done.value,
                text: done.text,
            }),
            Ok(None) => {}
            Err(MapError::InsufficientVertices { mode, have, .. }) if have > 0 => {
                self.outbox.push(SessionEvent::MeasurementDiscarded { mode, vertices: have });
            }
            Err(e) => self.report(e),
        }
    }

    fn report(&mut self, error: MapError) {
        if error.is_user_facing() {
            warn!(code = error.error_code(), error = %error, "reported to user");
            self.outbox.push(SessionEvent::Error(error));
        } else {
            debug!(code = error.error_code(), error = %error, "swallowed");
        }
    }
}

impl std::fmt::Debug for MapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSession")
            .field("canonical", &self.sync.canonical())
            .field("surfaces", &self.surfaces.slots())
            .field("ground", &self.ground.phase())
            .field("measure", &self.measure.mode())
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

fn core_event_kinds(slot: SurfaceSlot) -> Vec<EventKind> {
    let mut kinds = vec![EventKind::ViewChanged, EventKind::DragStart, EventKind::DragEnd, EventKind::ContainerResized];
    if slot == SurfaceSlot::Primary {
        kinds.extend([EventKind::AnchorResolved, EventKind::PanoramaMoved, EventKind::PanoramaHeading]);
    }
    kinds
}
