//! Ground-view bridge: the immersive panorama on the primary surface and its
//! marker and heading indicator on the mini surface.
//!
//! DESIGN
//! ======
//! `Closed → Opening → Open → Closed`. Opening issues an asynchronous
//! nearest-anchor search on the primary backend; the answer comes back as
//! `AnchorResolved` tagged with the request id, so an answer for a
//! superseded request is ignored.
//!
//! Opening resizes the mini container into its corner slot. Overlays on the
//! mini surface are created by a `CreateGroundOverlays` timer after the
//! settle delay, and every container resize before that pushes the
//! deadline back so anchor math runs against final geometry. For a bounded
//! number of resize events the bridge re-asserts the expected rect, since
//! the panorama widget restyles the container on its own.
//!
//! The panorama session owns its marker and indicator by id. The indicator
//! is always removed before its replacement is added.
//!
//! TRADE-OFFS
//! ==========
//! The indicator is rebuilt on every heading event rather than rotated in
//! place; not every backend can transform an existing polygon.

#[cfg(test)]
#[path = "ground_test.rs"]
mod ground_test;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{
    MarkerSpec, OverlayId, PanoramaAnchor, Rect, RequestId, ShapeKind, ShapeSpec, ShapeStyle, SurfaceSet, SurfaceSlot,
};
use crate::config::{MiniLayout, SessionConfig};
use crate::consts::HEADING_SECTOR_STEPS;
use crate::error::MapError;
use crate::geo::{LatLng, heading_sector, normalize_heading, pixel_radius_to_geo};
use crate::timers::{TimerId, TimerQueue, TimerTask};

/// Externally visible bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundPhase {
    Closed,
    Opening,
    Open,
}

/// Live ground-view state. Exists only while `Open`.
#[derive(Debug, Clone)]
pub struct PanoramaSession {
    pub anchor_id: String,
    pub position: LatLng,
    /// Degrees in `[0, 360)`, clockwise from north.
    pub heading: f64,
    marker: Option<OverlayId>,
    indicator: Option<OverlayId>,
    create_timer: Option<TimerId>,
    layout_checks_left: u32,
    restore_rect: Option<Rect>,
}

#[derive(Debug)]
enum Phase {
    Closed,
    Opening { request: RequestId, at: LatLng },
    Open(PanoramaSession),
}

#[derive(Debug)]
pub struct GroundViewBridge {
    phase: Phase,
    next_request: RequestId,
    generation: u64,
    search_radius_m: f64,
    settle: Duration,
    layout_checks: u32,
    heading_radius_px: f64,
    heading_sector_deg: f64,
    mini_layout: MiniLayout,
}

impl GroundViewBridge {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            phase: Phase::Closed,
            next_request: 0,
            generation: 0,
            search_radius_m: config.ground_search_radius_m,
            settle: config.ground_settle,
            layout_checks: config.layout_guard_checks,
            heading_radius_px: config.heading_radius_px,
            heading_sector_deg: config.heading_sector_deg,
            mini_layout: config.mini_layout,
        }
    }

    #[must_use]
    pub fn phase(&self) -> GroundPhase {
        match self.phase {
            Phase::Closed => GroundPhase::Closed,
            Phase::Opening { .. } => GroundPhase::Opening,
            Phase::Open(_) => GroundPhase::Open,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&PanoramaSession> {
        match &self.phase {
            Phase::Open(session) => Some(session),
            _ => None,
        }
    }

    #[must_use]
    pub fn marker(&self) -> Option<OverlayId> {
        self.session().and_then(|s| s.marker)
    }

    #[must_use]
    pub fn indicator(&self) -> Option<OverlayId> {
        self.session().and_then(|s| s.indicator)
    }

    /// Whether overlay creation is still waiting for layout to settle.
    #[must_use]
    pub fn overlays_pending(&self) -> bool {
        self.session().is_some_and(|s| s.create_timer.is_some())
    }

    /// Remaining container corrections the layout guard will make.
    #[must_use]
    pub fn layout_checks_left(&self) -> u32 {
        self.session().map_or(0, |s| s.layout_checks_left)
    }

    fn expected_rect(&self) -> Rect {
        let m = self.mini_layout;
        Rect::new(m.x, m.y, m.width, m.height)
    }

    // =========================================================================
    // OPEN / CLOSE
    // =========================================================================

    /// Ask the primary backend for the nearest anchor to `at`.
    ///
    /// An open ground view is closed first; an in-flight request is superseded.
    ///
    /// # Errors
    ///
    /// `MissingSurface` without a primary surface, `Unsupported` when it has
    /// no ground view, or the backend's own failure to start the search.
    pub fn open(&mut self, at: LatLng, surfaces: &mut SurfaceSet, timers: &mut TimerQueue) -> Result<(), MapError> {
        if matches!(self.phase, Phase::Open(_)) {
            self.close(surfaces, timers);
        }

        let primary = surfaces.require_mut(SurfaceSlot::Primary)?;
        if !primary.capabilities().supports_ground_view {
            return Err(MapError::Unsupported { slot: SurfaceSlot::Primary, what: "ground view" });
        }

        self.next_request += 1;
        let request = self.next_request;
        if let Err(e) = primary.backend_mut().request_nearest_anchor(request, at, self.search_radius_m) {
            self.phase = Phase::Closed;
            return Err(e.into());
        }
        info!(request, lat = at.lat, lng = at.lng, "ground view opening");
        self.phase = Phase::Opening { request, at };
        Ok(())
    }

    /// Handle a nearest-anchor answer.
    ///
    /// Returns the anchor when the ground view opened, `None` for a stale answer.
    ///
    /// # Errors
    ///
    /// `NoCoverage` when no anchor was found (the bridge is `Closed` again),
    /// or a backend failure opening the panorama.
    pub fn on_anchor_resolved(
        &mut self,
        request: RequestId,
        anchor: Option<PanoramaAnchor>,
        surfaces: &mut SurfaceSet,
        timers: &mut TimerQueue,
        now: Instant,
    ) -> Result<Option<PanoramaAnchor>, MapError> {
        let at = match self.phase {
            Phase::Opening { request: pending, at } if pending == request => at,
            _ => {
                debug!(request, "stale anchor answer ignored");
                return Ok(None);
            }
        };
        self.phase = Phase::Closed;

        let Some(anchor) = anchor else {
            info!(lat = at.lat, lng = at.lng, "no ground view coverage");
            return Err(MapError::NoCoverage { lat: at.lat, lng: at.lng, radius_m: self.search_radius_m });
        };

        surfaces.require_mut(SurfaceSlot::Primary)?.backend_mut().open_panorama(&anchor)?;

        let expected = self.expected_rect();
        let restore_rect = match surfaces.get_mut(SurfaceSlot::Mini) {
            Some(mini) => {
                let previous = mini.backend().container_rect();
                if let Err(e) = mini.backend_mut().set_container_rect(expected) {
                    warn!(error = %e, "could not place mini surface");
                }
                Some(previous)
            }
            None => {
                warn!("ground view opened without a mini surface; no marker or indicator");
                None
            }
        };

        self.generation += 1;
        let create_timer = restore_rect
            .is_some()
            .then(|| timers.schedule(now + self.settle, TimerTask::CreateGroundOverlays { generation: self.generation }));

        info!(anchor = %anchor.id, lat = anchor.position.lat, lng = anchor.position.lng, "ground view open");
        self.phase = Phase::Open(PanoramaSession {
            anchor_id: anchor.id.clone(),
            position: anchor.position,
            heading: normalize_heading(anchor.heading),
            marker: None,
            indicator: None,
            create_timer,
            layout_checks_left: self.layout_checks,
            restore_rect,
        });
        Ok(Some(anchor))
    }

    /// Leave ground view, removing whatever overlays exist.
    ///
    /// Returns false when there was nothing to close.
    pub fn close(&mut self, surfaces: &mut SurfaceSet, timers: &mut TimerQueue) -> bool {
        let session = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Closed => return false,
            Phase::Opening { request, .. } => {
                debug!(request, "ground view open abandoned");
                return true;
            }
            Phase::Open(session) => session,
        };
        self.generation += 1;

        if let Some(id) = session.create_timer {
            timers.cancel(id);
        }
        if let Some(mini) = surfaces.get_mut(SurfaceSlot::Mini) {
            for id in [session.marker, session.indicator].into_iter().flatten() {
                mini.discard_overlay(id);
            }
            if let Some(rect) = session.restore_rect
                && let Err(e) = mini.backend_mut().set_container_rect(rect)
            {
                warn!(error = %e, "could not restore mini surface layout");
            }
        }
        if let Some(primary) = surfaces.get_mut(SurfaceSlot::Primary)
            && let Err(e) = primary.backend_mut().close_panorama()
        {
            warn!(error = %e, "close panorama failed");
        }
        info!(anchor = %session.anchor_id, "ground view closed");
        true
    }

    // =========================================================================
    // LIVE UPDATES
    // =========================================================================

    /// Timer callback: create the marker and indicator once layout settled.
    pub fn on_create_timer(&mut self, generation: u64, surfaces: &mut SurfaceSet) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "stale overlay timer ignored");
            return false;
        }
        let Phase::Open(session) = &mut self.phase else {
            return false;
        };
        session.create_timer = None;

        let Some(mini) = surfaces.get_mut(SurfaceSlot::Mini) else {
            return false;
        };
        match mini.backend_mut().add_marker(MarkerSpec { position: session.position, title: Some("ground view".into()) }) {
            Ok(id) => session.marker = Some(id),
            Err(e) => warn!(error = %e, "ground marker not created"),
        }
        self.rebuild_indicator(surfaces);
        true
    }

    /// The panorama walked to `to`. Returns the position for the synchronizer to follow.
    pub fn on_panorama_moved(&mut self, to: LatLng, surfaces: &mut SurfaceSet) -> Option<LatLng> {
        let Phase::Open(session) = &mut self.phase else {
            return None;
        };
        session.position = to;
        if let Some(marker) = session.marker
            && let Some(mini) = surfaces.get_mut(SurfaceSlot::Mini)
            && let Err(e) = mini.backend_mut().move_marker(marker, to)
        {
            warn!(error = %e, "ground marker move failed");
        }
        self.rebuild_indicator(surfaces);
        Some(to)
    }

    /// The panorama turned to `heading` degrees.
    pub fn on_heading(&mut self, heading: f64, surfaces: &mut SurfaceSet) {
        let Phase::Open(session) = &mut self.phase else {
            return;
        };
        session.heading = normalize_heading(heading);
        self.rebuild_indicator(surfaces);
    }

    /// The mini surface's zoom or center changed; the indicator's geographic
    /// radius depends on both.
    pub fn on_mini_view_changed(&mut self, surfaces: &mut SurfaceSet) {
        if matches!(self.phase, Phase::Open(_)) {
            self.rebuild_indicator(surfaces);
        }
    }

    /// The mini container changed size or position.
    pub fn on_container_resized(&mut self, rect: Rect, surfaces: &mut SurfaceSet, timers: &mut TimerQueue, now: Instant) {
        let expected = self.expected_rect();
        let generation = self.generation;
        let settle = self.settle;
        let Phase::Open(session) = &mut self.phase else {
            return;
        };

        if let Some(old) = session.create_timer.take() {
            timers.cancel(old);
            session.create_timer = Some(timers.schedule(now + settle, TimerTask::CreateGroundOverlays { generation }));
            debug!("ground overlay creation re-deferred after resize");
        }

        if session.layout_checks_left == 0 || rect.approx_eq(&expected) {
            return;
        }
        session.layout_checks_left -= 1;
        if let Some(mini) = surfaces.get_mut(SurfaceSlot::Mini) {
            debug!(left = session.layout_checks_left, "re-asserting mini surface layout");
            if let Err(e) = mini.backend_mut().set_container_rect(expected) {
                warn!(error = %e, "could not re-assert mini surface layout");
            }
        }
    }

    fn rebuild_indicator(&mut self, surfaces: &mut SurfaceSet) {
        let radius_px = self.heading_radius_px;
        let width = self.heading_sector_deg;
        let Phase::Open(session) = &mut self.phase else {
            return;
        };
        if session.create_timer.is_some() {
            return;
        }
        let Some(mini) = surfaces.get_mut(SurfaceSlot::Mini) else {
            return;
        };

        if let Some(old) = session.indicator.take() {
            mini.discard_overlay(old);
        }

        let zoom = match mini.get_state() {
            Ok(view) => f64::from(view.zoom),
            Err(e) => {
                warn!(error = %e, "mini view unreadable; heading indicator skipped");
                return;
            }
        };
        let radius = pixel_radius_to_geo(radius_px, session.position.lat, zoom);
        let spec = ShapeSpec {
            kind: ShapeKind::Polygon,
            path: heading_sector(session.position, session.heading, width, radius, HEADING_SECTOR_STEPS),
            style: indicator_style(),
        };
        match mini.backend_mut().add_shape(spec) {
            Ok(id) => session.indicator = Some(id),
            Err(e) => warn!(error = %e, "heading indicator not created"),
        }
    }
}

fn indicator_style() -> ShapeStyle {
    ShapeStyle {
        stroke_width: 1.0,
        stroke_color: "#1a73e8".into(),
        stroke_opacity: 0.8,
        fill_color: Some("#1a73e8".into()),
        fill_opacity: 0.35,
        dashed: false,
    }
}
