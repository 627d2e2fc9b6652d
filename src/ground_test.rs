use super::*;
use crate::backend::sim::{SimBackend, SimController};
use crate::backend::{BackendHandle, Capabilities, Container, EventKind, MapEvent, OverlaySupport};
use crate::view::{ViewState, ZoomScale};

const COVERED: LatLng = LatLng { lat: 37.5, lng: 127.0 };
const UNCOVERED: LatLng = LatLng { lat: 35.0, lng: 129.0 };

struct Rig {
    bridge: GroundViewBridge,
    surfaces: SurfaceSet,
    timers: TimerQueue,
    now: Instant,
    config: SessionConfig,
    primary: SimController,
    mini: SimController,
}

fn attach(surfaces: &mut SurfaceSet, slot: SurfaceSlot, rect: Rect) -> SimController {
    let (sim, ctl) = SimBackend::new(slot.to_string(), ZoomScale::Identity);
    let mut handle = BackendHandle::new(Box::new(sim));
    handle.init(&Container::new(slot.to_string(), rect), ViewState::new(37.5, 127.0, 17)).unwrap();
    surfaces.insert(slot, handle);
    ctl
}

fn rig_with(config: SessionConfig) -> Rig {
    let mut surfaces = SurfaceSet::new();
    let primary = attach(&mut surfaces, SurfaceSlot::Primary, Rect::new(0.0, 0.0, 1200.0, 800.0));
    let mini = attach(&mut surfaces, SurfaceSlot::Mini, Rect::new(900.0, 500.0, 200.0, 150.0));
    primary.add_coverage(PanoramaAnchor { id: "pano-1".into(), position: LatLng::new(37.500_1, 127.0), heading: 45.0 });
    surfaces
        .get_mut(SurfaceSlot::Primary)
        .unwrap()
        .backend_mut()
        .subscribe(EventKind::AnchorResolved)
        .unwrap();
    Rig {
        bridge: GroundViewBridge::new(&config),
        surfaces,
        timers: TimerQueue::new(),
        now: Instant::now(),
        config,
        primary,
        mini,
    }
}

fn rig() -> Rig {
    rig_with(SessionConfig::default())
}

impl Rig {
    /// Open at `at` and feed back the backend's answer.
    fn open(&mut self, at: LatLng) -> Result<Option<PanoramaAnchor>, MapError> {
        self.bridge.open(at, &mut self.surfaces, &mut self.timers)?;
        self.resolve_pending()
    }

    fn resolve_pending(&mut self) -> Result<Option<PanoramaAnchor>, MapError> {
        let events = self.surfaces.get_mut(SurfaceSlot::Primary).unwrap().backend_mut().poll_events();
        let mut opened = None;
        for event in events {
            if let MapEvent::AnchorResolved { request, anchor } = event {
                opened = self.bridge.on_anchor_resolved(request, anchor, &mut self.surfaces, &mut self.timers, self.now)?;
            }
        }
        Ok(opened)
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        for (_, task) in self.timers.take_due(self.now) {
            if let TimerTask::CreateGroundOverlays { generation } = task {
                self.bridge.on_create_timer(generation, &mut self.surfaces);
            }
        }
    }

    fn settle(&mut self) {
        let settle = self.config.ground_settle;
        self.advance(settle);
    }

    fn indicator_path(&self) -> Vec<LatLng> {
        self.mini.shape(self.bridge.indicator().unwrap()).unwrap().path
    }
}

// =============================================================
// open
// =============================================================

#[test]
fn no_coverage_closes_with_zero_overlays() {
    let mut r = rig();
    let err = r.open(UNCOVERED).unwrap_err();
    assert!(matches!(err, MapError::NoCoverage { radius_m, .. } if (radius_m - 50.0).abs() < f64::EPSILON));
    assert_eq!(r.bridge.phase(), GroundPhase::Closed);
    r.settle();
    assert_eq!(r.mini.overlay_count(), 0);
    assert!(r.primary.panorama().is_none());
}

#[test]
fn coverage_opens_and_creates_overlays_after_settle() {
    let mut r = rig();
    r.bridge.open(COVERED, &mut r.surfaces, &mut r.timers).unwrap();
    assert_eq!(r.bridge.phase(), GroundPhase::Opening);

    let anchor = r.resolve_pending().unwrap().unwrap();
    assert_eq!(anchor.id, "pano-1");
    assert_eq!(r.bridge.phase(), GroundPhase::Open);
    assert_eq!(r.primary.panorama().unwrap().id, "pano-1");
    assert_eq!(r.mini.container_rect(), Rect::new(10.0, 10.0, 300.0, 220.0));

    assert!(r.bridge.overlays_pending());
    assert_eq!(r.mini.overlay_count(), 0);

    r.settle();
    assert!(!r.bridge.overlays_pending());
    assert_eq!(r.mini.marker_count(), 1);
    assert_eq!(r.mini.shape_count(), 1);
    assert_eq!(r.mini.marker_positions(), vec![LatLng::new(37.500_1, 127.0)]);
}

#[test]
fn failed_then_successful_open_creates_exactly_one_of_each() {
    let mut r = rig();
    assert!(r.open(UNCOVERED).is_err());
    assert_eq!(r.bridge.phase(), GroundPhase::Closed);
    assert_eq!(r.mini.overlay_count(), 0);

    assert!(r.open(COVERED).unwrap().is_some());
    r.settle();
    assert_eq!(r.mini.marker_count(), 1);
    assert_eq!(r.mini.shape_count(), 1);
    assert!(r.bridge.marker().is_some());
    assert!(r.bridge.indicator().is_some());
}

#[test]
fn answer_for_superseded_request_is_ignored() {
    let mut r = rig();
    r.bridge.open(UNCOVERED, &mut r.surfaces, &mut r.timers).unwrap();
    r.bridge.open(COVERED, &mut r.surfaces, &mut r.timers).unwrap();

    let events = r.surfaces.get_mut(SurfaceSlot::Primary).unwrap().backend_mut().poll_events();
    let MapEvent::AnchorResolved { request, anchor } = events[0].clone() else {
        panic!("expected anchor answer");
    };
    assert_eq!(request, 1);
    let stale = r.bridge.on_anchor_resolved(request, anchor, &mut r.surfaces, &mut r.timers, r.now).unwrap();
    assert!(stale.is_none());
    assert_eq!(r.bridge.phase(), GroundPhase::Opening);

    let MapEvent::AnchorResolved { request, anchor } = events[1].clone() else {
        panic!("expected anchor answer");
    };
    assert!(r.bridge.on_anchor_resolved(request, anchor, &mut r.surfaces, &mut r.timers, r.now).unwrap().is_some());
    assert_eq!(r.bridge.phase(), GroundPhase::Open);
}

#[test]
fn open_requires_ground_view_support() {
    let mut r = rig();
    r.primary.set_capabilities(Capabilities {
        supports_ground_view: false,
        supports_routing: false,
        overlays: OverlaySupport::all(),
    });
    let err = r.bridge.open(COVERED, &mut r.surfaces, &mut r.timers).unwrap_err();
    assert_eq!(err, MapError::Unsupported { slot: SurfaceSlot::Primary, what: "ground view" });
    assert_eq!(r.bridge.phase(), GroundPhase::Closed);
}

#[test]
fn reopening_replaces_the_previous_session() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    r.settle();
    r.open(COVERED).unwrap();
    r.settle();
    assert_eq!(r.mini.marker_count(), 1);
    assert_eq!(r.mini.shape_count(), 1);
}

// =============================================================
// live updates
// =============================================================

#[test]
fn heading_change_replaces_the_indicator() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    r.settle();
    let before = r.bridge.indicator().unwrap();

    r.bridge.on_heading(90.0, &mut r.surfaces);
    let after = r.bridge.indicator().unwrap();
    assert_ne!(before, after);
    assert_eq!(r.mini.shape_count(), 1);
    assert!(r.mini.shape(before).is_none());

    // The middle arc point of an eastward sector lies due east of the anchor.
    let path = r.indicator_path();
    let center = path[0];
    let mid = path[1 + HEADING_SECTOR_STEPS / 2];
    assert!(mid.lng > center.lng);
    assert!((mid.lat - center.lat).abs() < 1e-9);
}

#[test]
fn heading_is_normalized() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    r.bridge.on_heading(-90.0, &mut r.surfaces);
    assert!((r.bridge.session().unwrap().heading - 270.0).abs() < 1e-9);
}

#[test]
fn panorama_move_moves_marker_and_returns_position() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    r.settle();

    let to = LatLng::new(37.501, 127.001);
    assert_eq!(r.bridge.on_panorama_moved(to, &mut r.surfaces), Some(to));
    assert_eq!(r.mini.marker_positions(), vec![to]);
    assert_eq!(r.indicator_path()[0], to);
    assert_eq!(r.mini.shape_count(), 1);
}

#[test]
fn panorama_move_while_closed_is_ignored() {
    let mut r = rig();
    assert_eq!(r.bridge.on_panorama_moved(COVERED, &mut r.surfaces), None);
}

#[test]
fn mini_zoom_change_rescales_the_indicator() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    r.settle();
    let extent = |path: &[LatLng]| (path[1 + HEADING_SECTOR_STEPS / 2].lat - path[0].lat).abs();
    let before = extent(&r.indicator_path());

    r.surfaces.get_mut(SurfaceSlot::Mini).unwrap().set_zoom(18).unwrap();
    r.bridge.on_mini_view_changed(&mut r.surfaces);
    let after = extent(&r.indicator_path());
    assert!((before / after - 2.0).abs() < 1e-6, "{before} vs {after}");
}

// =============================================================
// layout guard
// =============================================================

#[test]
fn resize_before_creation_defers_overlays() {
    let mut r = rig();
    r.open(COVERED).unwrap();

    r.advance(Duration::from_millis(200));
    r.mini.clobber_container(Rect::new(0.0, 0.0, 100.0, 100.0));
    r.bridge.on_container_resized(Rect::new(0.0, 0.0, 100.0, 100.0), &mut r.surfaces, &mut r.timers, r.now);
    assert_eq!(r.mini.container_rect(), Rect::new(10.0, 10.0, 300.0, 220.0));

    // Original deadline passes without creation.
    r.advance(Duration::from_millis(150));
    assert!(r.bridge.overlays_pending());
    assert_eq!(r.mini.overlay_count(), 0);

    r.advance(Duration::from_millis(150));
    assert_eq!(r.mini.overlay_count(), 2);
}

#[test]
fn layout_guard_gives_up_after_its_budget() {
    let config = SessionConfig { layout_guard_checks: 2, ..SessionConfig::default() };
    let mut r = rig_with(config);
    r.open(COVERED).unwrap();
    let bad = Rect::new(0.0, 0.0, 50.0, 50.0);

    for _ in 0..2 {
        r.mini.clobber_container(bad);
        r.bridge.on_container_resized(bad, &mut r.surfaces, &mut r.timers, r.now);
        assert_eq!(r.mini.container_rect(), Rect::new(10.0, 10.0, 300.0, 220.0));
    }
    assert_eq!(r.bridge.layout_checks_left(), 0);

    r.mini.clobber_container(bad);
    r.bridge.on_container_resized(bad, &mut r.surfaces, &mut r.timers, r.now);
    assert_eq!(r.mini.container_rect(), bad);
}

#[test]
fn resize_to_expected_rect_costs_nothing() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    let checks = r.bridge.layout_checks_left();
    r.bridge.on_container_resized(Rect::new(10.2, 10.0, 300.0, 220.0), &mut r.surfaces, &mut r.timers, r.now);
    assert_eq!(r.bridge.layout_checks_left(), checks);
}

// =============================================================
// close
// =============================================================

#[test]
fn close_is_idempotent_and_never_double_removes() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    r.settle();

    assert!(r.bridge.close(&mut r.surfaces, &mut r.timers));
    assert!(!r.bridge.close(&mut r.surfaces, &mut r.timers));
    assert_eq!(r.bridge.phase(), GroundPhase::Closed);
    assert_eq!(r.mini.overlay_count(), 0);
    assert_eq!(r.mini.unknown_removals(), 0);
    assert!(r.primary.panorama().is_none());
    assert_eq!(r.mini.container_rect(), Rect::new(900.0, 500.0, 200.0, 150.0));
}

#[test]
fn close_before_overlays_exist_cancels_creation() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    assert!(r.bridge.close(&mut r.surfaces, &mut r.timers));
    assert!(r.timers.is_empty());

    r.settle();
    assert_eq!(r.mini.overlay_count(), 0);
    assert_eq!(r.mini.unknown_removals(), 0);
}

#[test]
fn timer_from_a_closed_session_is_a_no_op() {
    let mut r = rig();
    r.open(COVERED).unwrap();
    let stale_generation = 1;
    r.bridge.close(&mut r.surfaces, &mut r.timers);
    r.open(COVERED).unwrap();

    assert!(!r.bridge.on_create_timer(stale_generation, &mut r.surfaces));
    assert_eq!(r.mini.overlay_count(), 0);
}

#[test]
fn closing_while_opening_drops_the_late_answer() {
    let mut r = rig();
    r.bridge.open(COVERED, &mut r.surfaces, &mut r.timers).unwrap();
    assert!(r.bridge.close(&mut r.surfaces, &mut r.timers));
    assert!(r.resolve_pending().unwrap().is_none());
    assert_eq!(r.bridge.phase(), GroundPhase::Closed);
    assert!(r.primary.panorama().is_none());
}
