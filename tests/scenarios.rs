//! End-to-end behavior through the public API, with simulated vendors.

use std::rc::Rc;
use std::time::Duration;

use mapbridge::backend::sim::{SimBackend, SimController};
use mapbridge::backend::{BackendHandle, Container, PanoramaAnchor, Rect, SurfaceSlot};
use mapbridge::geo::{LatLng, geodesic_distance, pixel_radius_to_geo, polygon_area};
use mapbridge::ground::GroundPhase;
use mapbridge::measure::MeasureMode;
use mapbridge::timers::ManualClock;
use mapbridge::view::{ViewState, ZoomScale};
use mapbridge::{Command, MapError, MapSession, SessionConfig, SessionEvent};

const P1: LatLng = LatLng { lat: 37.50, lng: 127.00 };
const P2: LatLng = LatLng { lat: 37.501, lng: 127.001 };
const P3: LatLng = LatLng { lat: 37.501, lng: 127.0 };

struct Harness {
    session: MapSession,
    clock: ManualClock,
    primary: SimController,
    mini: SimController,
}

fn harness() -> Harness {
    let clock = ManualClock::new();
    let mut session =
        MapSession::new(SessionConfig::default(), ViewState::new(37.5, 127.0, 15), Rc::new(clock.clone()));

    let (sim, primary) = SimBackend::new("vendor-a", ZoomScale::Identity);
    session
        .attach_surface(
            SurfaceSlot::Primary,
            BackendHandle::new(Box::new(sim)),
            Container::new("map", Rect::new(0.0, 0.0, 1200.0, 800.0)),
        )
        .unwrap();
    let (sim, mini) = SimBackend::new("vendor-b", ZoomScale::Inverted { pivot: 20 });
    session
        .attach_surface(
            SurfaceSlot::Mini,
            BackendHandle::new(Box::new(sim)),
            Container::new("mini", Rect::new(900.0, 500.0, 240.0, 180.0)),
        )
        .unwrap();

    Harness { session, clock, primary, mini }
}

impl Harness {
    fn settle(&mut self) -> Vec<SessionEvent> {
        self.clock.advance(self.session.config().ground_settle + Duration::from_millis(1));
        self.session.pump()
    }
}

// =============================================================
// geometry laws
// =============================================================

#[test]
fn geodesic_distance_is_symmetric_and_zero_on_self() {
    let a = LatLng::new(37.5, 127.0);
    let b = LatLng::new(35.1, 129.04);
    assert!((geodesic_distance(a, b) - geodesic_distance(b, a)).abs() < 1e-9);
    assert!(geodesic_distance(a, a).abs() < f64::EPSILON);
}

#[test]
fn polygon_area_scales_with_the_square_of_size() {
    let square = |d: f64| vec![LatLng::new(0.0, 0.0), LatLng::new(0.0, d), LatLng::new(d, d), LatLng::new(d, 0.0)];
    let unit = polygon_area(&square(0.001));
    let double = polygon_area(&square(0.002));
    assert!(unit > 0.0);
    assert!((double / unit - 4.0).abs() < 1e-3);
}

#[test]
fn pixel_radius_halves_per_zoom_step() {
    for zoom in [3.0, 10.0, 17.0] {
        let near = pixel_radius_to_geo(60.0, 37.5, zoom);
        let far = pixel_radius_to_geo(60.0, 37.5, zoom + 1.0);
        assert!((near.lat / far.lat - 2.0).abs() < 1e-9);
        assert!((near.lng / far.lng - 2.0).abs() < 1e-9);
    }
}

// =============================================================
// sync
// =============================================================

#[test]
fn programmatic_push_round_trips_without_a_second_update() {
    let mut h = harness();
    h.primary.set_echo_programmatic(true);
    h.mini.set_echo_programmatic(true);
    let primary_calls = h.primary.set_view_calls();
    let mini_calls = h.mini.set_view_calls();

    let target = ViewState::new(37.55, 127.05, 13);
    h.session.jump_to(target);
    assert!(h.session.pump().is_empty());

    assert_eq!(h.primary.set_view_calls(), primary_calls + 1);
    assert_eq!(h.mini.set_view_calls(), mini_calls + 1);
    assert_eq!(h.primary.view().center, target.center());
    assert_eq!(h.mini.view().zoom, 7.0);
    assert_eq!(h.session.canonical(), target);
}

#[test]
fn dragging_holds_every_push_until_release() {
    let mut h = harness();
    let before = h.session.canonical();
    let mini_calls = h.mini.set_view_calls();

    let step_to = |step: u8| LatLng::new(37.5 + f64::from(step) * 0.001, 127.0);
    h.primary.begin_drag();
    for step in 1..=5 {
        h.primary.drag_to(step_to(step));
        h.session.pump();
        assert_eq!(h.mini.set_view_calls(), mini_calls);
        assert_eq!(h.session.canonical(), before);
    }

    h.primary.end_drag();
    h.session.pump();
    assert_eq!(h.mini.set_view_calls(), mini_calls + 1);
    assert_eq!(h.session.canonical(), before.with_center(step_to(5)));
}

// =============================================================
// measurement
// =============================================================

#[test]
fn two_point_distance_finalizes() {
    let mut h = harness();
    h.session.execute(Command::MeasureDistance);
    h.primary.click(P1);
    h.primary.click(P2);
    h.primary.right_click(P2);
    let events = h.session.pump();

    let Some(SessionEvent::MeasurementFinalized { mode, value, text, .. }) =
        events.iter().find(|e| matches!(e, SessionEvent::MeasurementFinalized { .. }))
    else {
        panic!("no finalize event in {events:?}");
    };
    assert_eq!(*mode, MeasureMode::Distance);
    assert!(*value > 0.0);
    let meters: f64 = text.trim_end_matches('m').parse().unwrap();
    assert!(meters > 0.0);

    assert_eq!(h.session.measurement().finalized().len(), 1);
    assert_eq!(h.primary.shape_count(), 1);
    assert!(h.primary.label_texts().contains(text));
}

#[test]
fn two_point_area_is_rejected() {
    let mut h = harness();
    h.session.execute(Command::MeasureArea);
    h.primary.click(P1);
    h.primary.click(P2);
    h.primary.move_pointer(P3);
    h.primary.right_click(P3);
    let events = h.session.pump();

    assert_eq!(events, vec![SessionEvent::MeasurementDiscarded { mode: MeasureMode::Area, vertices: 2 }]);
    assert!(h.session.measurement().finalized().is_empty());
    assert_eq!(h.primary.overlay_count(), 0);
}

#[test]
fn three_point_area_finalizes_and_mode_switch_clears_it() {
    let mut h = harness();
    h.session.execute(Command::MeasureArea);
    for p in [P1, P2, P3] {
        h.primary.click(p);
    }
    h.primary.right_click(P3);
    let events = h.session.pump();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::MeasurementFinalized { mode: MeasureMode::Area, .. })));
    assert!(h.primary.overlay_count() > 0);

    h.session.execute(Command::MeasureDistance);
    assert_eq!(h.primary.overlay_count(), 0);
    assert!(h.session.measurement().finalized().is_empty());
}

// =============================================================
// ground view
// =============================================================

#[test]
fn no_coverage_then_coverage() {
    let mut h = harness();
    h.primary.add_coverage(PanoramaAnchor { id: "pano-7".into(), position: LatLng::new(37.5, 127.000_2), heading: 0.0 });

    h.session.execute(Command::OpenGroundViewAt(LatLng::new(36.0, 128.0)));
    let events = h.session.pump();
    assert!(matches!(events.as_slice(), [SessionEvent::Error(MapError::NoCoverage { .. })]));
    h.settle();
    assert_eq!(h.session.ground_phase(), GroundPhase::Closed);
    assert_eq!(h.mini.overlay_count(), 0);

    h.session.execute(Command::OpenGroundViewAt(LatLng::new(37.5, 127.0)));
    let events = h.session.pump();
    assert!(events.iter().any(|e| matches!(e, SessionEvent::GroundViewOpened { anchor_id, .. } if anchor_id == "pano-7")));
    h.settle();
    assert_eq!(h.session.ground_phase(), GroundPhase::Open);
    assert_eq!(h.mini.marker_count(), 1);
    assert_eq!(h.mini.shape_count(), 1);
}

#[test]
fn closing_twice_is_harmless() {
    let mut h = harness();
    h.primary.add_coverage(PanoramaAnchor { id: "pano-7".into(), position: LatLng::new(37.5, 127.0), heading: 0.0 });
    h.session.execute(Command::OpenGroundViewAt(LatLng::new(37.5, 127.0)));
    h.session.pump();
    h.settle();

    assert_eq!(h.session.execute(Command::CloseGroundView), vec![SessionEvent::GroundViewClosed]);
    assert!(h.session.execute(Command::CloseGroundView).is_empty());
    assert_eq!(h.mini.unknown_removals(), 0);
    assert_eq!(h.primary.unknown_removals(), 0);
    assert_eq!(h.mini.overlay_count(), 0);
}

#[test]
fn close_before_settle_creates_nothing() {
    let mut h = harness();
    h.primary.add_coverage(PanoramaAnchor { id: "pano-7".into(), position: LatLng::new(37.5, 127.0), heading: 0.0 });
    h.session.execute(Command::OpenGroundViewAt(LatLng::new(37.5, 127.0)));
    h.session.pump();
    h.session.execute(Command::CloseGroundView);

    h.settle();
    assert_eq!(h.mini.overlay_count(), 0);
    assert_eq!(h.session.ground_phase(), GroundPhase::Closed);
}

#[test]
fn clear_all_leaves_no_overlays_or_extra_listeners() {
    let mut h = harness();
    let baseline = h.primary.listener_count();
    h.primary.add_coverage(PanoramaAnchor { id: "pano-7".into(), position: LatLng::new(37.5, 127.0), heading: 0.0 });

    h.session.execute(Command::MeasureDistance);
    h.primary.click(P1);
    h.primary.click(P2);
    h.primary.right_click(P2);
    h.primary.click(P3);
    h.primary.move_pointer(P1);
    h.session.execute(Command::OpenGroundViewAt(LatLng::new(37.5, 127.0)));
    h.session.pump();
    h.settle();

    h.session.execute(Command::ClearAll);
    assert_eq!(h.primary.overlay_count(), 0);
    assert_eq!(h.mini.overlay_count(), 0);
    assert_eq!(h.primary.listener_count(), baseline);
    assert!(h.primary.panorama().is_none());
}
