//! In-memory backend for tests, replay, and the demo driver.
//!
//! `SimBackend` implements the full [`MapBackend`] contract without a vendor
//! SDK. A cloned [`SimController`] shares its state so a test (or the demo
//! script) can play the role of the user and the vendor library: emit
//! gestures, move the ground view, restyle the container, flip readiness,
//! and inspect what the session drew.
//!
//! Events for kinds nobody subscribed to are dropped, matching how vendor
//! SDKs only call back registered listeners.

#[cfg(test)]
#[path = "sim_test.rs"]
mod sim_test;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use uuid::Uuid;

use super::{
    Capabilities, Container, EventKind, LabelControl, LabelSpec, ListenerId, MapBackend, MapEvent, MarkerSpec,
    OverlayId, OverlaySupport, PanoramaAnchor, Rect, RequestId, ShapeSpec,
};
use crate::error::BackendError;
use crate::geo::{LatLng, geodesic_distance};
use crate::view::{NativeView, ZoomScale};

#[derive(Debug)]
struct SimState {
    zoom: ZoomScale,
    capabilities: Capabilities,
    ready: bool,
    initialized: bool,
    container_id: Option<String>,
    rect: Rect,
    view: NativeView,
    fail_view: bool,
    echo_programmatic: bool,
    native_area: Option<f64>,
    markers: HashMap<OverlayId, MarkerSpec>,
    shapes: HashMap<OverlayId, ShapeSpec>,
    labels: HashMap<OverlayId, LabelSpec>,
    listeners: HashMap<ListenerId, EventKind>,
    queue: VecDeque<MapEvent>,
    coverage: Vec<PanoramaAnchor>,
    panorama: Option<PanoramaAnchor>,
    set_view_calls: usize,
    unknown_removals: usize,
    cleanups: usize,
}

impl SimState {
    fn subscribed(&self, kind: EventKind) -> bool {
        self.listeners.values().any(|k| *k == kind)
    }

    fn push(&mut self, event: MapEvent) -> bool {
        if self.subscribed(event.kind()) {
            self.queue.push_back(event);
            true
        } else {
            false
        }
    }

    fn overlay_count(&self) -> usize {
        self.markers.len() + self.shapes.len() + self.labels.len()
    }
}

/// Vendor-free backend. Create with [`SimBackend::new`].
#[derive(Debug)]
pub struct SimBackend {
    name: String,
    state: Rc<RefCell<SimState>>,
}

/// Test/driver side of a [`SimBackend`].
#[derive(Debug, Clone)]
pub struct SimController {
    state: Rc<RefCell<SimState>>,
}

impl SimBackend {
    /// A ready backend with every capability and the given zoom convention.
    #[must_use]
    pub fn new(name: impl Into<String>, zoom: ZoomScale) -> (Self, SimController) {
        let state = SimState {
            zoom,
            capabilities: Capabilities {
                supports_ground_view: true,
                supports_routing: true,
                overlays: OverlaySupport::all(),
            },
            ready: true,
            initialized: false,
            container_id: None,
            rect: Rect::default(),
            view: NativeView { center: LatLng::default(), zoom: zoom.to_native(crate::consts::NEUTRAL_ZOOM_MIN) },
            fail_view: false,
            echo_programmatic: false,
            native_area: None,
            markers: HashMap::new(),
            shapes: HashMap::new(),
            labels: HashMap::new(),
            listeners: HashMap::new(),
            queue: VecDeque::new(),
            coverage: Vec::new(),
            panorama: None,
            set_view_calls: 0,
            unknown_removals: 0,
            cleanups: 0,
        };
        let state = Rc::new(RefCell::new(state));
        (Self { name: name.into(), state: Rc::clone(&state) }, SimController { state })
    }
}

impl MapBackend for SimBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.state.borrow().capabilities
    }

    fn zoom_scale(&self) -> ZoomScale {
        self.state.borrow().zoom
    }

    fn init(&mut self, container: &Container, initial: NativeView) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        if !s.ready {
            return Err(BackendError::NotReady);
        }
        s.initialized = true;
        s.container_id = Some(container.id.clone());
        s.rect = container.rect;
        s.view = initial;
        Ok(())
    }

    fn view(&self) -> Result<NativeView, BackendError> {
        let s = self.state.borrow();
        if !s.initialized {
            return Err(BackendError::NotReady);
        }
        if s.fail_view {
            return Err(BackendError::Native("view unavailable".into()));
        }
        Ok(s.view)
    }

    fn set_view(&mut self, view: NativeView) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        s.set_view_calls += 1;
        if s.view == view {
            return Ok(());
        }
        s.view = view;
        if s.echo_programmatic {
            s.push(MapEvent::ViewChanged);
        }
        Ok(())
    }

    fn set_zoom(&mut self, zoom: f64) -> Result<(), BackendError> {
        let center = self.state.borrow().view.center;
        self.set_view(NativeView { center, zoom })
    }

    fn set_center(&mut self, center: LatLng) -> Result<(), BackendError> {
        let zoom = self.state.borrow().view.zoom;
        self.set_view(NativeView { center, zoom })
    }

    fn add_marker(&mut self, spec: MarkerSpec) -> Result<OverlayId, BackendError> {
        let mut s = self.state.borrow_mut();
        if !s.capabilities.overlays.marker {
            return Err(BackendError::Unsupported("markers"));
        }
        let id = Uuid::new_v4();
        s.markers.insert(id, spec);
        Ok(id)
    }

    fn move_marker(&mut self, id: OverlayId, position: LatLng) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        let marker = s.markers.get_mut(&id).ok_or(BackendError::UnknownOverlay(id))?;
        marker.position = position;
        Ok(())
    }

    fn add_shape(&mut self, spec: ShapeSpec) -> Result<OverlayId, BackendError> {
        let mut s = self.state.borrow_mut();
        if !s.capabilities.overlays.supports(spec.kind) {
            return Err(BackendError::Unsupported("shape kind"));
        }
        let id = Uuid::new_v4();
        s.shapes.insert(id, spec);
        Ok(id)
    }

    fn update_shape(&mut self, id: OverlayId, path: &[LatLng]) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        let shape = s.shapes.get_mut(&id).ok_or(BackendError::UnknownOverlay(id))?;
        shape.path = path.to_vec();
        Ok(())
    }

    fn add_label(&mut self, spec: LabelSpec) -> Result<OverlayId, BackendError> {
        let mut s = self.state.borrow_mut();
        if !s.capabilities.overlays.label {
            return Err(BackendError::Unsupported("labels"));
        }
        let id = Uuid::new_v4();
        s.labels.insert(id, spec);
        Ok(id)
    }

    fn update_label(&mut self, id: OverlayId, position: LatLng, text: &str) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        let label = s.labels.get_mut(&id).ok_or(BackendError::UnknownOverlay(id))?;
        label.position = position;
        text.clone_into(&mut label.text);
        Ok(())
    }

    fn remove_overlay(&mut self, id: OverlayId) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        let removed =
            s.markers.remove(&id).is_some() || s.shapes.remove(&id).is_some() || s.labels.remove(&id).is_some();
        if removed {
            Ok(())
        } else {
            s.unknown_removals += 1;
            Err(BackendError::UnknownOverlay(id))
        }
    }

    fn subscribe(&mut self, kind: EventKind) -> Result<ListenerId, BackendError> {
        let id = Uuid::new_v4();
        self.state.borrow_mut().listeners.insert(id, kind);
        Ok(id)
    }

    fn unsubscribe(&mut self, id: ListenerId) -> Result<(), BackendError> {
        match self.state.borrow_mut().listeners.remove(&id) {
            Some(_) => Ok(()),
            None => Err(BackendError::UnknownListener(id)),
        }
    }

    fn poll_events(&mut self) -> Vec<MapEvent> {
        self.state.borrow_mut().queue.drain(..).collect()
    }

    fn request_nearest_anchor(&mut self, request: RequestId, at: LatLng, radius_m: f64) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        if !s.capabilities.supports_ground_view {
            return Err(BackendError::Unsupported("ground view"));
        }
        let anchor = s
            .coverage
            .iter()
            .map(|a| (geodesic_distance(at, a.position), a))
            .filter(|(d, _)| *d <= radius_m)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, a)| a.clone());
        s.push(MapEvent::AnchorResolved { request, anchor });
        Ok(())
    }

    fn open_panorama(&mut self, anchor: &PanoramaAnchor) -> Result<(), BackendError> {
        let mut s = self.state.borrow_mut();
        if !s.capabilities.supports_ground_view {
            return Err(BackendError::Unsupported("ground view"));
        }
        s.panorama = Some(anchor.clone());
        Ok(())
    }

    fn close_panorama(&mut self) -> Result<(), BackendError> {
        self.state.borrow_mut().panorama = None;
        Ok(())
    }

    fn container_rect(&self) -> Rect {
        self.state.borrow().rect
    }

    fn set_container_rect(&mut self, rect: Rect) -> Result<(), BackendError> {
        self.state.borrow_mut().rect = rect;
        Ok(())
    }

    fn native_area(&self, _path: &[LatLng]) -> Option<f64> {
        self.state.borrow().native_area
    }

    fn cleanup(&mut self) {
        let mut s = self.state.borrow_mut();
        s.markers.clear();
        s.shapes.clear();
        s.labels.clear();
        s.listeners.clear();
        s.queue.clear();
        s.panorama = None;
        s.initialized = false;
        s.cleanups += 1;
    }
}

impl SimController {
    // --- Vendor-side knobs ---

    pub fn set_ready(&self, ready: bool) {
        self.state.borrow_mut().ready = ready;
    }

    /// Make `view()` fail until cleared.
    pub fn set_fail_view(&self, fail: bool) {
        self.state.borrow_mut().fail_view = fail;
    }

    /// Emit `ViewChanged` after programmatic moves, as some vendor SDKs do.
    pub fn set_echo_programmatic(&self, echo: bool) {
        self.state.borrow_mut().echo_programmatic = echo;
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state.borrow_mut().capabilities = capabilities;
    }

    /// Report a fixed value from `native_area`.
    pub fn set_native_area(&self, area: Option<f64>) {
        self.state.borrow_mut().native_area = area;
    }

    /// Register a ground-view image location.
    pub fn add_coverage(&self, anchor: PanoramaAnchor) {
        self.state.borrow_mut().coverage.push(anchor);
    }

    // --- User gestures (return whether a listener received them) ---

    pub fn emit(&self, event: MapEvent) -> bool {
        self.state.borrow_mut().push(event)
    }

    /// Pan/zoom as a user would: move the camera, then notify.
    pub fn user_move(&self, center: LatLng, native_zoom: f64) -> bool {
        let mut s = self.state.borrow_mut();
        s.view = NativeView { center, zoom: native_zoom };
        s.push(MapEvent::ViewChanged)
    }

    pub fn begin_drag(&self) -> bool {
        self.emit(MapEvent::DragStart)
    }

    pub fn drag_to(&self, center: LatLng) -> bool {
        let zoom = self.state.borrow().view.zoom;
        self.user_move(center, zoom)
    }

    pub fn end_drag(&self) -> bool {
        self.emit(MapEvent::DragEnd)
    }

    pub fn click(&self, at: LatLng) -> bool {
        self.emit(MapEvent::Click(at))
    }

    pub fn right_click(&self, at: LatLng) -> bool {
        self.emit(MapEvent::SecondaryClick(at))
    }

    pub fn move_pointer(&self, at: LatLng) -> bool {
        self.emit(MapEvent::PointerMove(at))
    }

    /// Press a label control. Like a DOM button inside a map overlay, the
    /// press also reaches the map as a click at the label's position.
    pub fn click_control(&self, overlay: OverlayId, control: LabelControl) -> bool {
        let position = self.state.borrow().labels.get(&overlay).map(|l| l.position);
        let Some(position) = position else {
            return false;
        };
        let delivered = self.emit(MapEvent::ControlClicked { overlay, control });
        self.click(position);
        delivered
    }

    pub fn move_panorama(&self, to: LatLng) -> bool {
        self.emit(MapEvent::PanoramaMoved(to))
    }

    pub fn turn_panorama(&self, heading: f64) -> bool {
        self.emit(MapEvent::PanoramaHeading(heading))
    }

    /// Restyle the container behind the session's back.
    pub fn clobber_container(&self, rect: Rect) -> bool {
        let mut s = self.state.borrow_mut();
        s.rect = rect;
        s.push(MapEvent::ContainerResized(rect))
    }

    // --- Inspection ---

    #[must_use]
    pub fn view(&self) -> NativeView {
        self.state.borrow().view
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    #[must_use]
    pub fn container_id(&self) -> Option<String> {
        self.state.borrow().container_id.clone()
    }

    #[must_use]
    pub fn container_rect(&self) -> Rect {
        self.state.borrow().rect
    }

    #[must_use]
    pub fn marker_positions(&self) -> Vec<LatLng> {
        self.state.borrow().markers.values().map(|m| m.position).collect()
    }

    #[must_use]
    pub fn shapes(&self) -> Vec<(OverlayId, ShapeSpec)> {
        self.state.borrow().shapes.iter().map(|(id, s)| (*id, s.clone())).collect()
    }

    #[must_use]
    pub fn shape(&self, id: OverlayId) -> Option<ShapeSpec> {
        self.state.borrow().shapes.get(&id).cloned()
    }

    #[must_use]
    pub fn labels(&self) -> Vec<(OverlayId, LabelSpec)> {
        self.state.borrow().labels.iter().map(|(id, l)| (*id, l.clone())).collect()
    }

    #[must_use]
    pub fn label_texts(&self) -> Vec<String> {
        let mut texts: Vec<String> = self.state.borrow().labels.values().map(|l| l.text.clone()).collect();
        texts.sort();
        texts
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.state.borrow().markers.len()
    }

    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.state.borrow().shapes.len()
    }

    #[must_use]
    pub fn label_count(&self) -> usize {
        self.state.borrow().labels.len()
    }

    #[must_use]
    pub fn overlay_count(&self) -> usize {
        self.state.borrow().overlay_count()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    #[must_use]
    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        self.state.borrow().subscribed(kind)
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.state.borrow().queue.len()
    }

    #[must_use]
    pub fn panorama(&self) -> Option<PanoramaAnchor> {
        self.state.borrow().panorama.clone()
    }

    #[must_use]
    pub fn set_view_calls(&self) -> usize {
        self.state.borrow().set_view_calls
    }

    /// Removals of overlays that did not exist.
    #[must_use]
    pub fn unknown_removals(&self) -> usize {
        self.state.borrow().unknown_removals
    }

    #[must_use]
    pub fn cleanups(&self) -> usize {
        self.state.borrow().cleanups
    }
}
