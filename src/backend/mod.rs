//! Backend capability interface.
//!
//! DESIGN
//! ======
//! Every vendor map integration implements [`MapBackend`]. The session
//! never branches on which vendor it is talking to: capabilities are
//! queried through [`Capabilities`], zoom conventions through
//! [`ZoomScale`], and raw SDK callbacks are normalized by the backend into
//! a queue of [`MapEvent`]s that the session drains in arrival order.
//!
//! Overlays and listeners are referred to by id only. Whoever creates an
//! overlay keeps its id and removes it by id; nothing closes over session
//! internals.

pub mod handle;
pub mod loader;
pub mod sim;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::geo::LatLng;
use crate::view::{NativeView, ZoomScale};

pub use handle::{BackendHandle, SurfaceSet};

/// Identifier for a marker, shape, or label created on a backend.
pub type OverlayId = Uuid;

/// Identifier for an event subscription.
pub type ListenerId = Uuid;

/// Correlates a nearest-anchor request with its asynchronous answer.
pub type RequestId = u64;

// =============================================================================
// SURFACES
// =============================================================================

/// A map surface position in the layout. Each slot owns at most one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SurfaceSlot {
    /// The main map the user works on.
    Primary,
    /// Top-down companion shown while ground view is open.
    Mini,
    /// Any further mirrored surface (split view, overview).
    Mirror(u8),
}

impl fmt::Display for SurfaceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Mini => f.write_str("mini"),
            Self::Mirror(n) => write!(f, "mirror-{n}"),
        }
    }
}

/// Container geometry in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Equal within half a pixel on every edge.
    #[must_use]
    pub fn approx_eq(&self, other: &Rect) -> bool {
        (self.x - other.x).abs() < 0.5
            && (self.y - other.y).abs() < 0.5
            && (self.width - other.width).abs() < 0.5
            && (self.height - other.height).abs() < 0.5
    }
}

/// The host element a backend renders into.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: String,
    pub rect: Rect,
}

impl Container {
    #[must_use]
    pub fn new(id: impl Into<String>, rect: Rect) -> Self {
        Self { id: id.into(), rect }
    }
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Overlay primitives a backend can draw.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlaySupport {
    pub marker: bool,
    pub polyline: bool,
    pub polygon: bool,
    pub label: bool,
}

impl OverlaySupport {
    #[must_use]
    pub fn all() -> Self {
        Self { marker: true, polyline: true, polygon: true, label: true }
    }

    #[must_use]
    pub fn supports(&self, kind: ShapeKind) -> bool {
        match kind {
            ShapeKind::Polyline => self.polyline,
            ShapeKind::Polygon => self.polygon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_ground_view: bool,
    pub supports_routing: bool,
    pub overlays: OverlaySupport,
}

// =============================================================================
// OVERLAYS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Polyline,
    Polygon,
}

/// Stroke and fill for a shape. Colors are CSS strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    pub stroke_width: f64,
    pub stroke_color: String,
    pub stroke_opacity: f64,
    /// `None` draws an unfilled outline.
    pub fill_color: Option<String>,
    pub fill_opacity: f64,
    pub dashed: bool,
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            stroke_width: 3.0,
            stroke_color: "#db4040".into(),
            stroke_opacity: 1.0,
            fill_color: None,
            fill_opacity: 0.0,
            dashed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeSpec {
    pub kind: ShapeKind,
    pub path: Vec<LatLng>,
    pub style: ShapeStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub position: LatLng,
    pub title: Option<String>,
}

/// Clickable affordance rendered inside a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelControl {
    /// Hide the label, keep the shape.
    DismissLabel,
    /// Remove the shape and every label belonging to it.
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelSpec {
    pub position: LatLng,
    pub text: String,
    pub controls: Vec<LabelControl>,
}

/// A ground-view image location returned by a nearest-anchor search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanoramaAnchor {
    pub id: String,
    pub position: LatLng,
    /// Initial heading in degrees, clockwise from north.
    pub heading: f64,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Event categories a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ViewChanged,
    PointerDown,
    PointerMove,
    Click,
    SecondaryClick,
    DragStart,
    DragEnd,
    ControlClicked,
    AnchorResolved,
    PanoramaMoved,
    PanoramaHeading,
    ContainerResized,
}

/// A normalized backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    /// Center or zoom changed. The new state is read back through `view()`.
    ViewChanged,
    PointerDown(LatLng),
    PointerMove(LatLng),
    /// Primary click on the map surface.
    Click(LatLng),
    /// Right click or equivalent secondary action.
    SecondaryClick(LatLng),
    DragStart,
    DragEnd,
    /// A label control was activated. The same gesture may also arrive as a `Click`.
    ControlClicked { overlay: OverlayId, control: LabelControl },
    /// Answer to `request_nearest_anchor`.
    AnchorResolved { request: RequestId, anchor: Option<PanoramaAnchor> },
    /// The ground view moved to a new image location.
    PanoramaMoved(LatLng),
    /// The ground view turned; degrees clockwise from north.
    PanoramaHeading(f64),
    /// The backend's container was resized or restyled.
    ContainerResized(Rect),
}

impl MapEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ViewChanged => EventKind::ViewChanged,
            Self::PointerDown(_) => EventKind::PointerDown,
            Self::PointerMove(_) => EventKind::PointerMove,
            Self::Click(_) => EventKind::Click,
            Self::SecondaryClick(_) => EventKind::SecondaryClick,
            Self::DragStart => EventKind::DragStart,
            Self::DragEnd => EventKind::DragEnd,
            Self::ControlClicked { .. } => EventKind::ControlClicked,
            Self::AnchorResolved { .. } => EventKind::AnchorResolved,
            Self::PanoramaMoved(_) => EventKind::PanoramaMoved,
            Self::PanoramaHeading(_) => EventKind::PanoramaHeading,
            Self::ContainerResized(_) => EventKind::ContainerResized,
        }
    }
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Contract every vendor integration satisfies.
///
/// Views are exchanged in the backend's native zoom convention; use
/// [`BackendHandle`] for neutral-scale access.
pub trait MapBackend {
    /// Vendor name for logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn zoom_scale(&self) -> ZoomScale;

    /// Attach a live map to `container`.
    ///
    /// # Errors
    ///
    /// `BackendError::NotReady` when the vendor library has not loaded yet.
    fn init(&mut self, container: &Container, initial: NativeView) -> Result<(), BackendError>;

    /// Current center and native zoom.
    ///
    /// # Errors
    ///
    /// Any error means the backend cannot report state right now.
    fn view(&self) -> Result<NativeView, BackendError>;

    /// Move the camera. Idempotent: setting the state already shown must not
    /// emit `ViewChanged`.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn set_view(&mut self, view: NativeView) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Backend failure.
    fn set_zoom(&mut self, zoom: f64) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Backend failure.
    fn set_center(&mut self, center: LatLng) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// `Unsupported` when markers are not available.
    fn add_marker(&mut self, spec: MarkerSpec) -> Result<OverlayId, BackendError>;

    /// # Errors
    ///
    /// `UnknownOverlay` when `id` is not a live marker.
    fn move_marker(&mut self, id: OverlayId, position: LatLng) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// `Unsupported` when the shape kind is not available.
    fn add_shape(&mut self, spec: ShapeSpec) -> Result<OverlayId, BackendError>;

    /// # Errors
    ///
    /// `UnknownOverlay` when `id` is not a live shape.
    fn update_shape(&mut self, id: OverlayId, path: &[LatLng]) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// `Unsupported` when labels are not available.
    fn add_label(&mut self, spec: LabelSpec) -> Result<OverlayId, BackendError>;

    /// # Errors
    ///
    /// `UnknownOverlay` when `id` is not a live label.
    fn update_label(&mut self, id: OverlayId, position: LatLng, text: &str) -> Result<(), BackendError>;

    /// Remove any overlay kind.
    ///
    /// # Errors
    ///
    /// `UnknownOverlay` when `id` was never created or is already gone.
    fn remove_overlay(&mut self, id: OverlayId) -> Result<(), BackendError>;

    /// # Errors
    ///
    /// Backend failure.
    fn subscribe(&mut self, kind: EventKind) -> Result<ListenerId, BackendError>;

    /// # Errors
    ///
    /// `UnknownListener` when `id` is not subscribed.
    fn unsubscribe(&mut self, id: ListenerId) -> Result<(), BackendError>;

    /// Drain normalized events for subscribed kinds, oldest first.
    fn poll_events(&mut self) -> Vec<MapEvent>;

    /// Start an asynchronous nearest ground-view anchor search. The answer
    /// arrives as `MapEvent::AnchorResolved` carrying `request`.
    ///
    /// # Errors
    ///
    /// `Unsupported` on backends without ground view.
    fn request_nearest_anchor(&mut self, _request: RequestId, _at: LatLng, _radius_m: f64) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("ground view"))
    }

    /// Show the immersive view at `anchor`.
    ///
    /// # Errors
    ///
    /// `Unsupported` on backends without ground view.
    fn open_panorama(&mut self, _anchor: &PanoramaAnchor) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("ground view"))
    }

    /// Hide the immersive view. A no-op when none is shown.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn close_panorama(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn container_rect(&self) -> Rect;

    /// # Errors
    ///
    /// Backend failure.
    fn set_container_rect(&mut self, rect: Rect) -> Result<(), BackendError>;

    /// Geodesic polygon area from the vendor SDK, when it has one.
    fn native_area(&self, _path: &[LatLng]) -> Option<f64> {
        None
    }

    /// Release every listener, overlay, and native resource.
    fn cleanup(&mut self);
}
