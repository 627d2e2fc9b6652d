//! Consumers of external collaborators: administrative boundaries and routes.
//!
//! The boundary service and the routing provider live outside this crate.
//! Here they are a trait ([`BoundaryLookup`]) and a payload type
//! ([`RouteResult`]); the layers only turn their geometry into overlays on
//! the primary surface and remember the ids.

#[cfg(test)]
#[path = "layers_test.rs"]
mod layers_test;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendHandle, OverlayId, ShapeKind, ShapeSpec, ShapeStyle, SurfaceSlot};
use crate::error::{MapError, ServiceError};
use crate::geo::LatLng;

// =============================================================================
// BOUNDARIES
// =============================================================================

/// Administrative level requested from the boundary service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryLevel {
    /// District-sized areas.
    Large,
    /// Neighbourhood-sized areas.
    Small,
}

/// GeoJSON geometry restricted to the types the service returns.
/// Positions are `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

impl Geometry {
    /// Outer ring of every polygon part, as `LatLng`s.
    #[must_use]
    pub fn outer_rings(&self) -> Vec<Vec<LatLng>> {
        let to_ring =
            |ring: &Vec<[f64; 2]>| -> Vec<LatLng> { ring.iter().map(|[lng, lat]| LatLng::new(*lat, *lng)).collect() };
        match self {
            Self::Polygon { coordinates } => coordinates.first().map(to_ring).into_iter().collect(),
            Self::MultiPolygon { coordinates } => coordinates.iter().filter_map(|p| p.first().map(to_ring)).collect(),
        }
    }

    /// Bounding-box area in square degrees, zero when empty.
    #[must_use]
    pub fn bbox_area_deg2(&self) -> f64 {
        let rings = self.outer_rings();
        let mut points = rings.iter().flatten();
        let Some(first) = points.next() else {
            return 0.0;
        };
        let (mut min, mut max) = (*first, *first);
        for p in points {
            min.lat = min.lat.min(p.lat);
            min.lng = min.lng.min(p.lng);
            max.lat = max.lat.max(p.lat);
            max.lng = max.lng.max(p.lng);
        }
        (max.lat - min.lat) * (max.lng - min.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryFeature {
    pub code: String,
    pub name: String,
    pub level: BoundaryLevel,
    pub geometry: Geometry,
}

impl BoundaryFeature {
    /// Parse a feature from the service's JSON payload.
    ///
    /// # Errors
    ///
    /// `ServiceError::Payload` when the JSON does not match.
    pub fn from_json(raw: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(raw).map_err(|e| ServiceError::Payload(e.to_string()))
    }
}

/// Point query against the boundary service.
pub trait BoundaryLookup {
    /// The boundary at `level` containing (or nearest to) `at`.
    ///
    /// # Errors
    ///
    /// Transport or payload failure.
    fn lookup(&mut self, at: LatLng, level: BoundaryLevel) -> Result<Option<BoundaryFeature>, ServiceError>;
}

/// Polygons of the currently highlighted boundary.
#[derive(Debug)]
pub struct BoundaryLayer {
    fallback_bbox_deg2: f64,
    shapes: Vec<OverlayId>,
    current: Option<BoundaryFeature>,
}

impl BoundaryLayer {
    #[must_use]
    pub fn new(fallback_bbox_deg2: f64) -> Self {
        Self { fallback_bbox_deg2, shapes: Vec::new(), current: None }
    }

    #[must_use]
    pub fn current(&self) -> Option<&BoundaryFeature> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Highlight the boundary at `at`, replacing any previous one.
    ///
    /// Asks for the large level first. When that feature's bounding box is
    /// wider than the fallback threshold, the small level is used instead if
    /// the service has one.
    ///
    /// # Errors
    ///
    /// `MapError::Service` when the lookup fails.
    pub fn show(
        &mut self,
        at: LatLng,
        lookup: &mut dyn BoundaryLookup,
        primary: &mut BackendHandle,
    ) -> Result<Option<&BoundaryFeature>, MapError> {
        let service = |source| MapError::Service { service: "boundary", source };
        let mut feature = lookup.lookup(at, BoundaryLevel::Large).map_err(service)?;

        if let Some(large) = &feature
            && large.geometry.bbox_area_deg2() > self.fallback_bbox_deg2
        {
            debug!(code = %large.code, bbox = large.geometry.bbox_area_deg2(), "boundary too large; trying small level");
            if let Some(small) = lookup.lookup(at, BoundaryLevel::Small).map_err(service)? {
                feature = Some(small);
            }
        }

        self.clear(primary);
        let Some(feature) = feature else {
            return Ok(None);
        };
        for ring in feature.geometry.outer_rings() {
            let spec = ShapeSpec { kind: ShapeKind::Polygon, path: ring, style: boundary_style() };
            match primary.backend_mut().add_shape(spec) {
                Ok(id) => self.shapes.push(id),
                Err(e) => warn!(code = %feature.code, error = %e, "boundary polygon not drawn"),
            }
        }
        info!(code = %feature.code, name = %feature.name, parts = self.shapes.len(), "boundary shown");
        Ok(Some(&*self.current.insert(feature)))
    }

    pub fn clear(&mut self, primary: &mut BackendHandle) {
        for id in self.shapes.drain(..) {
            primary.discard_overlay(id);
        }
        self.current = None;
    }
}

fn boundary_style() -> ShapeStyle {
    ShapeStyle {
        stroke_width: 2.0,
        stroke_color: "#3b5bdb".into(),
        stroke_opacity: 0.9,
        fill_color: Some("#3b5bdb".into()),
        fill_opacity: 0.08,
        dashed: false,
    }
}

// =============================================================================
// ROUTES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Driving,
    Walking,
    Cycling,
    Transit,
}

/// Answer from the routing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub distance_m: f64,
    pub duration_s: f64,
    pub mode: TravelMode,
    pub path: Vec<LatLng>,
}

/// The currently displayed route polyline.
#[derive(Debug, Default)]
pub struct RouteLayer {
    line: Option<OverlayId>,
}

impl RouteLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_shown(&self) -> bool {
        self.line.is_some()
    }

    /// Draw `route`, replacing the previous one.
    ///
    /// # Errors
    ///
    /// `Unsupported` when the primary backend cannot route, or the backend's
    /// failure to draw the polyline.
    pub fn show(&mut self, route: &RouteResult, primary: &mut BackendHandle) -> Result<(), MapError> {
        if !primary.capabilities().supports_routing {
            return Err(MapError::Unsupported { slot: SurfaceSlot::Primary, what: "routing" });
        }
        self.clear(primary);
        let style = ShapeStyle { stroke_width: 5.0, stroke_color: "#2f9e44".into(), ..ShapeStyle::default() };
        let id = primary.backend_mut().add_shape(ShapeSpec { kind: ShapeKind::Polyline, path: route.path.clone(), style })?;
        self.line = Some(id);
        info!(mode = ?route.mode, distance_m = route.distance_m, duration_s = route.duration_s, "route shown");
        Ok(())
    }

    pub fn clear(&mut self, primary: &mut BackendHandle) {
        if let Some(id) = self.line.take() {
            primary.discard_overlay(id);
        }
    }
}
