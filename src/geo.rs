//! Geodesy helpers shared by the heading indicator and the measurement tools.
//!
//! All functions are pure. Distances use a spherical Earth (haversine);
//! areas use a local planar approximation that is accurate for the
//! neighbourhood-sized shapes users draw by hand.

#[cfg(test)]
#[path = "geo_test.rs"]
mod geo_test;

use serde::{Deserialize, Serialize};

use crate::consts::{EARTH_RADIUS_M, MERCATOR_METERS_PER_PX_Z0, METERS_PER_DEGREE};

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A radius expressed separately along each geographic axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRadius {
    /// Radius along the meridian.
    pub lat: f64,
    /// Radius along the parallel.
    pub lng: f64,
}

/// Great-circle distance between two points in meters.
#[must_use]
pub fn geodesic_distance(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `h` a hair past 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Total length of an open path in meters.
#[must_use]
pub fn path_length(path: &[LatLng]) -> f64 {
    path.windows(2)
        .map(|w| geodesic_distance(w[0], w[1]))
        .sum()
}

/// Area of a simple polygon in square meters.
///
/// Shoelace over degrees, scaled by meters-per-degree at the polygon's mean
/// latitude. The ring may be open or closed. Self-touching rings are fine;
/// the result for self-intersecting rings is undefined.
#[must_use]
pub fn polygon_area(vertices: &[LatLng]) -> f64 {
    let vertices = match vertices {
        [first, open @ .., last] if first == last => &vertices[..=open.len()],
        _ => vertices,
    };
    if vertices.len() < 3 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let mean_lat = vertices.iter().map(|p| p.lat).sum::<f64>() / vertices.len() as f64;

    let mut twice_area = 0.0;
    for (i, p) in vertices.iter().enumerate() {
        let q = vertices[(i + 1) % vertices.len()];
        twice_area += p.lng * q.lat - q.lng * p.lat;
    }

    let square_degrees = twice_area.abs() / 2.0;
    square_degrees * METERS_PER_DEGREE * METERS_PER_DEGREE * mean_lat.to_radians().cos()
}

/// Ground resolution of a web-mercator map at `latitude` and `zoom`.
#[must_use]
pub fn meters_per_pixel(latitude: f64, zoom: f64) -> f64 {
    MERCATOR_METERS_PER_PX_Z0 * latitude.to_radians().cos() / 2f64.powf(zoom)
}

/// Convert an on-screen radius to degrees at `latitude` and `zoom`.
///
/// Overlays sized through this stay the same pixel size on screen, so they
/// must be rebuilt whenever zoom or position changes.
#[must_use]
pub fn pixel_radius_to_geo(pixel_radius: f64, latitude: f64, zoom: f64) -> GeoRadius {
    let meters = pixel_radius * meters_per_pixel(latitude, zoom);
    let cos_lat = latitude.to_radians().cos().max(f64::EPSILON);
    GeoRadius { lat: meters / METERS_PER_DEGREE, lng: meters / (METERS_PER_DEGREE * cos_lat) }
}

/// Wrap any heading in degrees into `[0, 360)`.
#[must_use]
pub fn normalize_heading(heading: f64) -> f64 {
    let h = heading.rem_euclid(360.0);
    if h >= 360.0 { 0.0 } else { h }
}

/// Closed sector polygon centred on `heading` (clockwise from north).
///
/// The ring starts and ends at `center`; `steps` arc segments span `width`
/// degrees.
#[must_use]
pub fn heading_sector(center: LatLng, heading: f64, width: f64, radius: GeoRadius, steps: usize) -> Vec<LatLng> {
    let steps = steps.max(1);
    let start = heading - width / 2.0;
    let mut ring = Vec::with_capacity(steps + 3);
    ring.push(center);
    for i in 0..=steps {
        #[allow(clippy::cast_precision_loss)]
        let bearing = (start + width * i as f64 / steps as f64).to_radians();
        ring.push(LatLng::new(center.lat + radius.lat * bearing.cos(), center.lng + radius.lng * bearing.sin()));
    }
    ring.push(center);
    ring
}

/// Human-readable length rounded to the nearest whole meter.
#[must_use]
pub fn format_distance(meters: f64) -> String {
    format!("{}m", meters.round())
}

/// Human-readable area rounded to the nearest whole square meter.
#[must_use]
pub fn format_area(square_meters: f64) -> String {
    format!("{}m²", square_meters.round())
}
