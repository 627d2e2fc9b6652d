//! Vendor-neutral view state and per-backend zoom conventions.
//!
//! The session stores zoom only on the neutral (web-mercator style) scale.
//! Each backend declares a [`ZoomScale`] describing how its own zoom or
//! "level" maps onto that scale; conversion happens at the backend handle.

#[cfg(test)]
#[path = "view_test.rs"]
mod view_test;

use serde::{Deserialize, Serialize};

use crate::consts::{NEUTRAL_ZOOM_MAX, NEUTRAL_ZOOM_MIN, POSITION_EPSILON_DEG};
use crate::geo::LatLng;

/// Camera position shared by every surface of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub lat: f64,
    pub lng: f64,
    /// Zoom on the neutral scale, always within `NEUTRAL_ZOOM_MIN..=NEUTRAL_ZOOM_MAX`.
    pub zoom: i32,
}

impl ViewState {
    /// Build a view state, clamping zoom into the neutral range.
    #[must_use]
    pub fn new(lat: f64, lng: f64, zoom: i32) -> Self {
        Self { lat, lng, zoom: clamp_zoom(zoom) }
    }

    #[must_use]
    pub fn center(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    /// Same zoom, new center.
    #[must_use]
    pub fn with_center(self, center: LatLng) -> Self {
        Self { lat: center.lat, lng: center.lng, ..self }
    }

    /// Whether `other` differs by more than the noise thresholds
    /// (position epsilon, exact zoom).
    #[must_use]
    pub fn differs_from(&self, other: &ViewState) -> bool {
        self.zoom != other.zoom
            || (self.lat - other.lat).abs() > POSITION_EPSILON_DEG
            || (self.lng - other.lng).abs() > POSITION_EPSILON_DEG
    }
}

impl Default for ViewState {
    fn default() -> Self {
        // Seoul City Hall at a district-level zoom.
        Self::new(37.566_5, 126.978, 16)
    }
}

/// Clamp a zoom into the neutral range.
#[must_use]
pub fn clamp_zoom(zoom: i32) -> i32 {
    zoom.clamp(NEUTRAL_ZOOM_MIN, NEUTRAL_ZOOM_MAX)
}

/// How a backend's native zoom relates to the neutral scale.
///
/// Conversions are pure and mutual inverses over the neutral range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoomScale {
    /// Native zoom equals neutral zoom.
    #[default]
    Identity,
    /// Native "level" grows as the map zooms out: `native = pivot - neutral`.
    Inverted { pivot: i32 },
    /// Native zoom is shifted by a constant: `native = neutral + delta`.
    Offset { delta: i32 },
}

impl ZoomScale {
    /// Neutral zoom to the backend's native value.
    #[must_use]
    pub fn to_native(self, neutral: i32) -> f64 {
        let neutral = clamp_zoom(neutral);
        let native = match self {
            Self::Identity => neutral,
            Self::Inverted { pivot } => pivot - neutral,
            Self::Offset { delta } => neutral + delta,
        };
        f64::from(native)
    }

    /// Native value back to neutral zoom, rounding fractional zooms.
    #[must_use]
    pub fn to_neutral(self, native: f64) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        let native = native.round().clamp(f64::from(i32::MIN / 2), f64::from(i32::MAX / 2)) as i32;
        let neutral = match self {
            Self::Identity => native,
            Self::Inverted { pivot } => pivot - native,
            Self::Offset { delta } => native - delta,
        };
        clamp_zoom(neutral)
    }
}

/// A view expressed in a backend's own zoom convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativeView {
    pub center: LatLng,
    pub zoom: f64,
}
