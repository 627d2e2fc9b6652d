//! Error taxonomy for backends, the session core, and external services.
//!
//! PROPAGATION
//! ===========
//! Synchronization and overlay-lifecycle failures are logged and swallowed
//! where the session can recover; they never corrupt the canonical view or
//! leak overlays. Only variants for which [`ErrorCode::is_user_facing`]
//! returns true reach the host as `SessionEvent::Error`.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

use crate::backend::{ListenerId, OverlayId, SurfaceSlot};
use crate::measure::MeasureMode;

/// Errors raised by a backend implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The vendor library has not finished loading.
    #[error("backend library not ready")]
    NotReady,

    /// The backend does not implement this capability.
    #[error("backend does not support {0}")]
    Unsupported(&'static str),

    /// The overlay id is unknown to this backend (never created or already removed).
    #[error("unknown overlay {0}")]
    UnknownOverlay(OverlayId),

    /// The listener id is unknown to this backend.
    #[error("unknown listener {0}")]
    UnknownListener(ListenerId),

    /// Any other failure reported by the vendor SDK.
    #[error("backend failure: {0}")]
    Native(String),
}

/// Errors reported by external collaborators (boundary lookup, routing).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("service request failed: {0}")]
    Request(String),

    #[error("service payload invalid: {0}")]
    Payload(String),
}

/// Errors produced by the map session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MapError {
    /// A backend's vendor library never became ready.
    #[error("backend {backend} did not load within {waited_ms}ms")]
    BackendLoadTimeout { backend: String, waited_ms: u64 },

    /// No ground-view anchor near the requested point.
    #[error("no ground view within {radius_m}m of ({lat:.6}, {lng:.6})")]
    NoCoverage { lat: f64, lng: f64, radius_m: f64 },

    /// A backend failed to report its view state.
    #[error("could not read view state from {slot}: {source}")]
    StateReadFailure { slot: SurfaceSlot, source: BackendError },

    /// A measurement was finalized below its minimum vertex count.
    #[error("{mode:?} measurement needs {need} vertices, has {have}")]
    InsufficientVertices { mode: MeasureMode, have: usize, need: usize },

    /// No backend is attached to the surface slot.
    #[error("no backend attached to {0}")]
    MissingSurface(SurfaceSlot),

    /// The attached backend cannot perform the requested operation.
    #[error("{slot} backend does not support {what}")]
    Unsupported { slot: SurfaceSlot, what: &'static str },

    /// A backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An external service failed.
    #[error("{service}: {source}")]
    Service { service: &'static str, source: ServiceError },

    /// A configuration value is out of range.
    #[error("config invalid: {0}")]
    Config(String),
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and user-facing flag for errors reaching the host.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Whether the host should show this error to the user.
    fn is_user_facing(&self) -> bool {
        true
    }
}

impl ErrorCode for MapError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BackendLoadTimeout { .. } => "E_BACKEND_LOAD_TIMEOUT",
            Self::NoCoverage { .. } => "E_NO_COVERAGE",
            Self::StateReadFailure { .. } => "E_STATE_READ_FAILURE",
            Self::InsufficientVertices { .. } => "E_INSUFFICIENT_VERTICES",
            Self::MissingSurface(_) => "E_MISSING_SURFACE",
            Self::Unsupported { .. } => "E_UNSUPPORTED",
            Self::Backend(_) => "E_BACKEND",
            Self::Service { .. } => "E_SERVICE",
            Self::Config(_) => "E_CONFIG",
        }
    }

    /// `StateReadFailure` only reaches this point once it is persistent;
    /// `InsufficientVertices` is always silent.
    fn is_user_facing(&self) -> bool {
        !matches!(self, Self::InsufficientVertices { .. } | Self::Backend(_))
    }
}
