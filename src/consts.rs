//! Shared numeric constants for the map session.

// ── Earth model ─────────────────────────────────────────────────

/// Mean Earth radius in meters used by the haversine distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Web-Mercator ground resolution at zoom 0 on the equator, in meters per pixel.
pub const MERCATOR_METERS_PER_PX_Z0: f64 = 156_543.033_92;

// ── View state ──────────────────────────────────────────────────

/// Smallest zoom on the vendor-neutral scale.
pub const NEUTRAL_ZOOM_MIN: i32 = 1;

/// Largest zoom on the vendor-neutral scale.
pub const NEUTRAL_ZOOM_MAX: i32 = 21;

/// Position changes below this many degrees are treated as noise.
pub const POSITION_EPSILON_DEG: f64 = 1e-6;

// ── Defaults (overridable through `SessionConfig`) ──────────────

/// Grace window after a programmatic push during which echoes are ignored.
pub const DEFAULT_SYNC_GRACE_MS: u64 = 200;

/// Consecutive `get_state` failures before the failure is surfaced.
pub const DEFAULT_STATE_FAILURE_THRESHOLD: u32 = 5;

/// Search radius for the nearest ground-view anchor.
pub const DEFAULT_GROUND_SEARCH_RADIUS_M: f64 = 50.0;

/// Delay between a mini-surface resize and overlay creation.
pub const DEFAULT_GROUND_SETTLE_MS: u64 = 300;

/// Number of container-resized events the layout guard will correct.
pub const DEFAULT_LAYOUT_GUARD_CHECKS: u32 = 10;

/// On-screen radius of the heading indicator.
pub const DEFAULT_HEADING_RADIUS_PX: f64 = 60.0;

/// Angular width of the heading indicator sector.
pub const DEFAULT_HEADING_SECTOR_DEG: f64 = 60.0;

/// Arc segments used to approximate the heading sector.
pub const HEADING_SECTOR_STEPS: usize = 12;

/// Hard timeout for a backend's vendor library to become ready.
pub const DEFAULT_BACKEND_READY_TIMEOUT_MS: u64 = 10_000;

/// Polling interval for `init` retries after readiness was signalled.
pub const DEFAULT_BACKEND_POLL_MS: u64 = 100;

/// Bounding-box area (square degrees) above which the boundary layer falls
/// back to the smaller administrative level.
pub const DEFAULT_BOUNDARY_FALLBACK_BBOX_DEG2: f64 = 0.05;
