//! Session tuning parsed from environment variables.

use std::time::Duration;

use crate::consts::{
    DEFAULT_BACKEND_POLL_MS, DEFAULT_BACKEND_READY_TIMEOUT_MS, DEFAULT_BOUNDARY_FALLBACK_BBOX_DEG2,
    DEFAULT_GROUND_SEARCH_RADIUS_M, DEFAULT_GROUND_SETTLE_MS, DEFAULT_HEADING_RADIUS_PX, DEFAULT_HEADING_SECTOR_DEG,
    DEFAULT_LAYOUT_GUARD_CHECKS, DEFAULT_STATE_FAILURE_THRESHOLD, DEFAULT_SYNC_GRACE_MS,
};
use crate::error::MapError;

/// Placement of the mini surface while ground view is open, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiniLayout {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for MiniLayout {
    fn default() -> Self {
        Self { x: 10.0, y: 10.0, width: 300.0, height: 220.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// How long a programmatic push keeps its surface's echoes suppressed.
    pub sync_grace: Duration,
    /// Consecutive `get_state` failures before the host is told.
    pub state_failure_threshold: u32,
    /// Radius searched for the nearest ground-view anchor.
    pub ground_search_radius_m: f64,
    /// Delay between the last mini-surface resize and overlay creation.
    pub ground_settle: Duration,
    /// Container-resized events the layout guard will correct.
    pub layout_guard_checks: u32,
    pub heading_radius_px: f64,
    pub heading_sector_deg: f64,
    pub mini_layout: MiniLayout,
    /// Readiness loader: hard timeout and polling interval.
    pub backend_ready_timeout: Duration,
    pub backend_poll: Duration,
    /// Bounding-box area above which boundary lookups fall back to the smaller level.
    pub boundary_fallback_bbox_deg2: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_grace: Duration::from_millis(DEFAULT_SYNC_GRACE_MS),
            state_failure_threshold: DEFAULT_STATE_FAILURE_THRESHOLD,
            ground_search_radius_m: DEFAULT_GROUND_SEARCH_RADIUS_M,
            ground_settle: Duration::from_millis(DEFAULT_GROUND_SETTLE_MS),
            layout_guard_checks: DEFAULT_LAYOUT_GUARD_CHECKS,
            heading_radius_px: DEFAULT_HEADING_RADIUS_PX,
            heading_sector_deg: DEFAULT_HEADING_SECTOR_DEG,
            mini_layout: MiniLayout::default(),
            backend_ready_timeout: Duration::from_millis(DEFAULT_BACKEND_READY_TIMEOUT_MS),
            backend_poll: Duration::from_millis(DEFAULT_BACKEND_POLL_MS),
            boundary_fallback_bbox_deg2: DEFAULT_BOUNDARY_FALLBACK_BBOX_DEG2,
        }
    }
}

impl SessionConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// Optional:
    /// - `MAP_SYNC_GRACE_MS` (200)
    /// - `MAP_STATE_FAILURE_THRESHOLD` (5)
    /// - `MAP_GROUND_SEARCH_RADIUS_M` (50)
    /// - `MAP_GROUND_SETTLE_MS` (300)
    /// - `MAP_LAYOUT_GUARD_CHECKS` (10)
    /// - `MAP_HEADING_RADIUS_PX` (60)
    /// - `MAP_HEADING_SECTOR_DEG` (60)
    /// - `MAP_MINI_X`, `MAP_MINI_Y`, `MAP_MINI_WIDTH`, `MAP_MINI_HEIGHT` (10, 10, 300, 220)
    /// - `MAP_BACKEND_READY_TIMEOUT_MS` (10000)
    /// - `MAP_BACKEND_POLL_MS` (100)
    /// - `MAP_BOUNDARY_FALLBACK_BBOX_DEG2` (0.05)
    ///
    /// # Errors
    ///
    /// Returns `MapError::Config` when a value parses but is out of range.
    pub fn from_env() -> Result<Self, MapError> {
        let defaults = Self::default();
        let mini = defaults.mini_layout;
        let config = Self {
            sync_grace: Duration::from_millis(env_parse("MAP_SYNC_GRACE_MS", DEFAULT_SYNC_GRACE_MS)),
            state_failure_threshold: env_parse("MAP_STATE_FAILURE_THRESHOLD", DEFAULT_STATE_FAILURE_THRESHOLD),
            ground_search_radius_m: env_parse("MAP_GROUND_SEARCH_RADIUS_M", DEFAULT_GROUND_SEARCH_RADIUS_M),
            ground_settle: Duration::from_millis(env_parse("MAP_GROUND_SETTLE_MS", DEFAULT_GROUND_SETTLE_MS)),
            layout_guard_checks: env_parse("MAP_LAYOUT_GUARD_CHECKS", DEFAULT_LAYOUT_GUARD_CHECKS),
            heading_radius_px: env_parse("MAP_HEADING_RADIUS_PX", DEFAULT_HEADING_RADIUS_PX),
            heading_sector_deg: env_parse("MAP_HEADING_SECTOR_DEG", DEFAULT_HEADING_SECTOR_DEG),
            mini_layout: MiniLayout {
                x: env_parse("MAP_MINI_X", mini.x),
                y: env_parse("MAP_MINI_Y", mini.y),
                width: env_parse("MAP_MINI_WIDTH", mini.width),
                height: env_parse("MAP_MINI_HEIGHT", mini.height),
            },
            backend_ready_timeout: Duration::from_millis(env_parse(
                "MAP_BACKEND_READY_TIMEOUT_MS",
                DEFAULT_BACKEND_READY_TIMEOUT_MS,
            )),
            backend_poll: Duration::from_millis(env_parse("MAP_BACKEND_POLL_MS", DEFAULT_BACKEND_POLL_MS)),
            boundary_fallback_bbox_deg2: env_parse(
                "MAP_BOUNDARY_FALLBACK_BBOX_DEG2",
                DEFAULT_BOUNDARY_FALLBACK_BBOX_DEG2,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field ranges.
    ///
    /// # Errors
    ///
    /// Returns `MapError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.sync_grace.is_zero() {
            return Err(MapError::Config("sync grace window must be positive".into()));
        }
        if self.state_failure_threshold == 0 {
            return Err(MapError::Config("state failure threshold must be at least 1".into()));
        }
        if !(self.ground_search_radius_m > 0.0) {
            return Err(MapError::Config(format!("ground search radius {} must be positive", self.ground_search_radius_m)));
        }
        if !(self.heading_sector_deg > 0.0 && self.heading_sector_deg <= 360.0) {
            return Err(MapError::Config(format!("heading sector {}° must be in (0, 360]", self.heading_sector_deg)));
        }
        if !(self.heading_radius_px > 0.0) {
            return Err(MapError::Config("heading radius must be positive".into()));
        }
        if !(self.mini_layout.width > 0.0 && self.mini_layout.height > 0.0) {
            return Err(MapError::Config("mini surface must have a positive size".into()));
        }
        if self.backend_poll.is_zero() || self.backend_poll > self.backend_ready_timeout {
            return Err(MapError::Config("backend poll interval must be positive and below the ready timeout".into()));
        }
        Ok(())
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
