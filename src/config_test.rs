use super::*;
use crate::error::ErrorCode;

// Env-touching tests use distinct variable sets so they can run in parallel;
// the two `from_env` tests share one lock.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

const MAP_VARS: [&str; 14] = [
    "MAP_SYNC_GRACE_MS",
    "MAP_STATE_FAILURE_THRESHOLD",
    "MAP_GROUND_SEARCH_RADIUS_M",
    "MAP_GROUND_SETTLE_MS",
    "MAP_LAYOUT_GUARD_CHECKS",
    "MAP_HEADING_RADIUS_PX",
    "MAP_HEADING_SECTOR_DEG",
    "MAP_MINI_X",
    "MAP_MINI_Y",
    "MAP_MINI_WIDTH",
    "MAP_MINI_HEIGHT",
    "MAP_BACKEND_READY_TIMEOUT_MS",
    "MAP_BACKEND_POLL_MS",
    "MAP_BOUNDARY_FALLBACK_BBOX_DEG2",
];

/// # Safety
/// Callers hold `ENV_LOCK`.
unsafe fn clear_map_env() {
    for var in MAP_VARS {
        unsafe { std::env::remove_var(var) };
    }
}

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: u64 = env_parse("__MAPBRIDGE_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__MAPBRIDGE_TEST_VALID__", " 99 ") };
    let val: u32 = env_parse("__MAPBRIDGE_TEST_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__MAPBRIDGE_TEST_VALID__") };
}

#[test]
fn env_parse_invalid_returns_default() {
    unsafe { std::env::set_var("__MAPBRIDGE_TEST_INVALID__", "fast") };
    let val: f64 = env_parse("__MAPBRIDGE_TEST_INVALID__", 1.5);
    assert!((val - 1.5).abs() < f64::EPSILON);
    unsafe { std::env::remove_var("__MAPBRIDGE_TEST_INVALID__") };
}

// =============================================================================
// SessionConfig
// =============================================================================

#[test]
fn default_config_is_valid() {
    assert!(SessionConfig::default().validate().is_ok());
}

#[test]
fn from_env_defaults_match_constants() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe { clear_map_env() };

    let cfg = SessionConfig::from_env().unwrap();
    assert_eq!(cfg, SessionConfig::default());
    assert_eq!(cfg.sync_grace, Duration::from_millis(200));
    assert_eq!(cfg.layout_guard_checks, 10);
}

#[test]
fn from_env_parses_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_map_env();
        std::env::set_var("MAP_SYNC_GRACE_MS", "150");
        std::env::set_var("MAP_GROUND_SEARCH_RADIUS_M", "75.5");
        std::env::set_var("MAP_MINI_WIDTH", "420");
        std::env::set_var("MAP_BACKEND_POLL_MS", "25");
    }

    let cfg = SessionConfig::from_env().unwrap();
    assert_eq!(cfg.sync_grace, Duration::from_millis(150));
    assert!((cfg.ground_search_radius_m - 75.5).abs() < f64::EPSILON);
    assert!((cfg.mini_layout.width - 420.0).abs() < f64::EPSILON);
    assert_eq!(cfg.backend_poll, Duration::from_millis(25));

    unsafe { clear_map_env() };
}

#[test]
fn from_env_rejects_out_of_range_sector() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    unsafe {
        clear_map_env();
        std::env::set_var("MAP_HEADING_SECTOR_DEG", "400");
    }

    let err = SessionConfig::from_env().unwrap_err();
    assert_eq!(err.error_code(), "E_CONFIG");
    assert!(err.to_string().contains("heading sector"));

    unsafe { clear_map_env() };
}

#[test]
fn validate_rejects_poll_longer_than_timeout() {
    let cfg = SessionConfig {
        backend_poll: Duration::from_secs(20),
        backend_ready_timeout: Duration::from_secs(10),
        ..SessionConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_zero_grace() {
    let cfg = SessionConfig { sync_grace: Duration::ZERO, ..SessionConfig::default() };
    assert!(cfg.validate().is_err());
}
