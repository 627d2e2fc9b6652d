use super::*;

#[test]
fn backend_error_converts_into_map_error() {
    let err: MapError = BackendError::NotReady.into();
    assert_eq!(err, MapError::Backend(BackendError::NotReady));
    assert_eq!(err.to_string(), "backend library not ready");
}

#[test]
fn error_codes_are_distinct() {
    let errors = [
        MapError::BackendLoadTimeout { backend: "sim".into(), waited_ms: 10 },
        MapError::NoCoverage { lat: 0.0, lng: 0.0, radius_m: 50.0 },
        MapError::StateReadFailure { slot: SurfaceSlot::Mini, source: BackendError::NotReady },
        MapError::InsufficientVertices { mode: MeasureMode::Area, have: 2, need: 3 },
        MapError::MissingSurface(SurfaceSlot::Primary),
        MapError::Unsupported { slot: SurfaceSlot::Primary, what: "ground view" },
        MapError::Backend(BackendError::Native("boom".into())),
        MapError::Service { service: "routing", source: ServiceError::Request("503".into()) },
        MapError::Config("bad".into()),
    ];
    let mut codes: Vec<&str> = errors.iter().map(MapError::error_code).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), errors.len());
}

#[test]
fn insufficient_vertices_is_silent() {
    let err = MapError::InsufficientVertices { mode: MeasureMode::Distance, have: 1, need: 2 };
    assert!(!err.is_user_facing());
}

#[test]
fn load_timeout_and_no_coverage_are_user_facing() {
    assert!(MapError::BackendLoadTimeout { backend: "sim".into(), waited_ms: 5 }.is_user_facing());
    assert!(MapError::NoCoverage { lat: 1.0, lng: 2.0, radius_m: 50.0 }.is_user_facing());
}

#[test]
fn no_coverage_message_names_radius() {
    let msg = MapError::NoCoverage { lat: 37.5, lng: 127.0, radius_m: 50.0 }.to_string();
    assert!(msg.contains("50m"));
    assert!(msg.contains("37.500000"));
}

#[test]
fn service_error_message_includes_service_name() {
    let err = MapError::Service { service: "boundary", source: ServiceError::Payload("no geometry".into()) };
    assert_eq!(err.to_string(), "boundary: service payload invalid: no geometry");
}

#[test]
fn error_code_defaults_to_user_facing() {
    #[derive(Debug, thiserror::Error)]
    #[error("quota exceeded")]
    struct Quota;

    impl ErrorCode for Quota {
        fn error_code(&self) -> &'static str {
            "E_QUOTA"
        }
    }

    let err: &dyn ErrorCode = &Quota;
    assert_eq!(err.error_code(), "E_QUOTA");
    assert_eq!(err.to_string(), "quota exceeded");
    assert!(err.is_user_facing());
}
