//! Scripted walk through a session with two simulated vendors.
//!
//! Attaches a primary and a mini surface through the readiness loader, then
//! pans, measures a distance, and opens and closes ground view, logging every
//! session event.

use std::time::Duration;

use mapbridge::backend::loader::readiness;
use mapbridge::backend::sim::{SimBackend, SimController};
use mapbridge::backend::{BackendHandle, Container, PanoramaAnchor, Rect, SurfaceSlot};
use mapbridge::geo::LatLng;
use mapbridge::view::{ViewState, ZoomScale};
use mapbridge::{Command, ErrorCode, MapError, MapSession, SessionConfig, SessionEvent};

const VENDOR_LOAD_DELAY: Duration = Duration::from_millis(50);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match SessionConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config).await {
        tracing::error!(code = e.error_code(), error = %e, "demo failed");
        std::process::exit(1);
    }
}

async fn run(config: SessionConfig) -> Result<(), MapError> {
    let settle = config.ground_settle;
    let mut session = MapSession::with_system_clock(config, ViewState::new(37.5665, 126.978, 15));

    let primary = attach(
        &mut session,
        SurfaceSlot::Primary,
        "vendor-a",
        ZoomScale::Identity,
        Rect::new(0.0, 0.0, 1280.0, 800.0),
    )
    .await?;
    let _mini = attach(
        &mut session,
        SurfaceSlot::Mini,
        "vendor-b",
        ZoomScale::Inverted { pivot: 20 },
        Rect::new(960.0, 560.0, 280.0, 200.0),
    )
    .await?;
    primary.add_coverage(PanoramaAnchor {
        id: "pano-city-hall".into(),
        position: LatLng::new(37.566_4, 126.977_9),
        heading: 90.0,
    });

    primary.user_move(LatLng::new(37.567, 126.979), 16.0);
    log_events("pan", &session.pump());

    log_events("measure", &session.execute(Command::MeasureDistance));
    primary.click(LatLng::new(37.567, 126.979));
    primary.move_pointer(LatLng::new(37.568, 126.98));
    primary.click(LatLng::new(37.568, 126.981));
    primary.right_click(LatLng::new(37.568, 126.981));
    log_events("measure", &session.pump());

    log_events("ground", &session.execute(Command::OpenGroundViewAt(LatLng::new(37.566_5, 126.978))));
    log_events("ground", &session.pump());
    tokio::time::sleep(settle).await;
    log_events("ground", &session.pump());
    primary.turn_panorama(135.0);
    primary.move_panorama(LatLng::new(37.566_6, 126.978_2));
    log_events("ground", &session.pump());
    log_events("ground", &session.execute(Command::CloseGroundView));

    log_events("shutdown", &session.shutdown());
    Ok(())
}

async fn attach(
    session: &mut MapSession,
    slot: SurfaceSlot,
    name: &str,
    zoom: ZoomScale,
    rect: Rect,
) -> Result<SimController, MapError> {
    let (sim, ctl) = SimBackend::new(name, zoom);
    let (signal, gate) = readiness();
    tokio::spawn(async move {
        tokio::time::sleep(VENDOR_LOAD_DELAY).await;
        signal.mark_ready();
    });
    session
        .attach_when_ready(slot, BackendHandle::new(Box::new(sim)), Container::new(slot.to_string(), rect), gate)
        .await?;
    Ok(ctl)
}

fn log_events(step: &str, events: &[SessionEvent]) {
    for event in events {
        match event {
            SessionEvent::Error(e) => tracing::warn!(step, code = e.error_code(), error = %e, "session error"),
            other => tracing::info!(step, event = ?other, "session event"),
        }
    }
}
