//! Readiness gate between a vendor bootstrap and backend `init`.
//!
//! The bootstrap collaborator keeps the [`ReadinessSignal`] and fires it
//! once the vendor library has loaded. The session awaits the matching
//! [`ReadinessGate`] with a hard timeout before calling `init`. A backend
//! that still answers `NotReady` after the signal is polled on a fixed
//! interval until the same deadline. Nothing else in the crate retries.

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BackendHandle, Container};
use crate::error::{BackendError, MapError};
use crate::view::ViewState;

/// Bootstrap side: fire once the vendor library is usable.
#[derive(Debug)]
pub struct ReadinessSignal {
    tx: oneshot::Sender<()>,
}

impl ReadinessSignal {
    pub fn mark_ready(self) {
        if self.tx.send(()).is_err() {
            debug!("readiness gate dropped before signal");
        }
    }
}

/// Session side: resolves when the bootstrap calls [`ReadinessSignal::mark_ready`].
#[derive(Debug)]
pub struct ReadinessGate {
    rx: oneshot::Receiver<()>,
}

/// Create a linked signal/gate pair for one backend.
#[must_use]
pub fn readiness() -> (ReadinessSignal, ReadinessGate) {
    let (tx, rx) = oneshot::channel();
    (ReadinessSignal { tx }, ReadinessGate { rx })
}

/// Wait for `gate`, then initialize `handle` in `container` at `initial`.
///
/// # Errors
///
/// `MapError::BackendLoadTimeout` when the gate does not resolve within
/// `timeout`, the signal is dropped, or `init` keeps returning `NotReady`
/// until the deadline. Any other backend failure is returned as-is.
pub async fn init_when_ready(
    handle: &mut BackendHandle,
    gate: ReadinessGate,
    container: &Container,
    initial: ViewState,
    timeout: Duration,
    poll: Duration,
) -> Result<(), MapError> {
    let started = Instant::now();
    let deadline = started + timeout;
    let timed_out = |handle: &BackendHandle| MapError::BackendLoadTimeout {
        backend: handle.name().to_owned(),
        waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };

    match tokio::time::timeout_at(deadline, gate.rx).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => {
            warn!(backend = handle.name(), "readiness signal dropped");
            return Err(timed_out(handle));
        }
        Err(_) => {
            warn!(backend = handle.name(), ?timeout, "backend never signalled ready");
            return Err(timed_out(handle));
        }
    }

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match handle.init(container, initial) {
            Ok(()) => {
                info!(backend = handle.name(), attempts, container = %container.id, "backend initialized");
                return Ok(());
            }
            Err(BackendError::NotReady) if Instant::now() + poll <= deadline => {
                debug!(backend = handle.name(), attempts, "backend not ready; polling");
                tokio::time::sleep(poll).await;
            }
            Err(BackendError::NotReady) => {
                warn!(backend = handle.name(), attempts, "backend still not ready at deadline");
                return Err(timed_out(handle));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
