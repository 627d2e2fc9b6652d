//! Backend handles and the per-session surface table.
//!
//! A [`BackendHandle`] pairs a backend with its zoom convention so the rest
//! of the crate only ever sees neutral [`ViewState`]s. [`SurfaceSet`] owns
//! one handle per [`SurfaceSlot`].

#[cfg(test)]
#[path = "handle_test.rs"]
mod handle_test;

use std::collections::BTreeMap;

use tracing::warn;

use super::{Capabilities, Container, ListenerId, MapBackend, OverlayId, SurfaceSlot};
use crate::error::{BackendError, MapError};
use crate::geo::LatLng;
use crate::view::{NativeView, ViewState, ZoomScale};

/// Exclusive owner of one live backend.
pub struct BackendHandle {
    backend: Box<dyn MapBackend>,
    zoom: ZoomScale,
    initialized: bool,
}

impl BackendHandle {
    #[must_use]
    pub fn new(backend: Box<dyn MapBackend>) -> Self {
        let zoom = backend.zoom_scale();
        Self { backend, zoom, initialized: false }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    #[must_use]
    pub fn zoom_scale(&self) -> ZoomScale {
        self.zoom
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Attach the backend to `container` showing `initial`.
    ///
    /// # Errors
    ///
    /// `BackendError::NotReady` while the vendor library is still loading.
    pub fn init(&mut self, container: &Container, initial: ViewState) -> Result<(), BackendError> {
        let native = self.to_native(initial);
        self.backend.init(container, native)?;
        self.initialized = true;
        Ok(())
    }

    /// Current view on the neutral scale.
    ///
    /// # Errors
    ///
    /// Whatever the backend reports; callers treat it as "not ready yet".
    pub fn get_state(&self) -> Result<ViewState, BackendError> {
        let native = self.backend.view()?;
        Ok(ViewState::new(native.center.lat, native.center.lng, self.zoom.to_neutral(native.zoom)))
    }

    /// Push a neutral view into the backend.
    ///
    /// # Errors
    ///
    /// Backend failure.
    pub fn set_state(&mut self, state: ViewState) -> Result<(), BackendError> {
        let native = self.to_native(state);
        self.backend.set_view(native)
    }

    /// # Errors
    ///
    /// Backend failure.
    pub fn set_zoom(&mut self, neutral: i32) -> Result<(), BackendError> {
        self.backend.set_zoom(self.zoom.to_native(neutral))
    }

    /// # Errors
    ///
    /// Backend failure.
    pub fn set_center(&mut self, center: LatLng) -> Result<(), BackendError> {
        self.backend.set_center(center)
    }

    #[must_use]
    pub fn backend(&self) -> &dyn MapBackend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn MapBackend {
        self.backend.as_mut()
    }

    /// Remove an overlay, logging instead of failing.
    pub fn discard_overlay(&mut self, id: OverlayId) {
        if let Err(e) = self.backend.remove_overlay(id) {
            warn!(backend = self.backend.name(), %id, error = %e, "overlay removal failed");
        }
    }

    /// Remove a listener, logging instead of failing.
    pub fn discard_listener(&mut self, id: ListenerId) {
        if let Err(e) = self.backend.unsubscribe(id) {
            warn!(backend = self.backend.name(), %id, error = %e, "unsubscribe failed");
        }
    }

    /// Release everything the backend created.
    pub fn cleanup(&mut self) {
        self.backend.cleanup();
        self.initialized = false;
    }

    fn to_native(&self, state: ViewState) -> NativeView {
        NativeView { center: state.center(), zoom: self.zoom.to_native(state.zoom) }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("backend", &self.backend.name())
            .field("zoom", &self.zoom)
            .field("initialized", &self.initialized)
            .finish()
    }
}

/// The surfaces of one session, keyed by slot.
#[derive(Debug, Default)]
pub struct SurfaceSet {
    slots: BTreeMap<SurfaceSlot, BackendHandle>,
}

impl SurfaceSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` in `slot`, returning the previous occupant.
    pub fn insert(&mut self, slot: SurfaceSlot, handle: BackendHandle) -> Option<BackendHandle> {
        self.slots.insert(slot, handle)
    }

    pub fn remove(&mut self, slot: SurfaceSlot) -> Option<BackendHandle> {
        self.slots.remove(&slot)
    }

    #[must_use]
    pub fn get(&self, slot: SurfaceSlot) -> Option<&BackendHandle> {
        self.slots.get(&slot)
    }

    pub fn get_mut(&mut self, slot: SurfaceSlot) -> Option<&mut BackendHandle> {
        self.slots.get_mut(&slot)
    }

    /// Like [`Self::get_mut`] but reports a missing slot as an error.
    ///
    /// # Errors
    ///
    /// `MapError::MissingSurface` when nothing is attached to `slot`.
    pub fn require_mut(&mut self, slot: SurfaceSlot) -> Result<&mut BackendHandle, MapError> {
        self.slots.get_mut(&slot).ok_or(MapError::MissingSurface(slot))
    }

    #[must_use]
    pub fn contains(&self, slot: SurfaceSlot) -> bool {
        self.slots.contains_key(&slot)
    }

    /// Attached slots in stable order (primary, mini, mirrors).
    #[must_use]
    pub fn slots(&self) -> Vec<SurfaceSlot> {
        self.slots.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
