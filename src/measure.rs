//! Click-driven distance and area measurement on the primary surface.
//!
//! Each mode runs `Idle → Drawing → Idle`: the first click opens a drawing,
//! further clicks append vertices, pointer moves redraw a floating preview,
//! and a secondary click finalizes. A finalized result keeps its shape,
//! result label and per-vertex labels until the user deletes it or the
//! mode is torn down.
//!
//! Every overlay is owned by id, either by the in-progress drawing or by
//! its [`FinalizedMeasurement`]. Label controls resolve by looking the
//! label id up in the finalized list.

#[cfg(test)]
#[path = "measure_test.rs"]
mod measure_test;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    BackendHandle, EventKind, LabelControl, LabelSpec, ListenerId, OverlayId, ShapeKind, ShapeSpec, ShapeStyle,
};
use crate::error::MapError;
use crate::geo::{LatLng, format_area, format_distance, geodesic_distance, path_length, polygon_area};

/// Event kinds a measurement mode listens to on the primary surface.
const LISTENED: [EventKind; 4] =
    [EventKind::Click, EventKind::SecondaryClick, EventKind::PointerMove, EventKind::ControlClicked];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureMode {
    Distance,
    Area,
}

impl MeasureMode {
    /// Vertices needed to finalize.
    #[must_use]
    pub fn min_vertices(self) -> usize {
        match self {
            Self::Distance => 2,
            Self::Area => 3,
        }
    }

    fn shape_kind(self) -> ShapeKind {
        match self {
            Self::Distance => ShapeKind::Polyline,
            Self::Area => ShapeKind::Polygon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurePhase {
    Idle,
    Drawing,
}

/// What a label control did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    LabelDismissed(Uuid),
    Deleted(Uuid),
}

/// A completed measurement and the overlays it owns.
#[derive(Debug, Clone)]
pub struct FinalizedMeasurement {
    pub id: Uuid,
    pub mode: MeasureMode,
    pub vertices: Vec<LatLng>,
    /// Meters for distance, square meters for area.
    pub value: f64,
    pub text: String,
    shape: Option<OverlayId>,
    result_label: Option<OverlayId>,
    vertex_labels: Vec<OverlayId>,
}

impl FinalizedMeasurement {
    #[must_use]
    pub fn has_label(&self) -> bool {
        self.result_label.is_some()
    }

    fn overlays(&self) -> impl Iterator<Item = OverlayId> + '_ {
        self.shape.into_iter().chain(self.result_label).chain(self.vertex_labels.iter().copied())
    }
}

#[derive(Debug, Default)]
struct Drawing {
    vertices: Vec<LatLng>,
    shape: Option<OverlayId>,
    vertex_labels: Vec<OverlayId>,
    preview_line: Option<OverlayId>,
    preview_face: Option<OverlayId>,
    preview_label: Option<OverlayId>,
}

impl Drawing {
    fn take_preview(&mut self) -> impl Iterator<Item = OverlayId> + use<> {
        [self.preview_line.take(), self.preview_face.take(), self.preview_label.take()].into_iter().flatten()
    }
}

#[derive(Debug, Default)]
pub struct MeasurementEngine {
    mode: Option<MeasureMode>,
    listeners: Vec<ListenerId>,
    drawing: Option<Drawing>,
    finalized: Vec<FinalizedMeasurement>,
    suppress_next_click: bool,
}

impl MeasurementEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mode(&self) -> Option<MeasureMode> {
        self.mode
    }

    #[must_use]
    pub fn phase(&self) -> MeasurePhase {
        if self.drawing.is_some() { MeasurePhase::Drawing } else { MeasurePhase::Idle }
    }

    #[must_use]
    pub fn vertices(&self) -> &[LatLng] {
        self.drawing.as_ref().map_or(&[], |d| d.vertices.as_slice())
    }

    #[must_use]
    pub fn finalized(&self) -> &[FinalizedMeasurement] {
        &self.finalized
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Whether the next map click will be swallowed.
    #[must_use]
    pub fn is_suppressing(&self) -> bool {
        self.suppress_next_click
    }

    /// Consume the one-shot flag set by a label-control press.
    ///
    /// Returns true when the pending map click belongs to that press and must
    /// not reach any other click consumer.
    pub fn take_suppression(&mut self) -> bool {
        std::mem::take(&mut self.suppress_next_click)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Switch to `mode`. Switching from another mode tears that one down first.
    ///
    /// # Errors
    ///
    /// Backend failure subscribing listeners; nothing stays subscribed.
    pub fn activate(&mut self, mode: MeasureMode, primary: &mut BackendHandle) -> Result<(), MapError> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        self.deactivate(primary);

        for kind in LISTENED {
            match primary.backend_mut().subscribe(kind) {
                Ok(id) => self.listeners.push(id),
                Err(e) => {
                    for id in self.listeners.drain(..) {
                        primary.discard_listener(id);
                    }
                    return Err(e.into());
                }
            }
        }
        self.mode = Some(mode);
        info!(?mode, "measurement mode on");
        Ok(())
    }

    /// Turn measurement off: drop every overlay and listener.
    pub fn deactivate(&mut self, primary: &mut BackendHandle) {
        self.clear(primary);
        for id in self.listeners.drain(..) {
            primary.discard_listener(id);
        }
        if let Some(mode) = self.mode.take() {
            info!(?mode, "measurement mode off");
        }
    }

    /// Remove the drawing and every finalized result; the mode stays active.
    pub fn clear(&mut self, primary: &mut BackendHandle) {
        if let Some(drawing) = self.drawing.take() {
            discard_drawing(drawing, primary);
        }
        for done in self.finalized.drain(..) {
            for id in done.overlays() {
                primary.discard_overlay(id);
            }
        }
        self.suppress_next_click = false;
    }

    // =========================================================================
    // GESTURES
    // =========================================================================

    /// Primary click: append a vertex, unless the click belongs to a label control.
    pub fn on_click(&mut self, at: LatLng, primary: &mut BackendHandle) {
        let Some(mode) = self.mode else {
            return;
        };
        if self.take_suppression() {
            debug!("click consumed by label control");
            return;
        }

        let drawing = self.drawing.get_or_insert_with(Drawing::default);
        drawing.vertices.push(at);
        for id in drawing.take_preview() {
            primary.discard_overlay(id);
        }

        if drawing.vertices.len() >= 2 {
            match drawing.shape {
                Some(id) => {
                    if let Err(e) = primary.backend_mut().update_shape(id, &drawing.vertices) {
                        warn!(error = %e, "measurement shape update failed");
                    }
                }
                None => {
                    drawing.shape = add_shape(primary, mode.shape_kind(), drawing.vertices.clone(), committed_style(mode));
                }
            }
        }

        if mode == MeasureMode::Distance && drawing.vertices.len() >= 2 {
            let text = format_distance(path_length(&drawing.vertices));
            if let Some(id) = add_label(primary, at, text, Vec::new()) {
                drawing.vertex_labels.push(id);
            }
        }
        debug!(?mode, vertices = drawing.vertices.len(), "vertex added");
    }

    /// Pointer move: redraw the floating preview from the last vertex to `at`.
    pub fn on_pointer_move(&mut self, at: LatLng, primary: &mut BackendHandle) {
        let (Some(mode), Some(drawing)) = (self.mode, self.drawing.as_mut()) else {
            return;
        };
        let Some(&last) = drawing.vertices.last() else {
            return;
        };

        upsert_shape(primary, &mut drawing.preview_line, ShapeKind::Polyline, vec![last, at], preview_style(false));

        let text = if mode == MeasureMode::Area && drawing.vertices.len() >= 2 {
            let mut face = drawing.vertices.clone();
            face.push(at);
            let text = format_area(area_on(primary, &face));
            upsert_shape(primary, &mut drawing.preview_face, ShapeKind::Polygon, face, preview_style(true));
            text
        } else {
            let length = match mode {
                MeasureMode::Distance => path_length(&drawing.vertices) + geodesic_distance(last, at),
                MeasureMode::Area => geodesic_distance(last, at),
            };
            format_distance(length)
        };

        match drawing.preview_label {
            Some(id) => {
                if let Err(e) = primary.backend_mut().update_label(id, at, &text) {
                    warn!(error = %e, "preview label update failed");
                }
            }
            None => drawing.preview_label = add_label(primary, at, text, Vec::new()),
        }
    }

    /// Secondary click: finalize the drawing.
    ///
    /// # Errors
    ///
    /// `InsufficientVertices` below the mode's minimum; the drawing is
    /// discarded and the mode is idle again.
    pub fn on_secondary_click(&mut self, primary: &mut BackendHandle) -> Result<Option<FinalizedMeasurement>, MapError> {
        let Some(mode) = self.mode else {
            return Ok(None);
        };
        let mut drawing = self.drawing.take().unwrap_or_default();
        let have = drawing.vertices.len();
        let need = mode.min_vertices();
        if have < need {
            discard_drawing(drawing, primary);
            debug!(?mode, have, need, "measurement discarded");
            return Err(MapError::InsufficientVertices { mode, have, need });
        }

        for id in drawing.take_preview() {
            primary.discard_overlay(id);
        }
        let (value, text, anchor) = match mode {
            MeasureMode::Distance => {
                let value = path_length(&drawing.vertices);
                (value, format_distance(value), drawing.vertices.last().copied().unwrap_or_default())
            }
            MeasureMode::Area => {
                let value = area_on(primary, &drawing.vertices);
                (value, format_area(value), centroid(&drawing.vertices))
            }
        };
        let result_label =
            add_label(primary, anchor, text.clone(), vec![LabelControl::DismissLabel, LabelControl::Delete]);

        let done = FinalizedMeasurement {
            id: Uuid::new_v4(),
            mode,
            vertices: drawing.vertices,
            value,
            text,
            shape: drawing.shape,
            result_label,
            vertex_labels: drawing.vertex_labels,
        };
        info!(id = %done.id, ?mode, value = done.value, "measurement finalized");
        self.finalized.push(done.clone());
        Ok(Some(done))
    }

    /// A label control was pressed. Returns `None` when the label is not ours.
    pub fn on_control_clicked(
        &mut self,
        overlay: OverlayId,
        control: LabelControl,
        primary: &mut BackendHandle,
    ) -> Option<ControlOutcome> {
        let index = self.finalized.iter().position(|f| f.result_label == Some(overlay))?;
        self.suppress_next_click = true;

        match control {
            LabelControl::DismissLabel => {
                let done = &mut self.finalized[index];
                if let Some(id) = done.result_label.take() {
                    primary.discard_overlay(id);
                }
                Some(ControlOutcome::LabelDismissed(done.id))
            }
            LabelControl::Delete => {
                let done = self.finalized.remove(index);
                for id in done.overlays() {
                    primary.discard_overlay(id);
                }
                info!(id = %done.id, "measurement deleted");
                Some(ControlOutcome::Deleted(done.id))
            }
        }
    }
}

fn discard_drawing(mut drawing: Drawing, primary: &mut BackendHandle) {
    let preview: Vec<OverlayId> = drawing.take_preview().collect();
    for id in drawing.shape.into_iter().chain(drawing.vertex_labels).chain(preview) {
        primary.discard_overlay(id);
    }
}

/// The backend's native area routine, else the planar approximation.
fn area_on(primary: &BackendHandle, vertices: &[LatLng]) -> f64 {
    primary.backend().native_area(vertices).unwrap_or_else(|| polygon_area(vertices))
}

fn centroid(vertices: &[LatLng]) -> LatLng {
    if vertices.is_empty() {
        return LatLng::default();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = vertices.len() as f64;
    LatLng::new(vertices.iter().map(|p| p.lat).sum::<f64>() / n, vertices.iter().map(|p| p.lng).sum::<f64>() / n)
}

fn add_shape(primary: &mut BackendHandle, kind: ShapeKind, path: Vec<LatLng>, style: ShapeStyle) -> Option<OverlayId> {
    match primary.backend_mut().add_shape(ShapeSpec { kind, path, style }) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, ?kind, "measurement shape not created");
            None
        }
    }
}

fn upsert_shape(
    primary: &mut BackendHandle,
    slot: &mut Option<OverlayId>,
    kind: ShapeKind,
    path: Vec<LatLng>,
    style: ShapeStyle,
) {
    match *slot {
        Some(id) => {
            if let Err(e) = primary.backend_mut().update_shape(id, &path) {
                warn!(error = %e, "preview update failed");
            }
        }
        None => *slot = add_shape(primary, kind, path, style),
    }
}

fn add_label(primary: &mut BackendHandle, position: LatLng, text: String, controls: Vec<LabelControl>) -> Option<OverlayId> {
    match primary.backend_mut().add_label(LabelSpec { position, text, controls }) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(error = %e, "measurement label not created");
            None
        }
    }
}

fn committed_style(mode: MeasureMode) -> ShapeStyle {
    let fill = mode == MeasureMode::Area;
    ShapeStyle {
        stroke_width: 3.0,
        stroke_color: "#db4040".into(),
        stroke_opacity: 0.9,
        fill_color: fill.then(|| "#db4040".into()),
        fill_opacity: if fill { 0.2 } else { 0.0 },
        dashed: false,
    }
}

fn preview_style(face: bool) -> ShapeStyle {
    ShapeStyle {
        stroke_width: 2.0,
        stroke_color: "#db4040".into(),
        stroke_opacity: 0.6,
        fill_color: face.then(|| "#db4040".into()),
        fill_opacity: if face { 0.1 } else { 0.0 },
        dashed: true,
    }
}
