//! Outputs: the displays surfaces are painted onto.
//!
//! An output moves through
//! `Uninitialized → PendingInitialize → Initialized ⇄ ChangingMode →
//! PendingUninitialize → Uninitialized`. Only initialized outputs are painted,
//! receive damage and count for enter/leave and the cursor.

pub mod backend;
mod lifecycle;
pub mod repaint;
pub mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use crate::error::BackendError;
use crate::exclusive_zone::ExclusiveZoneArbiter;
use crate::geometry::{Point, Rectangle, Size, Transform};
use crate::region::Region;

pub use backend::{
    BackendCapabilities, CursorPlaneUpdate, OutputBackend, PaintFrame, RenderElement, RenderElementKind,
    RenderTarget,
};
pub use repaint::{damage_to_buffer, RepaintOutcome};
pub use worker::{current_paint_output, CompositorGuard, GlobalLock, OutputWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

impl OutputId {
    pub fn new_unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        OutputId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "output#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    /// Pixels.
    pub size: Size,
    pub refresh_mhz: u32,
    pub preferred: bool,
}

impl Mode {
    pub const fn new(width: i32, height: i32, refresh_mhz: u32) -> Self {
        Self { size: Size::new(width, height), refresh_mhz, preferred: false }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{:03}Hz",
            self.size,
            self.refresh_mhz / 1000,
            self.refresh_mhz % 1000
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputState {
    Uninitialized,
    PendingInitialize,
    Initialized,
    ChangingMode,
    PendingUninitialize,
}

/// Per-channel gamma ramps. All channels have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaTable {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

impl GammaTable {
    /// A linear ramp of `size` entries.
    pub fn linear(size: usize) -> Self {
        let step = if size > 1 { u16::MAX as usize / (size - 1) } else { 0 };
        let ramp: Vec<u16> = (0..size).map(|i| (i * step).min(u16::MAX as usize) as u16).collect();
        Self { red: ramp.clone(), green: ramp.clone(), blue: ramp }
    }

    /// Entries per channel, or `None` if the channels disagree.
    pub fn channel_len(&self) -> Option<usize> {
        let len = self.red.len();
        (self.green.len() == len && self.blue.len() == len).then_some(len)
    }
}

/// Properties of an output that is being added.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub name: String,
    pub position: Point,
    pub scale: f64,
    pub transform: Transform,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), position: Point::default(), scale: 1.0, transform: Transform::Normal }
    }

    pub fn position(mut self, x: i32, y: i32) -> Self {
        self.position = Point::new(x, y);
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

pub struct Output {
    id: OutputId,
    name: String,
    pub(crate) state: OutputState,
    pub(crate) mode: Option<Mode>,
    modes: Vec<Mode>,
    physical_size: Size,
    pub(crate) position: Point,
    pub(crate) scale: f64,
    pub(crate) transform: Transform,
    capabilities: BackendCapabilities,
    /// Global logical coordinates.
    pub(crate) damage: Region,
    max_damage_rects: usize,
    pub(crate) repaint_pending: bool,
    pub(crate) paint_thread: Option<ThreadId>,
    pub(crate) pending_mode: Option<Mode>,
    pub(crate) mode_generation: u64,
    pub(crate) mode_ack: u64,
    pub(crate) mode_result: Option<Result<(), BackendError>>,
    pub(crate) pending_gamma: Option<GammaTable>,
    pub(crate) zones: ExclusiveZoneArbiter,
    pub(crate) backend: Box<dyn OutputBackend>,
    /// Geometry seen by the last paint cycle.
    pub(crate) last_geometry: Option<Rectangle>,
    pub(crate) hardware_cursor_disabled: bool,
    pub(crate) cursor_plane_failed: bool,
    pub(crate) oversampling_failed: bool,
    pub(crate) frames_presented: u64,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("position", &self.position)
            .field("scale", &self.scale)
            .field("transform", &self.transform)
            .field("repaint_pending", &self.repaint_pending)
            .finish_non_exhaustive()
    }
}

impl Output {
    pub(crate) fn new(
        config: OutputConfig,
        backend: Box<dyn OutputBackend>,
        zones: ExclusiveZoneArbiter,
        max_damage_rects: usize,
    ) -> Self {
        let modes = backend.modes();
        Self {
            id: OutputId::new_unique(),
            name: config.name,
            state: OutputState::Uninitialized,
            mode: None,
            modes,
            physical_size: backend.physical_size(),
            position: config.position,
            scale: if config.scale > 0.0 { config.scale } else { 1.0 },
            transform: config.transform,
            capabilities: backend.capabilities(),
            damage: Region::new(),
            max_damage_rects: max_damage_rects.max(1),
            repaint_pending: false,
            paint_thread: None,
            pending_mode: None,
            mode_generation: 0,
            mode_ack: 0,
            mode_result: None,
            pending_gamma: None,
            zones,
            backend,
            last_geometry: None,
            hardware_cursor_disabled: false,
            cursor_plane_failed: false,
            oversampling_failed: false,
            frames_presented: 0,
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == OutputState::Initialized
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn physical_size(&self) -> Size {
        self.physical_size
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn fractional_scale(&self) -> f64 {
        self.scale
    }

    /// Scale advertised to clients: the fractional scale rounded up.
    pub fn integer_scale(&self) -> i32 {
        self.scale.ceil().max(1.0) as i32
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    pub fn damage(&self) -> &Region {
        &self.damage
    }

    pub fn is_repaint_pending(&self) -> bool {
        self.repaint_pending
    }

    pub fn paint_thread(&self) -> Option<ThreadId> {
        self.paint_thread
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn exclusive_zones(&self) -> &ExclusiveZoneArbiter {
        &self.zones
    }

    /// Mode size after the output transform, in pixels.
    pub fn transformed_size(&self) -> Size {
        self.mode.map(|m| self.transform.transform_size(m.size)).unwrap_or_default()
    }

    pub fn logical_size(&self) -> Size {
        let size = self.transformed_size();
        Size::new(
            (size.width as f64 / self.scale).round() as i32,
            (size.height as f64 / self.scale).round() as i32,
        )
    }

    /// Global logical rectangle covered by the output.
    pub fn geometry(&self) -> Rectangle {
        Rectangle::from_loc_and_size(self.position, self.logical_size())
    }

    /// The part of the output not reserved by exclusive zones.
    pub fn usable(&self) -> Rectangle {
        self.zones.zones().usable
    }

    pub fn hardware_cursor_disabled(&self) -> bool {
        self.hardware_cursor_disabled
    }

    /// Whether the hardware cursor plane may be used right now.
    pub(crate) fn cursor_plane_usable(&self) -> bool {
        self.capabilities.cursor_plane && !self.hardware_cursor_disabled && !self.cursor_plane_failed
    }

    /// Adds global damage, clipped to the output, and schedules a repaint.
    /// Past the rectangle limit the damage collapses to its bounding box.
    pub(crate) fn add_damage(&mut self, damage: &Region) {
        if !self.is_initialized() {
            return;
        }
        let mut clipped = damage.clone();
        clipped.intersect_rect(&self.geometry());
        if clipped.is_empty() {
            return;
        }
        self.damage.union(&clipped);
        self.damage.simplify(self.max_damage_rects);
        self.repaint_pending = true;
    }

    pub(crate) fn add_damage_rect(&mut self, rect: Rectangle) {
        self.add_damage(&Region::from_rect(rect));
    }

    pub(crate) fn damage_whole(&mut self) {
        let geometry = self.geometry();
        self.add_damage_rect(geometry);
    }

    /// Level-triggered: repeated requests before the next cycle coalesce.
    pub(crate) fn request_repaint(&mut self) {
        self.repaint_pending = true;
    }

    pub(crate) fn preferred_mode(&self) -> Option<Mode> {
        self.modes
            .iter()
            .find(|m| m.preferred)
            .or_else(|| self.modes.first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mode_display() {
        let mode = Mode::new(1920, 1080, 59_940);
        assert_eq!(mode.to_string(), "1920x1080@59.940Hz");
    }

    #[test]
    fn test_linear_gamma_ramp() {
        let table = GammaTable::linear(256);
        assert_eq!(table.channel_len(), Some(256));
        assert_eq!(table.red[0], 0);
        assert_eq!(table.red[255], 65535);

        let broken = GammaTable { red: vec![0; 4], green: vec![0; 4], blue: vec![0; 3] };
        assert_eq!(broken.channel_len(), None);
    }

    #[test]
    fn test_output_ids_are_unique() {
        assert_ne!(OutputId::new_unique(), OutputId::new_unique());
    }
}
