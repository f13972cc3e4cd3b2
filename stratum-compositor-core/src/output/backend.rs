//! The seam between the repaint pipeline and whatever drives the display.
//!
//! An [`OutputBackend`] owns the framebuffer, the optional cursor plane and the
//! gamma ramp of one output. The repaint cycle calls it in a fixed order:
//! [`begin_frame`](OutputBackend::begin_frame), [`render_elements`](OutputBackend::render_elements),
//! [`downsample`](OutputBackend::downsample) when rendering went to an
//! oversampled target, then [`present`](OutputBackend::present).

use std::sync::Arc;

use stratum_buffer_manager::BufferDetails;

use crate::error::BackendError;
use crate::geometry::{Point, Rectangle, Size, Transform};
use crate::region::Region;
use crate::surface::SurfaceId;

use super::{GammaTable, Mode};

/// What the backend can do. Queried once when the output is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    pub cursor_plane: bool,
    /// Presentation accepts a damage region instead of always flipping the
    /// whole framebuffer.
    pub damage_tracking: bool,
    /// Entries per gamma channel, zero when gamma is not supported.
    pub gamma_size: usize,
}

/// Where a frame is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderTarget {
    /// The output framebuffer, drawn at the output's (possibly fractional) scale.
    Framebuffer { size: Size, scale: f64 },
    /// An intermediate buffer at an integer scale, downsampled afterwards.
    Oversampled { size: Size, scale: i32 },
}

impl RenderTarget {
    pub fn size(&self) -> Size {
        match self {
            RenderTarget::Framebuffer { size, .. } | RenderTarget::Oversampled { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RenderElementKind {
    Surface { id: SurfaceId, buffer: Arc<BufferDetails>, scale: i32, transform: Transform },
    /// The compositor's own cursor image, drawn when no cursor surface is set.
    DefaultCursor,
}

/// One textured quad of the scene, bottom to top.
#[derive(Debug, Clone)]
pub struct RenderElement {
    pub kind: RenderElementKind,
    /// Global logical coordinates.
    pub geometry: Rectangle,
    /// Surface-local opaque region, for occlusion culling.
    pub opaque: Region,
}

/// Everything the backend needs to draw one frame.
#[derive(Debug)]
pub struct PaintFrame<'a> {
    pub target: RenderTarget,
    /// Global logical rectangle covered by the output.
    pub output_geometry: Rectangle,
    pub transform: Transform,
    pub elements: &'a [RenderElement],
    /// Damage in global logical coordinates, or `None` to redraw everything.
    pub damage: Option<&'a Region>,
}

/// A hardware cursor plane update, in output buffer coordinates.
#[derive(Debug, Clone)]
pub struct CursorPlaneUpdate {
    pub position: Point,
    pub visible: bool,
    /// `None` shows the default cursor image.
    pub image: Option<Arc<BufferDetails>>,
    pub hotspot: Point,
}

pub trait OutputBackend: Send {
    fn capabilities(&self) -> BackendCapabilities;

    fn modes(&self) -> Vec<Mode>;

    /// Physical size in millimeters.
    fn physical_size(&self) -> Size {
        Size::default()
    }

    /// Programs a mode. Called from the output's paint thread when one is bound.
    fn set_mode(&mut self, mode: &Mode) -> Result<(), BackendError>;

    /// Binds the target for the next frame. Allocating an oversampled target
    /// may fail with [`BackendError::OutOfMemory`].
    fn begin_frame(&mut self, target: RenderTarget) -> Result<(), BackendError>;

    fn render_elements(&mut self, frame: &PaintFrame<'_>) -> Result<(), BackendError>;

    /// Scales the oversampled target down into the framebuffer.
    fn downsample(&mut self, damage: Option<&Region>) -> Result<(), BackendError>;

    /// Presents the framebuffer. `damage` is in buffer coordinates; `None`
    /// presents the whole buffer.
    fn present(&mut self, damage: Option<&Region>) -> Result<(), BackendError>;

    fn set_cursor_plane(&mut self, _update: &CursorPlaneUpdate) -> Result<(), BackendError> {
        Err(BackendError::NoCursorPlane)
    }

    fn set_gamma(&mut self, table: &GammaTable) -> Result<(), BackendError>;
}
