//! The pointer cursor.
//!
//! There is one cursor. It shows either a client cursor surface or the
//! default image. On every output it overlaps it is shown on the hardware
//! cursor plane when the backend has one and it has not failed; everywhere
//! else it is drawn as part of the frame, which means its old and new
//! rectangles are damaged whenever it moves or changes.

use std::collections::BTreeSet;

use crate::compositor::Compositor;
use crate::error::{CompositorError, ProtocolError, Result};
use crate::events::CompositorEvent;
use crate::geometry::{Point, Rectangle, Size};
use crate::output::{repaint, CursorPlaneUpdate, OutputId};
use crate::role::{CursorRole, Role, RoleKind};
use crate::surface::{Surface, SurfaceId};

#[derive(Debug)]
pub struct Cursor {
    /// Global logical position of the hotspot.
    position: Point,
    surface: Option<SurfaceId>,
    visible: bool,
    default_size: Size,
    disabled_outputs: BTreeSet<OutputId>,
    /// Outputs the cursor image overlaps.
    outputs: BTreeSet<OutputId>,
    /// Outputs currently showing the cursor on their hardware plane.
    hardware_outputs: BTreeSet<OutputId>,
    /// Rectangle drawn last, for damage.
    last_rect: Option<Rectangle>,
}

impl Cursor {
    pub(crate) fn new(size: u32) -> Self {
        let size = i32::try_from(size).unwrap_or(i32::MAX);
        Self {
            position: Point::default(),
            surface: None,
            visible: true,
            default_size: Size::new(size, size),
            disabled_outputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            hardware_outputs: BTreeSet::new(),
            last_rect: None,
        }
    }

    pub fn position(&self) -> Point {
        self.position
    }

    /// The client cursor surface; `None` shows the default image.
    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn default_size(&self) -> Size {
        self.default_size
    }

    pub fn outputs(&self) -> &BTreeSet<OutputId> {
        &self.outputs
    }

    pub fn is_on_hardware_plane(&self, output: OutputId) -> bool {
        self.hardware_outputs.contains(&output)
    }

    pub fn is_enabled_for(&self, output: OutputId) -> bool {
        !self.disabled_outputs.contains(&output)
    }

    /// Global rectangle of the image as last drawn.
    pub fn rect(&self) -> Option<Rectangle> {
        self.last_rect
    }

    pub(crate) fn set_image(&mut self, surface: Option<SurfaceId>, visible: bool) {
        self.surface = surface;
        self.visible = visible;
    }

    /// The output stopped displaying anything.
    pub(crate) fn left_output(&mut self, output: OutputId) {
        self.outputs.remove(&output);
        self.hardware_outputs.remove(&output);
    }

    pub(crate) fn forget_output(&mut self, output: OutputId) {
        self.left_output(output);
        self.disabled_outputs.remove(&output);
    }
}

impl Compositor {
    /// Moves the cursor hotspot to a global logical position.
    pub fn move_cursor(&mut self, position: Point) {
        self.cursor.position = position;
        self.update_cursor(false);
        if let Some(icon) = self.seat.drag().and_then(|drag| drag.icon) {
            self.refresh_tree(icon);
        }
    }

    /// Shows a client cursor surface with the given hotspot, or hides the
    /// cursor with `None`.
    pub fn set_cursor(&mut self, surface: Option<SurfaceId>, hotspot: Point) -> Result<()> {
        let Some(id) = surface else {
            self.cursor.set_image(None, false);
            self.update_cursor(true);
            return Ok(());
        };
        let existing = self.surfaces.get(id).ok_or(CompositorError::UnknownSurface(id))?.role_kind();
        match existing {
            None => self.assign_role(id, Role::Cursor(CursorRole::new(hotspot)))?,
            Some(RoleKind::Cursor) => {
                if let Some(cursor) = self.surfaces.get_mut(id).and_then(|s| s.role.as_mut()).and_then(Role::as_cursor_mut) {
                    cursor.set_hotspot(hotspot);
                }
            }
            Some(existing) => {
                let client = self.client_of(id)?;
                return Err(self.fail_client(client, ProtocolError::RoleAlreadyAssigned { surface: id, existing }));
            }
        }
        self.cursor.set_image(Some(id), true);
        self.update_cursor(true);
        self.refresh_tree(id);
        Ok(())
    }

    /// Shows the compositor's own cursor image.
    pub fn show_default_cursor(&mut self) {
        self.cursor.set_image(None, true);
        self.update_cursor(true);
    }

    pub fn set_cursor_enabled_for_output(&mut self, output: OutputId, enabled: bool) -> Result<()> {
        if !self.outputs.contains_key(&output) {
            return Err(CompositorError::UnknownOutput(output));
        }
        if enabled {
            self.cursor.disabled_outputs.remove(&output);
        } else {
            self.cursor.disabled_outputs.insert(output);
        }
        self.update_cursor(true);
        Ok(())
    }

    /// Forces the software cursor on one output. Re-enabling also forgets an
    /// earlier plane failure.
    pub fn set_hardware_cursor_disabled(&mut self, output: OutputId, disabled: bool) -> Result<()> {
        let target = self.outputs.get_mut(&output).ok_or(CompositorError::UnknownOutput(output))?;
        target.hardware_cursor_disabled = disabled;
        if !disabled {
            target.cursor_plane_failed = false;
        }
        self.update_cursor(true);
        Ok(())
    }

    /// The initialized output under the cursor, or the first initialized one.
    pub(crate) fn cursor_output(&self) -> Option<OutputId> {
        let mut initialized = self.outputs.values().filter(|o| o.is_initialized());
        let first = initialized.clone().next().map(|o| o.id());
        initialized.find(|o| o.geometry().contains(self.cursor.position)).map(|o| o.id()).or(first)
    }

    /// Where the cursor image would be drawn now.
    fn cursor_rect(&self) -> Option<Rectangle> {
        if !self.cursor.visible {
            return None;
        }
        match self.cursor.surface {
            Some(id) => {
                let surface = self.surfaces.get(id)?;
                surface.current.buffer.as_ref()?;
                let origin = self.surface_origin(id)?;
                Some(Rectangle::from_loc_and_size(origin, surface.size()))
            }
            None => Some(Rectangle::from_loc_and_size(self.cursor.position, self.cursor.default_size)),
        }
    }

    /// Keeps the cursor position on an initialized output.
    fn clamp_cursor(&mut self) {
        let geometries: Vec<Rectangle> =
            self.outputs.values().filter(|o| o.is_initialized()).map(|o| o.geometry()).collect();
        let position = self.cursor.position;
        if geometries.is_empty() || geometries.iter().any(|g| g.contains(position)) {
            return;
        }
        let nearest = geometries
            .iter()
            .min_by_key(|g| {
                let dx = (g.x - position.x).max(position.x - (g.right() - 1)).max(0) as i64;
                let dy = (g.y - position.y).max(position.y - (g.bottom() - 1)).max(0) as i64;
                dx * dx + dy * dy
            })
            .copied();
        if let Some(g) = nearest.filter(|g| !g.is_empty()) {
            self.cursor.position =
                Point::new(position.x.clamp(g.x, g.right() - 1), position.y.clamp(g.y, g.bottom() - 1));
        }
    }

    /// Brings every output up to date with the cursor: hardware planes are
    /// moved, software outputs get damage for the old and new image.
    pub(crate) fn update_cursor(&mut self, image_changed: bool) {
        self.clamp_cursor();
        let rect = self.cursor_rect();
        let old = self.cursor.last_rect;
        let moved = rect != old;
        let hardware_allowed = self.config().hardware_cursor;
        let repaint_on_move = self.config().repaint_on_cursor_move;
        let cursor_surface = self.cursor.surface.and_then(|id| self.surfaces.get(id));
        let image = cursor_surface.and_then(|s| s.current.buffer.clone());
        let hotspot = cursor_surface
            .and_then(Surface::role)
            .and_then(Role::as_cursor)
            .map(CursorRole::hotspot)
            .unwrap_or_default();

        let mut overlapped = BTreeSet::new();
        for output in self.outputs.values_mut() {
            let id = output.id();
            let geometry = output.geometry();
            let hit = rect.filter(|r| output.is_initialized() && r.intersects(&geometry));
            if hit.is_some() {
                overlapped.insert(id);
            }
            let was_hardware = self.cursor.hardware_outputs.contains(&id);
            let wants_hardware = hit.is_some()
                && hardware_allowed
                && output.cursor_plane_usable()
                && !self.cursor.disabled_outputs.contains(&id);

            if wants_hardware {
                if was_hardware && !moved && !image_changed {
                    continue;
                }
                let position = rect.map(|r| repaint::logical_to_buffer(r, output).loc()).unwrap_or_default();
                let update = CursorPlaneUpdate { position, visible: true, image: image.clone(), hotspot };
                match output.backend.set_cursor_plane(&update) {
                    Ok(()) => {
                        self.cursor.hardware_outputs.insert(id);
                        self.events.push(CompositorEvent::CursorPlaneUpdated { output: id, position, visible: true });
                        if !was_hardware {
                            if let Some(old) = old {
                                output.add_damage_rect(old);
                            }
                        }
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(output = %id, %err, "Hardware cursor failed, falling back to software");
                        output.cursor_plane_failed = true;
                    }
                }
            }

            let repaint_was_pending = output.repaint_pending;
            if was_hardware {
                let hide = CursorPlaneUpdate { position: Point::default(), visible: false, image: None, hotspot };
                if let Err(err) = output.backend.set_cursor_plane(&hide) {
                    tracing::debug!(output = %id, %err, "Could not hide hardware cursor");
                }
                self.cursor.hardware_outputs.remove(&id);
                self.events.push(CompositorEvent::CursorPlaneUpdated {
                    output: id,
                    position: Point::default(),
                    visible: false,
                });
                if let Some(hit) = hit {
                    output.add_damage_rect(hit);
                }
            } else if moved || image_changed {
                if let Some(old) = old {
                    output.add_damage_rect(old);
                }
                if let Some(hit) = hit {
                    output.add_damage_rect(hit);
                }
            }
            if !repaint_on_move && !image_changed {
                output.repaint_pending = repaint_was_pending;
            }
        }
        self.cursor.outputs = overlapped;
        self.cursor.last_rect = rect;
    }
}
