//! One paint cycle of one output.
//!
//! A cycle first reacts to a changed output geometry, applies a pending gamma
//! table and then, if the output has damage, draws the scene bottom to top:
//! background and bottom layers, windows with their sub-surfaces and popups,
//! top and overlay layers, the drag icon and finally the software cursor.
//! While the session is locked only lock surfaces and the cursor are drawn.
//!
//! Damage is kept in global logical coordinates until presentation, where it
//! is moved into the output's buffer space: translated to the output origin,
//! scaled outward, transformed by the inverse output transform, padded and
//! clipped to the mode.

use crate::compositor::Compositor;
use crate::error::{BackendError, CompositorError, Result};
use crate::geometry::{Rectangle, Size};
use crate::region::Region;
use crate::role::layer::Layer;
use crate::role::Role;
use crate::surface::SurfaceId;

use super::{Output, OutputId, PaintFrame, RenderElement, RenderElementKind, RenderTarget};

#[derive(Debug, Clone, PartialEq)]
pub enum RepaintOutcome {
    NotInitialized,
    /// Nothing changed since the last frame.
    NoDamage,
    Presented {
        target: RenderTarget,
        /// Presented region in buffer coordinates; `None` for a full present.
        damage: Option<Region>,
    },
}

/// Maps a global logical rectangle into the output's buffer space without
/// clipping.
pub fn logical_to_buffer(rect: Rectangle, output: &Output) -> Rectangle {
    rect.translate_by(-output.position())
        .scale_outward(output.fractional_scale())
        .transform(output.transform().invert(), output.transformed_size())
}

/// Maps global logical damage into padded buffer damage clipped to the mode.
pub fn damage_to_buffer(damage: &Region, output: &Output, padding: i32) -> Region {
    let mode = Rectangle::from_loc_and_size(Default::default(), output.mode().map(|m| m.size).unwrap_or_default());
    let mut buffer = Region::new();
    for rect in damage.rects() {
        let mapped = logical_to_buffer(*rect, output).pad(padding).intersection(&mode);
        if !mapped.is_empty() {
            buffer.add(mapped);
        }
    }
    buffer
}

fn framebuffer_target(output: &Output) -> RenderTarget {
    RenderTarget::Framebuffer {
        size: output.mode().map(|m| m.size).unwrap_or_default(),
        scale: output.fractional_scale(),
    }
}

fn preferred_target(output: &Output, oversampling: bool) -> RenderTarget {
    let scale = output.fractional_scale();
    if !oversampling || scale.fract() == 0.0 || output.oversampling_failed {
        return framebuffer_target(output);
    }
    let factor = output.integer_scale();
    let logical = output.logical_size();
    let size = output.transform().transform_size(Size::new(logical.width * factor, logical.height * factor));
    RenderTarget::Oversampled { size, scale: factor }
}

/// Binds a target, falling back to the framebuffer for the rest of the
/// output's life if the oversampled one cannot be allocated.
fn begin_frame(output: &mut Output, target: RenderTarget) -> Result<RenderTarget, BackendError> {
    match output.backend.begin_frame(target) {
        Ok(()) => Ok(target),
        Err(BackendError::OutOfMemory { what }) if matches!(target, RenderTarget::Oversampled { .. }) => {
            tracing::warn!(
                output = %output.id(),
                what,
                scale = output.fractional_scale(),
                "Oversampled target allocation failed, rendering at the fractional scale"
            );
            output.oversampling_failed = true;
            let fallback = framebuffer_target(output);
            output.backend.begin_frame(fallback)?;
            Ok(fallback)
        }
        Err(err) => Err(err),
    }
}

/// Draws and presents one frame. Returns the target used and the presented
/// buffer damage.
fn paint(
    output: &mut Output,
    elements: &[RenderElement],
    oversampling: bool,
    padding: i32,
) -> Result<(RenderTarget, Option<Region>), BackendError> {
    let target = begin_frame(output, preferred_target(output, oversampling))?;
    let tracks_damage = output.capabilities().damage_tracking;
    let buffer_damage = tracks_damage.then(|| damage_to_buffer(&output.damage, output, padding));
    let frame = PaintFrame {
        target,
        output_geometry: output.geometry(),
        transform: output.transform(),
        elements,
        damage: tracks_damage.then_some(&output.damage),
    };
    output.backend.render_elements(&frame)?;
    if matches!(target, RenderTarget::Oversampled { .. }) {
        output.backend.downsample(buffer_damage.as_ref())?;
    }
    output.backend.present(buffer_damage.as_ref())?;
    Ok((target, buffer_damage))
}

impl Compositor {
    /// Runs one paint cycle of an output.
    ///
    /// Damage is only cleared after a successful present, so a failed frame is
    /// retried in full on the next cycle.
    pub fn repaint_output(&mut self, id: OutputId) -> Result<RepaintOutcome> {
        let output = self.outputs.get_mut(&id).ok_or(CompositorError::UnknownOutput(id))?;
        if !output.is_initialized() {
            return Ok(RepaintOutcome::NotInitialized);
        }
        output.repaint_pending = false;
        let geometry = output.geometry();
        let previous = output.last_geometry.replace(geometry);
        if previous.is_some_and(|previous| previous != geometry) {
            self.output_geometry_changed(id);
        }

        let oversampling = self.config().oversampling;
        let padding = self.config().damage_padding;
        let elements = self.scene_for_output(id);
        let output = self.outputs.get_mut(&id).ok_or(CompositorError::UnknownOutput(id))?;

        if let Some(table) = output.pending_gamma.take() {
            if let Err(err) = output.backend.set_gamma(&table) {
                tracing::warn!(output = %id, %err, "Failed to apply gamma table");
            }
        }

        if output.damage.is_empty() {
            tracing::trace!(output = %id, "No damage, skipping frame");
            self.send_frame_callbacks(id);
            return Ok(RepaintOutcome::NoDamage);
        }

        match paint(output, &elements, oversampling, padding) {
            Ok((target, damage)) => {
                output.damage.clear();
                output.frames_presented += 1;
                tracing::trace!(
                    output = %id,
                    elements = elements.len(),
                    ?target,
                    rects = damage.as_ref().map(Region::len),
                    "Presented frame"
                );
                self.send_frame_callbacks(id);
                Ok(RepaintOutcome::Presented { target, damage })
            }
            Err(err) => {
                tracing::warn!(output = %id, %err, "Frame failed, keeping damage for the next cycle");
                Err(err.into())
            }
        }
    }

    /// Render elements for an output, bottom to top.
    pub fn scene_for_output(&self, id: OutputId) -> Vec<RenderElement> {
        let Some(output) = self.outputs.get(&id) else {
            return Vec::new();
        };
        let geometry = output.geometry();
        let mut order = Vec::new();
        if self.is_locked() {
            let locks = self
                .surfaces
                .iter()
                .filter(|s| s.role().and_then(Role::as_session_lock).is_some_and(|l| l.output() == id));
            for surface in locks {
                self.push_surface_tree(surface.id(), &mut order);
            }
        } else {
            self.push_layers(id, Layer::Background, &mut order);
            self.push_layers(id, Layer::Bottom, &mut order);
            for window in &self.windows {
                self.push_surface_tree(*window, &mut order);
            }
            self.push_layers(id, Layer::Top, &mut order);
            self.push_layers(id, Layer::Overlay, &mut order);
            if let Some(icon) = self.seat.drag().and_then(|drag| drag.icon) {
                self.push_surface_tree(icon, &mut order);
            }
        }

        let mut elements: Vec<RenderElement> =
            order.into_iter().filter_map(|surface| self.surface_element(surface, &geometry)).collect();
        if let Some(cursor) = self.software_cursor_element(id, &geometry) {
            elements.push(cursor);
        }
        elements
    }

    fn push_layers(&self, output: OutputId, layer: Layer, order: &mut Vec<SurfaceId>) {
        let ids: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|s| {
                s.role()
                    .and_then(Role::as_layer)
                    .is_some_and(|l| l.output() == output && l.layer() == layer)
            })
            .map(|s| s.id())
            .collect();
        for id in ids {
            self.push_surface_tree(id, order);
        }
    }

    /// Sub-surfaces below, the surface, sub-surfaces above, then popups.
    fn push_surface_tree(&self, id: SurfaceId, order: &mut Vec<SurfaceId>) {
        let Some(surface) = self.surfaces.get(id).filter(|s| s.is_mapped()) else {
            return;
        };
        for child in surface.children_below() {
            self.push_surface_tree(*child, order);
        }
        order.push(id);
        for child in surface.children_above() {
            self.push_surface_tree(*child, order);
        }
        for popup in self.popups_of(id) {
            self.push_surface_tree(popup, order);
        }
    }

    fn surface_element(&self, id: SurfaceId, output: &Rectangle) -> Option<RenderElement> {
        let surface = self.surfaces.get(id)?;
        let geometry = surface.global_rect.filter(|rect| rect.intersects(output))?;
        let current = surface.current();
        let buffer = current.buffer.clone()?;
        Some(RenderElement {
            kind: RenderElementKind::Surface { id, buffer, scale: current.scale, transform: current.transform },
            geometry,
            opaque: current.opaque_region.clone(),
        })
    }

    fn software_cursor_element(&self, id: OutputId, output: &Rectangle) -> Option<RenderElement> {
        if self.cursor.is_on_hardware_plane(id) {
            return None;
        }
        let geometry = self.cursor.rect().filter(|rect| rect.intersects(output))?;
        let kind = match self.cursor.surface() {
            Some(surface) => {
                let current = self.surfaces.get(surface)?.current();
                RenderElementKind::Surface {
                    id: surface,
                    buffer: current.buffer.clone()?,
                    scale: current.scale,
                    transform: current.transform,
                }
            }
            None => RenderElementKind::DefaultCursor,
        };
        Some(RenderElement { kind, geometry, opaque: Region::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusive_zone::ExclusiveZoneArbiter;
    use crate::geometry::{Point, Transform};
    use crate::output::{BackendCapabilities, GammaTable, Mode, OutputBackend, OutputConfig, OutputState};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    struct NullBackend(Mode);

    impl OutputBackend for NullBackend {
        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }

        fn modes(&self) -> Vec<Mode> {
            vec![self.0]
        }

        fn set_mode(&mut self, _mode: &Mode) -> Result<(), BackendError> {
            Ok(())
        }

        fn begin_frame(&mut self, _target: RenderTarget) -> Result<(), BackendError> {
            Ok(())
        }

        fn render_elements(&mut self, _frame: &PaintFrame<'_>) -> Result<(), BackendError> {
            Ok(())
        }

        fn downsample(&mut self, _damage: Option<&Region>) -> Result<(), BackendError> {
            Ok(())
        }

        fn present(&mut self, _damage: Option<&Region>) -> Result<(), BackendError> {
            Ok(())
        }

        fn set_gamma(&mut self, _table: &GammaTable) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn output(mode: Mode, position: Point, scale: f64, transform: Transform) -> Output {
        let config = OutputConfig::new("test").position(position.x, position.y).scale(scale).transform(transform);
        let mut output = Output::new(config, Box::new(NullBackend(mode)), ExclusiveZoneArbiter::default(), 64);
        output.mode = Some(mode);
        output.state = OutputState::Initialized;
        output
    }

    #[rstest]
    #[case::identity(Mode::new(100, 50, 60_000), Point::new(0, 0), 1.0, Transform::Normal,
        Rectangle::new(10, 10, 5, 5), Rectangle::new(10, 10, 5, 5))]
    #[case::scale_two(Mode::new(200, 100, 60_000), Point::new(0, 0), 2.0, Transform::Normal,
        Rectangle::new(10, 10, 5, 5), Rectangle::new(20, 20, 10, 10))]
    #[case::offset_output(Mode::new(100, 50, 60_000), Point::new(100, 0), 1.0, Transform::Normal,
        Rectangle::new(110, 10, 5, 5), Rectangle::new(10, 10, 5, 5))]
    #[case::fractional_rounds_outward(Mode::new(150, 75, 60_000), Point::new(0, 0), 1.5, Transform::Normal,
        Rectangle::new(1, 1, 3, 3), Rectangle::new(1, 1, 5, 5))]
    #[case::rotated(Mode::new(100, 50, 60_000), Point::new(0, 0), 1.0, Transform::Rotated90,
        Rectangle::new(0, 0, 10, 20), Rectangle::new(0, 40, 20, 10))]
    fn test_damage_to_buffer(
        #[case] mode: Mode,
        #[case] position: Point,
        #[case] scale: f64,
        #[case] transform: Transform,
        #[case] damage: Rectangle,
        #[case] expected: Rectangle,
    ) {
        let output = output(mode, position, scale, transform);
        let buffer = damage_to_buffer(&Region::from_rect(damage), &output, 0);
        assert_eq!(buffer.rects(), &[expected]);
    }

    #[test]
    fn test_padding_is_clipped_to_mode() {
        let output = output(Mode::new(100, 50, 60_000), Point::default(), 1.0, Transform::Normal);
        let buffer = damage_to_buffer(&Region::from_rect(Rectangle::new(0, 0, 5, 5)), &output, 2);
        assert_eq!(buffer.rects(), &[Rectangle::new(0, 0, 7, 7)]);
    }

    #[test]
    fn test_rotated_damage_stays_inside_mode() {
        for transform in Transform::ALL {
            let output = output(Mode::new(100, 50, 60_000), Point::default(), 1.0, transform);
            let logical = output.geometry();
            let buffer = damage_to_buffer(&Region::from_rect(logical), &output, 0);
            assert_eq!(buffer.rects(), &[Rectangle::new(0, 0, 100, 50)], "{transform:?}");
        }
    }

    #[test]
    fn test_output_damage_collapses_past_the_rect_limit() {
        let mut output = output(Mode::new(100, 50, 60_000), Point::default(), 1.0, Transform::Normal);
        let spots: Vec<Rectangle> = (0..100).map(|i| Rectangle::new(2 * (i % 50), 2 * (i / 50), 1, 1)).collect();
        for spot in &spots {
            output.add_damage_rect(*spot);
        }
        assert!(output.damage().len() <= 64, "{} rects", output.damage().len());
        for spot in &spots {
            assert!(output.damage().contains_point(spot.loc()), "{spot} lost");
        }
    }

    #[test]
    fn test_oversampling_only_for_fractional_scales() {
        let integer = output(Mode::new(200, 100, 60_000), Point::default(), 2.0, Transform::Normal);
        assert!(matches!(preferred_target(&integer, true), RenderTarget::Framebuffer { .. }));

        let fractional = output(Mode::new(150, 75, 60_000), Point::default(), 1.5, Transform::Normal);
        assert_eq!(
            preferred_target(&fractional, true),
            RenderTarget::Oversampled { size: Size::new(200, 100), scale: 2 }
        );
        assert!(matches!(preferred_target(&fractional, false), RenderTarget::Framebuffer { .. }));
    }
}
