//! Adding, initializing, reconfiguring and removing outputs, and arranging the
//! layer surfaces on them.

use crate::compositor::Compositor;
use crate::error::{BackendError, CompositorError, Result};
use crate::exclusive_zone::{ExclusiveZoneArbiter, ExclusiveZoneEntry};
use crate::geometry::{Point, Transform};
use crate::role::layer::{edges_to_single_edge, layer_geometry, LayerState};
use crate::role::Role;
use crate::surface::SurfaceId;

use super::worker::current_paint_output;
use super::{CursorPlaneUpdate, GammaTable, Mode, Output, OutputBackend, OutputConfig, OutputId, OutputState};

impl Output {
    /// Programs `mode` through the backend. The output is `ChangingMode` for
    /// the duration of the call.
    pub(crate) fn apply_mode(&mut self, mode: Mode) -> Result<(), BackendError> {
        let supported = self.modes().iter().any(|m| m.size == mode.size && m.refresh_mhz == mode.refresh_mhz);
        if !supported {
            return Err(BackendError::UnsupportedMode(mode));
        }
        let previous = self.mode;
        self.state = OutputState::ChangingMode;
        let result = self.backend.set_mode(&mode);
        self.state = OutputState::Initialized;
        match result {
            Ok(()) => {
                self.mode = Some(mode);
                self.damage_whole();
                tracing::info!(output = %self.id(), from = ?previous, to = %mode, "Output mode changed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(output = %self.id(), %mode, %err, "Backend rejected mode");
                Err(err)
            }
        }
    }
}

impl Compositor {
    pub fn add_output(&mut self, config: OutputConfig, backend: Box<dyn OutputBackend>) -> OutputId {
        let zones = ExclusiveZoneArbiter::new(self.config().exclusive_zone_policy);
        let output = Output::new(config, backend, zones, self.config().max_damage_rects);
        let id = output.id();
        tracing::info!(
            output = %id,
            name = output.name(),
            modes = output.modes().len(),
            capabilities = ?output.capabilities(),
            "Output added"
        );
        self.outputs.insert(id, output);
        id
    }

    fn output_mut(&mut self, id: OutputId) -> Result<&mut Output> {
        self.outputs.get_mut(&id).ok_or(CompositorError::UnknownOutput(id))
    }

    /// Starts initialization. With a paint thread bound the thread finishes it
    /// at the start of its next cycle, otherwise it completes immediately.
    pub fn initialize_output(&mut self, id: OutputId) -> Result<()> {
        let output = self.output_mut(id)?;
        if output.state != OutputState::Uninitialized {
            return Err(CompositorError::InvalidOutputState { output: id, state: output.state, operation: "initialize" });
        }
        output.state = OutputState::PendingInitialize;
        if output.paint_thread.is_some() {
            output.request_repaint();
            return Ok(());
        }
        self.complete_output_transition(id)
    }

    pub fn uninitialize_output(&mut self, id: OutputId) -> Result<()> {
        let output = self.output_mut(id)?;
        if output.state != OutputState::Initialized {
            return Err(CompositorError::InvalidOutputState {
                output: id,
                state: output.state,
                operation: "uninitialize",
            });
        }
        output.state = OutputState::PendingUninitialize;
        if output.paint_thread.is_some() {
            output.request_repaint();
            return Ok(());
        }
        self.complete_output_transition(id)
    }

    /// Finishes a pending initialize or uninitialize.
    pub(crate) fn complete_output_transition(&mut self, id: OutputId) -> Result<()> {
        let cursor_on_plane = self.cursor.is_on_hardware_plane(id);
        let output = self.output_mut(id)?;
        match output.state {
            OutputState::PendingInitialize => {
                let Some(mode) = output.mode.or_else(|| output.preferred_mode()) else {
                    output.state = OutputState::Uninitialized;
                    return Err(BackendError::Device(format!("{} reports no modes", output.name())).into());
                };
                if let Err(err) = output.backend.set_mode(&mode) {
                    output.state = OutputState::Uninitialized;
                    tracing::warn!(output = %id, %mode, %err, "Output initialization failed");
                    return Err(err.into());
                }
                output.mode = Some(mode);
                output.state = OutputState::Initialized;
                output.last_geometry = Some(output.geometry());
                output.damage_whole();
                tracing::info!(
                    output = %id,
                    name = output.name(),
                    %mode,
                    scale = output.fractional_scale(),
                    geometry = %output.geometry(),
                    "Output initialized"
                );
            }
            OutputState::PendingUninitialize => {
                output.state = OutputState::Uninitialized;
                output.damage.clear();
                output.repaint_pending = false;
                output.last_geometry = None;
                if cursor_on_plane {
                    let hide = CursorPlaneUpdate { position: Point::default(), visible: false, image: None, hotspot: Point::default() };
                    if let Err(err) = output.backend.set_cursor_plane(&hide) {
                        tracing::debug!(output = %id, %err, "Could not hide hardware cursor");
                    }
                }
                self.cursor.left_output(id);
                tracing::info!(output = %id, "Output uninitialized");
            }
            _ => return Ok(()),
        }
        self.output_membership_changed(id);
        Ok(())
    }

    /// Surfaces bound to the output may have been mapped or unmapped and every
    /// surface may have entered or left it.
    fn output_membership_changed(&mut self, id: OutputId) {
        let bound: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|s| s.role().and_then(|r| r.behavior().exclusive_output()) == Some(id))
            .map(|s| s.id())
            .collect();
        for surface in bound {
            self.update_mapped(surface);
        }
        self.arrange_output(id);
        self.refresh_all_surfaces();
        self.update_cursor(true);
    }

    /// Removes an output. Layer surfaces on it are closed. A paint thread must
    /// be stopped first.
    pub fn remove_output(&mut self, id: OutputId) -> Result<()> {
        let output = self.output_mut(id)?;
        if output.paint_thread.is_some() {
            return Err(CompositorError::InvalidOutputState {
                output: id,
                state: output.state,
                operation: "remove while a paint thread is bound",
            });
        }
        if output.is_initialized() {
            output.state = OutputState::PendingUninitialize;
            self.complete_output_transition(id)?;
        }
        let layers: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|s| s.role().and_then(Role::as_layer).is_some_and(|l| l.output() == id))
            .map(|s| s.id())
            .collect();
        for layer in layers {
            self.with_role(layer, |role, ctx| {
                if let Some(layer) = role.as_layer_mut() {
                    layer.close(ctx);
                }
            })?;
            self.update_mapped(layer);
        }
        self.outputs.remove(&id);
        self.cursor.forget_output(id);
        self.update_cursor(true);
        tracing::info!(output = %id, "Output removed");
        Ok(())
    }

    /// Changes the mode directly. Outputs with a bound paint thread change
    /// modes through [`GlobalLock::change_mode`](super::GlobalLock::change_mode).
    pub fn change_mode(&mut self, id: OutputId, mode: Mode) -> Result<()> {
        if current_paint_output().is_some() {
            return Err(CompositorError::ModeChangeFromPaintThread { output: id });
        }
        let output = self.output_mut(id)?;
        if output.state != OutputState::Initialized || output.paint_thread.is_some() {
            return Err(CompositorError::InvalidOutputState {
                output: id,
                state: output.state,
                operation: "direct mode change",
            });
        }
        output.apply_mode(mode)?;
        Ok(())
    }

    pub fn set_output_position(&mut self, id: OutputId, x: i32, y: i32) -> Result<()> {
        let output = self.output_mut(id)?;
        output.position = Point::new(x, y);
        output.damage_whole();
        output.request_repaint();
        Ok(())
    }

    /// Non-positive or non-finite scales are ignored.
    pub fn set_output_scale(&mut self, id: OutputId, scale: f64) -> Result<()> {
        let output = self.output_mut(id)?;
        if !(scale.is_finite() && scale > 0.0) {
            tracing::warn!(output = %id, scale, "Ignoring invalid output scale");
            return Ok(());
        }
        output.scale = scale;
        output.oversampling_failed = false;
        output.damage_whole();
        output.request_repaint();
        Ok(())
    }

    pub fn set_output_transform(&mut self, id: OutputId, transform: Transform) -> Result<()> {
        let output = self.output_mut(id)?;
        output.transform = transform;
        output.damage_whole();
        output.request_repaint();
        Ok(())
    }

    /// Damages the whole output.
    pub fn damage_output(&mut self, id: OutputId) -> Result<()> {
        self.output_mut(id)?.damage_whole();
        Ok(())
    }

    /// Queues a gamma table. It is applied by the next paint cycle.
    pub fn set_gamma(&mut self, id: OutputId, table: GammaTable) -> Result<()> {
        let output = self.output_mut(id)?;
        let expected = output.capabilities().gamma_size;
        let got = table.channel_len();
        if expected == 0 || got != Some(expected) {
            let got = got.unwrap_or_else(|| table.red.len().max(table.green.len()).max(table.blue.len()));
            return Err(BackendError::InvalidGammaSize { expected, got }.into());
        }
        output.pending_gamma = Some(table);
        output.request_repaint();
        Ok(())
    }

    /// Reactions to a new output position, scale, transform or mode, run by
    /// the paint cycle that first sees the new geometry.
    pub(crate) fn output_geometry_changed(&mut self, id: OutputId) {
        if let Some(output) = self.outputs.get_mut(&id) {
            tracing::info!(output = %id, geometry = %output.geometry(), "Output geometry changed");
            output.damage_whole();
        }
        self.arrange_output(id);
        self.refresh_all_surfaces();
        self.update_cursor(true);
    }

    /// Recomputes exclusive zones and places every layer and lock surface of
    /// the output.
    pub(crate) fn arrange_output(&mut self, id: OutputId) {
        let Some(output) = self.outputs.get(&id) else {
            return;
        };
        let output_rect = output.geometry();
        let initialized = output.is_initialized();
        let layers: Vec<(SurfaceId, LayerState, bool, bool)> = self
            .surfaces
            .iter()
            .filter_map(|s| {
                let layer = s.role()?.as_layer()?;
                (layer.output() == id && !layer.is_closed())
                    .then(|| (s.id(), layer.state().clone(), s.is_mapped(), layer.is_initialized()))
            })
            .collect();

        let Some(output) = self.outputs.get_mut(&id) else {
            return;
        };
        let stale: Vec<SurfaceId> = output
            .zones
            .entries()
            .iter()
            .map(|e| e.surface)
            .filter(|surface| !layers.iter().any(|(id, _, mapped, _)| id == surface && *mapped))
            .collect();
        for surface in stale {
            output.zones.remove(surface);
        }
        for (surface, state, mapped, _) in &layers {
            if !*mapped {
                continue;
            }
            let edge = edges_to_single_edge(state.anchor, state.exclusive_edge);
            let entry = ExclusiveZoneEntry {
                surface: *surface,
                layer: state.layer,
                edge,
                size: state.exclusive_zone,
                margin: edge.map_or(0, |edge| state.margin.on(edge)),
            };
            output.zones.update(entry);
        }
        output.zones.recompute(output_rect);
        let zones = output.zones.zones().clone();
        let logical_size = output.logical_size();

        for (surface, state, _, layer_initialized) in layers {
            if !layer_initialized {
                continue;
            }
            let placed = layer_geometry(&state, output_rect, zones.available_for(surface));
            let local = placed.translate(-output_rect.x, -output_rect.y);
            let arranged = self.with_role(surface, |role, ctx| {
                if let Some(layer) = role.as_layer_mut() {
                    layer.apply_arrangement(local, ctx);
                }
            });
            if let Err(err) = arranged {
                tracing::warn!(output = %id, %surface, %err, "Could not place layer surface");
            }
            self.refresh_tree(surface);
        }

        if initialized {
            let locks: Vec<SurfaceId> = self
                .surfaces
                .iter()
                .filter(|s| s.role().and_then(Role::as_session_lock).is_some_and(|l| l.output() == id))
                .map(|s| s.id())
                .collect();
            for lock in locks {
                let configured = self.with_role(lock, |role, ctx| {
                    if let Some(lock) = role.as_session_lock_mut() {
                        lock.configure(logical_size, ctx);
                    }
                });
                if let Err(err) = configured {
                    tracing::warn!(output = %id, surface = %lock, %err, "Could not configure lock surface");
                }
                self.refresh_tree(lock);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{BackendCapabilities, PaintFrame, RenderTarget};
    use crate::region::Region;
    use pretty_assertions::assert_eq;
    use stratum_core::CompositorConfig;

    struct FixedBackend {
        gamma_size: usize,
        fail_mode: bool,
    }

    impl OutputBackend for FixedBackend {
        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities { cursor_plane: false, damage_tracking: true, gamma_size: self.gamma_size }
        }

        fn modes(&self) -> Vec<Mode> {
            vec![Mode::new(800, 600, 60_000), Mode { preferred: true, ..Mode::new(1024, 768, 60_000) }]
        }

        fn set_mode(&mut self, _mode: &Mode) -> Result<(), BackendError> {
            if self.fail_mode {
                return Err(BackendError::Device("link training failed".into()));
            }
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

    fn setup(gamma_size: usize, fail_mode: bool) -> (Compositor, OutputId) {
        let mut compositor = Compositor::new(CompositorConfig::default());
        let id = compositor.add_output(OutputConfig::new("DP-1"), Box::new(FixedBackend { gamma_size, fail_mode }));
        (compositor, id)
    }

    #[test]
    fn test_initialize_uses_preferred_mode() {
        let (mut c, id) = setup(0, false);
        assert_eq!(c.output(id).unwrap().state(), OutputState::Uninitialized);
        c.initialize_output(id).unwrap();
        let output = c.output(id).unwrap();
        assert_eq!(output.state(), OutputState::Initialized);
        assert_eq!(output.mode().map(|m| m.size.width), Some(1024));
        assert!(output.is_repaint_pending());
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let (mut c, id) = setup(0, false);
        c.initialize_output(id).unwrap();
        assert!(matches!(c.initialize_output(id), Err(CompositorError::InvalidOutputState { .. })));
    }

    #[test]
    fn test_failed_initialization_returns_to_uninitialized() {
        let (mut c, id) = setup(0, true);
        assert!(matches!(c.initialize_output(id), Err(CompositorError::Backend(BackendError::Device(_)))));
        assert_eq!(c.output(id).unwrap().state(), OutputState::Uninitialized);
    }

    #[test]
    fn test_unsupported_mode_is_rejected() {
        let (mut c, id) = setup(0, false);
        c.initialize_output(id).unwrap();
        let err = c.change_mode(id, Mode::new(640, 480, 60_000)).unwrap_err();
        assert!(matches!(err, CompositorError::Backend(BackendError::UnsupportedMode(_))));

        c.change_mode(id, Mode::new(800, 600, 60_000)).unwrap();
        assert_eq!(c.output(id).unwrap().logical_size().width, 800);
    }

    #[test]
    fn test_gamma_size_is_validated() {
        let (mut c, id) = setup(256, false);
        let err = c.set_gamma(id, GammaTable::linear(128)).unwrap_err();
        assert!(matches!(
            err,
            CompositorError::Backend(BackendError::InvalidGammaSize { expected: 256, got: 128 })
        ));
        c.set_gamma(id, GammaTable::linear(256)).unwrap();

        let (mut c, id) = setup(0, false);
        assert!(c.set_gamma(id, GammaTable::linear(256)).is_err());
    }

    #[test]
    fn test_invalid_scale_is_ignored() {
        let (mut c, id) = setup(0, false);
        c.set_output_scale(id, 0.0).unwrap();
        c.set_output_scale(id, f64::NAN).unwrap();
        assert_eq!(c.output(id).unwrap().fractional_scale(), 1.0);
    }

    #[test]
    fn test_remove_unknown_output() {
        let (mut c, id) = setup(0, false);
        c.remove_output(id).unwrap();
        assert!(matches!(c.remove_output(id), Err(CompositorError::UnknownOutput(_))));
    }
}
