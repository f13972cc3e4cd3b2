#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use stratum_buffer_manager::{BufferFormat, BufferId, BufferType, ClientId};
use stratum_compositor_core::error::BackendError;
use stratum_compositor_core::output::{
    BackendCapabilities, CursorPlaneUpdate, GammaTable, Mode, OutputBackend, OutputConfig, OutputId, PaintFrame,
    RenderTarget,
};
use stratum_compositor_core::role::layer::Layer;
use stratum_compositor_core::{Compositor, CompositorEvent, Region, Serial, SurfaceId};
use stratum_core::CompositorConfig;

/// Everything a [`RecordingBackend`] was asked to do.
#[derive(Debug, Default)]
pub struct BackendLog {
    pub modes_set: Vec<Mode>,
    pub targets: Vec<RenderTarget>,
    pub element_counts: Vec<usize>,
    pub downsampled: usize,
    pub presented: Vec<Option<Region>>,
    pub cursor_updates: Vec<CursorPlaneUpdate>,
    pub gamma: Vec<GammaTable>,
}

pub struct RecordingBackend {
    capabilities: BackendCapabilities,
    modes: Vec<Mode>,
    /// Refuse oversampled targets with an out-of-memory error.
    pub fail_oversampling: bool,
    log: Arc<Mutex<BackendLog>>,
}

impl RecordingBackend {
    pub fn new(capabilities: BackendCapabilities, mode: Mode) -> (Self, Arc<Mutex<BackendLog>>) {
        let log = Arc::new(Mutex::new(BackendLog::default()));
        let preferred = Mode { preferred: true, ..mode };
        let backend = Self { capabilities, modes: vec![preferred], fail_oversampling: false, log: Arc::clone(&log) };
        (backend, log)
    }

    pub fn with_modes(mut self, modes: Vec<Mode>) -> Self {
        self.modes.extend(modes);
        self
    }
}

impl OutputBackend for RecordingBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn modes(&self) -> Vec<Mode> {
        self.modes.clone()
    }

    fn set_mode(&mut self, mode: &Mode) -> Result<(), BackendError> {
        self.log.lock().modes_set.push(*mode);
        Ok(())
    }

    fn begin_frame(&mut self, target: RenderTarget) -> Result<(), BackendError> {
        if self.fail_oversampling && matches!(target, RenderTarget::Oversampled { .. }) {
            return Err(BackendError::OutOfMemory { what: "oversampled target" });
        }
        self.log.lock().targets.push(target);
        Ok(())
    }

    fn render_elements(&mut self, frame: &PaintFrame<'_>) -> Result<(), BackendError> {
        self.log.lock().element_counts.push(frame.elements.len());
        Ok(())
    }

    fn downsample(&mut self, _damage: Option<&Region>) -> Result<(), BackendError> {
        self.log.lock().downsampled += 1;
        Ok(())
    }

    fn present(&mut self, damage: Option<&Region>) -> Result<(), BackendError> {
        self.log.lock().presented.push(damage.cloned());
        Ok(())
    }

    fn set_cursor_plane(&mut self, update: &CursorPlaneUpdate) -> Result<(), BackendError> {
        if !self.capabilities.cursor_plane {
            return Err(BackendError::NoCursorPlane);
        }
        self.log.lock().cursor_updates.push(update.clone());
        Ok(())
    }

    fn set_gamma(&mut self, table: &GammaTable) -> Result<(), BackendError> {
        self.log.lock().gamma.push(table.clone());
        Ok(())
    }
}

pub fn compositor() -> Compositor {
    Compositor::new(CompositorConfig::default())
}

pub fn damage_tracking() -> BackendCapabilities {
    BackendCapabilities { damage_tracking: true, ..Default::default() }
}

/// Adds and initializes an output at `(x, y)` with a single mode.
pub fn add_output(
    compositor: &mut Compositor,
    name: &str,
    (x, y): (i32, i32),
    (width, height): (i32, i32),
    capabilities: BackendCapabilities,
) -> (OutputId, Arc<Mutex<BackendLog>>) {
    let (backend, log) = RecordingBackend::new(capabilities, Mode::new(width, height, 60_000));
    let id = compositor.add_output(OutputConfig::new(name).position(x, y), Box::new(backend));
    compositor.initialize_output(id).unwrap();
    (id, log)
}

pub fn buffer(compositor: &mut Compositor, client: ClientId, width: u32, height: u32) -> BufferId {
    compositor
        .buffers_mut()
        .register_buffer(BufferType::Shm, width, height, width * 4, BufferFormat::Argb8888, client)
        .unwrap()
        .id
}

/// Serial of the newest configure event of any kind addressed to `surface`.
pub fn last_configure(events: &[CompositorEvent], surface: SurfaceId) -> Option<Serial> {
    events.iter().rev().find_map(|event| match event {
        CompositorEvent::ToplevelConfigure { surface: s, serial, .. }
        | CompositorEvent::PopupConfigure { surface: s, serial, .. }
        | CompositorEvent::LayerConfigure { surface: s, serial, .. }
        | CompositorEvent::LockConfigure { surface: s, serial, .. }
            if *s == surface =>
        {
            Some(*serial)
        }
        _ => None,
    })
}

/// Creates a toplevel and drives it through the initial configure until it
/// is mapped with a `width`x`height` buffer.
pub fn mapped_toplevel(compositor: &mut Compositor, client: ClientId, width: u32, height: u32) -> SurfaceId {
    let surface = compositor.create_surface(client);
    compositor.get_toplevel(surface).unwrap();
    compositor.commit(surface).unwrap();
    let serial = last_configure(&compositor.drain_events(), surface).unwrap();
    compositor.ack_configure(surface, serial).unwrap();
    let buffer = buffer(compositor, client, width, height);
    compositor.attach(surface, Some(buffer), 0, 0).unwrap();
    compositor.commit(surface).unwrap();
    assert!(compositor.surface(surface).unwrap().is_mapped());
    surface
}

/// Creates a layer surface, lets `setup` adjust its pending state, then maps it
/// with a buffer of the configured size.
pub fn mapped_layer(
    compositor: &mut Compositor,
    client: ClientId,
    output: OutputId,
    layer: Layer,
    setup: impl FnOnce(&mut stratum_compositor_core::role::LayerRole),
) -> SurfaceId {
    let surface = compositor.create_surface(client);
    compositor.get_layer_surface(surface, output, layer, "test").unwrap();
    setup(compositor.layer_surface_mut(surface).unwrap());
    compositor.commit(surface).unwrap();
    let events = compositor.drain_events();
    let (serial, size) = events
        .iter()
        .rev()
        .find_map(|event| match event {
            CompositorEvent::LayerConfigure { surface: s, serial, size, .. } if *s == surface => Some((*serial, *size)),
            _ => None,
        })
        .unwrap();
    compositor.ack_configure(surface, serial).unwrap();
    let buffer = buffer(compositor, client, size.width as u32, size.height as u32);
    compositor.attach(surface, Some(buffer), 0, 0).unwrap();
    compositor.commit(surface).unwrap();
    assert!(compositor.surface(surface).unwrap().is_mapped());
    surface
}
