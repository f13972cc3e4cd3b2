//! Top-level windows.
//!
//! The compositor never changes a toplevel's size or state bits directly. It
//! queues a [`ToplevelConfigure`] tagged with a fresh serial; the client acks the
//! serial and the acked configuration becomes current with the next commit.
//!
//! State requests that arrive before the first configure was acked are kept
//! and replayed once it is, so a client asking for fullscreen before it ever
//! saw a configure still ends up fullscreen.

use std::collections::VecDeque;

use bitflags::bitflags;

use crate::error::ProtocolError;
use crate::events::CompositorEvent;
use crate::geometry::{Point, Rectangle, Size};
use crate::output::OutputId;
use crate::seat::Serial;
use crate::surface::{CommitPreview, SurfaceId};

use super::{CommitReaction, RoleBehavior, RoleContext, RoleKind};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ToplevelStates: u32 {
        const MAXIMIZED = 1;
        const FULLSCREEN = 1 << 1;
        const RESIZING = 1 << 2;
        const ACTIVATED = 1 << 3;
        const MINIMIZED = 1 << 4;
    }
}

bitflags! {
    /// Edges dragged by an interactive resize.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResizeEdge: u32 {
        const TOP = 1;
        const BOTTOM = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

impl ResizeEdge {
    /// At least one edge, and never two opposite ones.
    pub fn is_valid(&self) -> bool {
        !self.is_empty()
            && !self.contains(ResizeEdge::TOP | ResizeEdge::BOTTOM)
            && !self.contains(ResizeEdge::LEFT | ResizeEdge::RIGHT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToplevelConfigure {
    pub serial: Serial,
    /// Zero lets the client choose.
    pub size: Size,
    pub states: ToplevelStates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToplevelPhase {
    /// No configure sent yet.
    Unconfigured,
    /// The initial configure is waiting for its ack.
    ConfiguredPendingAck,
    /// The initial configure was acked.
    Active,
}

/// Client requests that change state bits and therefore need a configure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToplevelRequest {
    SetMaximized(bool),
    SetFullscreen(bool, Option<OutputId>),
    SetMinimized,
}

/// Double-buffered toplevel attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToplevelState {
    pub window_geometry: Option<Rectangle>,
    /// Zero means unbounded.
    pub min_size: Size,
    pub max_size: Size,
}

#[derive(Debug)]
pub struct ToplevelRole {
    phase: ToplevelPhase,
    pending_configures: VecDeque<ToplevelConfigure>,
    acked: Option<ToplevelConfigure>,
    current_configure: Option<ToplevelConfigure>,
    desired_size: Size,
    desired_states: ToplevelStates,
    fullscreen_output: Option<OutputId>,
    deferred: Vec<ToplevelRequest>,
    pending: ToplevelState,
    current: ToplevelState,
    title: Option<String>,
    app_id: Option<String>,
    parent: Option<SurfaceId>,
    position: Point,
    had_buffer: bool,
}

impl Default for ToplevelRole {
    fn default() -> Self {
        Self::new()
    }
}

impl ToplevelRole {
    pub fn new() -> Self {
        Self {
            phase: ToplevelPhase::Unconfigured,
            pending_configures: VecDeque::new(),
            acked: None,
            current_configure: None,
            desired_size: Size::default(),
            desired_states: ToplevelStates::empty(),
            fullscreen_output: None,
            deferred: Vec::new(),
            pending: ToplevelState::default(),
            current: ToplevelState::default(),
            title: None,
            app_id: None,
            parent: None,
            position: Point::default(),
            had_buffer: false,
        }
    }

    pub fn phase(&self) -> ToplevelPhase {
        self.phase
    }

    /// The configuration that was acked and committed last.
    pub fn current_configure(&self) -> Option<&ToplevelConfigure> {
        self.current_configure.as_ref()
    }

    pub fn pending_configures(&self) -> impl Iterator<Item = &ToplevelConfigure> {
        self.pending_configures.iter()
    }

    /// State bits the client has accepted.
    pub fn states(&self) -> ToplevelStates {
        self.current_configure.map(|c| c.states).unwrap_or_default()
    }

    /// State bits the compositor wants the client to have.
    pub fn desired_states(&self) -> ToplevelStates {
        self.desired_states
    }

    pub fn fullscreen_output(&self) -> Option<OutputId> {
        self.fullscreen_output
    }

    pub fn state(&self) -> &ToplevelState {
        &self.current
    }

    pub fn window_geometry(&self) -> Option<Rectangle> {
        self.current.window_geometry
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn parent(&self) -> Option<SurfaceId> {
        self.parent
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn has_deferred_requests(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    pub fn set_app_id(&mut self, app_id: String) {
        self.app_id = Some(app_id);
    }

    /// Cycle checks are done by the caller, which can see the other toplevels.
    pub(crate) fn set_parent(&mut self, parent: Option<SurfaceId>) {
        self.parent = parent;
    }

    pub(crate) fn set_position(&mut self, position: Point) {
        self.position = position;
    }

    pub fn set_window_geometry(&mut self, surface: SurfaceId, geometry: Rectangle) -> Result<(), ProtocolError> {
        if geometry.is_empty() {
            return Err(ProtocolError::InvalidGeometry {
                surface,
                width: geometry.width,
                height: geometry.height,
            });
        }
        self.pending.window_geometry = Some(geometry);
        Ok(())
    }

    pub fn set_min_size(&mut self, surface: SurfaceId, size: Size) -> Result<(), ProtocolError> {
        check_size_bound(surface, size, self.pending.max_size)?;
        self.pending.min_size = size;
        Ok(())
    }

    pub fn set_max_size(&mut self, surface: SurfaceId, size: Size) -> Result<(), ProtocolError> {
        check_size_bound(surface, self.pending.min_size, size)?;
        self.pending.max_size = size;
        Ok(())
    }

    /// Handles a state request from the client, deferring it while the
    /// initial configure is outstanding.
    pub fn request(&mut self, request: ToplevelRequest, ctx: &mut RoleContext<'_>) {
        if self.phase != ToplevelPhase::Active {
            tracing::debug!(surface = %ctx.surface, ?request, "Deferring toplevel request until first ack");
            self.deferred.push(request);
            return;
        }
        self.apply_request(request);
        self.send_configure(ctx);
    }

    fn apply_request(&mut self, request: ToplevelRequest) {
        match request {
            ToplevelRequest::SetMaximized(on) => self.desired_states.set(ToplevelStates::MAXIMIZED, on),
            ToplevelRequest::SetFullscreen(on, output) => {
                self.desired_states.set(ToplevelStates::FULLSCREEN, on);
                self.fullscreen_output = if on { output } else { None };
            }
            ToplevelRequest::SetMinimized => self.desired_states.insert(ToplevelStates::MINIMIZED),
        }
    }

    /// Compositor-side state change. Before the initial configure it only
    /// shapes what that configure will carry.
    pub fn set_state(&mut self, state: ToplevelStates, on: bool, ctx: &mut RoleContext<'_>) {
        let before = self.desired_states;
        self.desired_states.set(state, on);
        if before != self.desired_states && self.phase != ToplevelPhase::Unconfigured {
            self.send_configure(ctx);
        }
    }

    pub fn set_size(&mut self, size: Size, ctx: &mut RoleContext<'_>) {
        if self.desired_size == size {
            return;
        }
        self.desired_size = size;
        if self.phase != ToplevelPhase::Unconfigured {
            self.send_configure(ctx);
        }
    }

    /// Queues a configure with the desired size and states.
    pub fn send_configure(&mut self, ctx: &mut RoleContext<'_>) -> Serial {
        let configure = ToplevelConfigure {
            serial: ctx.serials.next_serial(),
            size: self.desired_size,
            states: self.desired_states,
        };
        self.pending_configures.push_back(configure);
        if self.phase == ToplevelPhase::Unconfigured {
            self.phase = ToplevelPhase::ConfiguredPendingAck;
        }
        ctx.events.push(CompositorEvent::ToplevelConfigure {
            client: ctx.client,
            surface: ctx.surface,
            serial: configure.serial,
            size: configure.size,
            states: configure.states,
        });
        configure.serial
    }

    /// Acknowledges a configure. Older configures are dropped with it.
    pub fn ack_configure(&mut self, serial: Serial, ctx: &mut RoleContext<'_>) -> Result<(), ProtocolError> {
        let index = self
            .pending_configures
            .iter()
            .position(|c| c.serial == serial)
            .ok_or(ProtocolError::InvalidSerial { surface: ctx.surface, serial })?;
        self.acked = self.pending_configures.drain(..=index).last();

        if self.phase == ToplevelPhase::ConfiguredPendingAck {
            self.phase = ToplevelPhase::Active;
            let deferred = std::mem::take(&mut self.deferred);
            if !deferred.is_empty() {
                tracing::debug!(surface = %ctx.surface, count = deferred.len(), "Replaying deferred toplevel requests");
                for request in deferred {
                    self.apply_request(request);
                }
                self.send_configure(ctx);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = ToplevelPhase::Unconfigured;
        self.pending_configures.clear();
        self.acked = None;
        self.current_configure = None;
        self.current = ToplevelState::default();
        self.pending = ToplevelState::default();
        self.had_buffer = false;
    }
}

fn check_size_bound(surface: SurfaceId, min: Size, max: Size) -> Result<(), ProtocolError> {
    let negative = min.width < 0 || min.height < 0 || max.width < 0 || max.height < 0;
    let crossed = (max.width > 0 && min.width > max.width) || (max.height > 0 && min.height > max.height);
    if negative || crossed {
        return Err(ProtocolError::InvalidSizeBounds { surface, min, max });
    }
    Ok(())
}

impl RoleBehavior for ToplevelRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Toplevel
    }

    /// `position` places the window geometry; the surface origin sits
    /// before it by the geometry offset.
    fn role_position(&self) -> Point {
        let offset = self.current.window_geometry.map(|g| g.loc()).unwrap_or_default();
        self.position - offset
    }

    fn check_commit(&self, surface: SurfaceId, preview: &CommitPreview) -> Result<(), ProtocolError> {
        if preview.has_buffer && self.phase != ToplevelPhase::Active {
            return Err(ProtocolError::UnconfiguredBuffer { surface });
        }
        check_size_bound(surface, self.pending.min_size, self.pending.max_size)
    }

    fn on_commit(&mut self, ctx: &mut RoleContext<'_>, preview: &CommitPreview) -> CommitReaction {
        let mut reaction = CommitReaction::empty();
        if self.had_buffer && !preview.has_buffer {
            tracing::debug!(surface = %ctx.surface, "Toplevel unmapped, resetting");
            self.reset();
            self.send_configure(ctx);
            return CommitReaction::RESET;
        }

        if self.current.window_geometry != self.pending.window_geometry {
            reaction |= CommitReaction::GEOMETRY;
        }
        self.current = self.pending.clone();
        if let Some(acked) = self.acked.take() {
            self.current_configure = Some(acked);
        }
        self.had_buffer = preview.has_buffer;

        if self.phase == ToplevelPhase::Unconfigured {
            self.send_configure(ctx);
        }
        reaction
    }
}
