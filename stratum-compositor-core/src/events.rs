//! Outbound notifications produced by the core.
//!
//! The protocol layer drains the [`EventQueue`] after every batch of requests
//! and serializes each event to the client named in it.

use std::collections::VecDeque;

use stratum_buffer_manager::{BufferId, ClientId};

use crate::geometry::{Point, Rectangle, Size};
use crate::output::OutputId;
use crate::role::toplevel::ToplevelStates;
use crate::seat::Serial;
use crate::surface::SurfaceId;

/// Identifier of a frame callback object, chosen by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    ToplevelConfigure {
        client: ClientId,
        surface: SurfaceId,
        serial: Serial,
        /// Zero means the client picks its own size.
        size: Size,
        states: ToplevelStates,
    },
    PopupConfigure {
        client: ClientId,
        surface: SurfaceId,
        serial: Serial,
        /// Relative to the parent's window geometry.
        geometry: Rectangle,
        reposition_token: Option<u32>,
    },
    PopupDone {
        client: ClientId,
        surface: SurfaceId,
    },
    LayerConfigure {
        client: ClientId,
        surface: SurfaceId,
        serial: Serial,
        size: Size,
    },
    /// The layer surface's output went away; the client should destroy it.
    LayerClosed {
        client: ClientId,
        surface: SurfaceId,
    },
    LockConfigure {
        client: ClientId,
        surface: SurfaceId,
        serial: Serial,
        size: Size,
    },
    /// The session is locked and every output shows a lock surface or nothing.
    SessionLocked {
        client: ClientId,
    },
    SurfaceEnter {
        client: ClientId,
        surface: SurfaceId,
        output: OutputId,
    },
    SurfaceLeave {
        client: ClientId,
        surface: SurfaceId,
        output: OutputId,
    },
    /// The client may reuse the buffer.
    BufferRelease {
        client: ClientId,
        buffer: BufferId,
    },
    FrameDone {
        client: ClientId,
        callbacks: Vec<CallbackId>,
        time_ms: u32,
    },
    /// The hardware cursor plane of an output was updated.
    CursorPlaneUpdated {
        output: OutputId,
        /// Top-left of the cursor image in output buffer coordinates.
        position: Point,
        visible: bool,
    },
    /// The client violated the protocol and is being disconnected.
    ClientError {
        client: ClientId,
        code: u32,
        reason: String,
    },
}

impl CompositorEvent {
    /// The client this event is addressed to, if any.
    pub fn client(&self) -> Option<ClientId> {
        match self {
            CompositorEvent::ToplevelConfigure { client, .. }
            | CompositorEvent::PopupConfigure { client, .. }
            | CompositorEvent::PopupDone { client, .. }
            | CompositorEvent::LayerConfigure { client, .. }
            | CompositorEvent::LayerClosed { client, .. }
            | CompositorEvent::LockConfigure { client, .. }
            | CompositorEvent::SessionLocked { client }
            | CompositorEvent::SurfaceEnter { client, .. }
            | CompositorEvent::SurfaceLeave { client, .. }
            | CompositorEvent::BufferRelease { client, .. }
            | CompositorEvent::FrameDone { client, .. }
            | CompositorEvent::ClientError { client, .. } => Some(*client),
            CompositorEvent::CursorPlaneUpdated { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<CompositorEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: CompositorEvent) {
        tracing::trace!(?event, "Queued event");
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<CompositorEvent> {
        self.events.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompositorEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops queued events addressed to a disconnected client.
    pub(crate) fn discard_client(&mut self, client: ClientId) {
        self.events.retain(|event| {
            event.client() != Some(client) || matches!(event, CompositorEvent::ClientError { .. })
        });
    }
}
