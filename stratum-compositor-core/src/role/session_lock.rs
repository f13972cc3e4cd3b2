//! Lock screen surfaces. One per output, always covering the whole output.

use std::collections::VecDeque;

use crate::error::ProtocolError;
use crate::events::CompositorEvent;
use crate::geometry::{Point, Size};
use crate::output::OutputId;
use crate::seat::Serial;
use crate::surface::{CommitPreview, SurfaceId};

use super::{CommitReaction, RoleBehavior, RoleContext, RoleKind};

#[derive(Debug)]
pub struct SessionLockRole {
    output: OutputId,
    pending_configures: VecDeque<(Serial, Size)>,
    acked: Option<(Serial, Size)>,
    /// Size of the last acked configure that was committed.
    configured_size: Option<Size>,
    last_sent_size: Option<Size>,
}

impl SessionLockRole {
    pub fn new(output: OutputId) -> Self {
        Self {
            output,
            pending_configures: VecDeque::new(),
            acked: None,
            configured_size: None,
            last_sent_size: None,
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn configured_size(&self) -> Option<Size> {
        self.configured_size
    }

    /// Configures the lock surface to the output's logical size.
    pub(crate) fn configure(&mut self, size: Size, ctx: &mut RoleContext<'_>) {
        if self.last_sent_size == Some(size) {
            return;
        }
        let serial = ctx.serials.next_serial();
        self.pending_configures.push_back((serial, size));
        self.last_sent_size = Some(size);
        ctx.events.push(CompositorEvent::LockConfigure {
            client: ctx.client,
            surface: ctx.surface,
            serial,
            size,
        });
    }

    pub fn ack_configure(&mut self, serial: Serial, ctx: &mut RoleContext<'_>) -> Result<(), ProtocolError> {
        let index = self
            .pending_configures
            .iter()
            .position(|(s, _)| *s == serial)
            .ok_or(ProtocolError::InvalidSerial { surface: ctx.surface, serial })?;
        self.acked = self.pending_configures.drain(..=index).last();
        Ok(())
    }
}

impl RoleBehavior for SessionLockRole {
    fn kind(&self) -> RoleKind {
        RoleKind::SessionLock
    }

    fn role_position(&self) -> Point {
        Point::default()
    }

    fn check_commit(&self, surface: SurfaceId, preview: &CommitPreview) -> Result<(), ProtocolError> {
        if !preview.has_buffer {
            return Ok(());
        }
        let expected = self
            .acked
            .map(|(_, size)| size)
            .or(self.configured_size)
            .ok_or(ProtocolError::UnconfiguredBuffer { surface })?;
        if preview.surface_size != expected {
            return Err(ProtocolError::DimensionsMismatch { surface, expected, got: preview.surface_size });
        }
        Ok(())
    }

    fn on_commit(&mut self, _ctx: &mut RoleContext<'_>, _preview: &CommitPreview) -> CommitReaction {
        if let Some((_, size)) = self.acked.take() {
            self.configured_size = Some(size);
        }
        CommitReaction::empty()
    }

    fn exclusive_output(&self) -> Option<OutputId> {
        Some(self.output)
    }
}
