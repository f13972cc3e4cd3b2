//! The compositor context.
//!
//! [`Compositor`] owns every surface, output, buffer reference and the seat and
//! cursor state. Request handlers take `&mut Compositor`; when paint threads are
//! running the context lives inside a [`GlobalLock`](crate::output::GlobalLock)
//! and holding the guard is what serializes request processing against paint
//! cycles.
//!
//! A commit runs in a fixed order: the staged state is validated and becomes
//! current, buffer references are settled, the role reacts, mapping is
//! recomputed for the surface and everything depending on it, damage reaches
//! the outputs, and finally synced sub-surfaces apply their cached commits
//! depth-first in stacking order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use stratum_buffer_manager::{BufferDetails, BufferId, BufferManager, ClientId, ReleaseOutcome};
use stratum_core::CompositorConfig;

use crate::cursor::Cursor;
use crate::error::{CompositorError, ProtocolError, Result};
use crate::events::{CallbackId, CompositorEvent, EventQueue};
use crate::geometry::{Point, Rectangle, Transform};
use crate::output::{Output, OutputId};
use crate::region::Region;
use crate::role::{CommitReaction, Role, RoleContext, RoleKind};
use crate::seat::{Seat, SerialCounter};
use crate::shell::SessionLock;
use crate::surface::{BufferAssignment, CommitGate, CommitOrigin, Surface, SurfaceId, SurfaceRegistry};

pub struct Compositor {
    config: CompositorConfig,
    pub(crate) surfaces: SurfaceRegistry,
    pub(crate) buffers: BufferManager,
    pub(crate) outputs: BTreeMap<OutputId, Output>,
    pub(crate) serials: SerialCounter,
    pub(crate) events: EventQueue,
    pub(crate) seat: Seat,
    pub(crate) cursor: Cursor,
    /// Mapped toplevels, bottom to top.
    pub(crate) windows: Vec<SurfaceId>,
    /// Popups in creation order.
    pub(crate) popups: Vec<SurfaceId>,
    pub(crate) session_lock: Option<SessionLock>,
    commit_counter: u64,
    started: Instant,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        tracing::info!(
            oversampling = config.oversampling,
            hardware_cursor = config.hardware_cursor,
            policy = ?config.exclusive_zone_policy,
            "Creating compositor core"
        );
        let cursor = Cursor::new(config.cursor_size);
        Self {
            config,
            surfaces: SurfaceRegistry::new(),
            buffers: BufferManager::new(),
            outputs: BTreeMap::new(),
            serials: SerialCounter::new(),
            events: EventQueue::new(),
            seat: Seat::new("seat0"),
            cursor,
            windows: Vec::new(),
            popups: Vec::new(),
            session_lock: None,
            commit_counter: 0,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id)
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// The marshalling layer registers and destroys client buffers here.
    pub fn buffers_mut(&mut self) -> &mut BufferManager {
        &mut self.buffers
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn seat(&self) -> &Seat {
        &self.seat
    }

    pub fn seat_mut(&mut self) -> &mut Seat {
        &mut self.seat
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Mapped toplevels, bottom to top.
    pub fn windows(&self) -> &[SurfaceId] {
        &self.windows
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<CompositorEvent> {
        self.events.drain()
    }

    pub(crate) fn next_commit_sequence(&mut self) -> u64 {
        self.commit_counter += 1;
        self.commit_counter
    }

    pub(crate) fn elapsed_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut Surface> {
        self.surfaces.get_mut(id).ok_or(CompositorError::UnknownSurface(id))
    }

    pub(crate) fn client_of(&self, id: SurfaceId) -> Result<ClientId> {
        self.surfaces.get(id).map(Surface::client).ok_or(CompositorError::UnknownSurface(id))
    }

    /// Runs `f` with the surface's role and a context to emit events with.
    /// Returns `Ok(None)` if the surface has no role.
    pub(crate) fn with_role<R>(
        &mut self,
        id: SurfaceId,
        f: impl FnOnce(&mut Role, &mut RoleContext<'_>) -> R,
    ) -> Result<Option<R>> {
        let surface = self.surfaces.get_mut(id).ok_or(CompositorError::UnknownSurface(id))?;
        let client = surface.client();
        let Some(role) = surface.role.as_mut() else {
            return Ok(None);
        };
        let mut ctx = RoleContext { surface: id, client, serials: &mut self.serials, events: &mut self.events };
        Ok(Some(f(role, &mut ctx)))
    }

    /// Installs a role, rejecting surfaces that have or had a different one.
    pub(crate) fn assign_role(&mut self, id: SurfaceId, role: Role) -> Result<()> {
        let surface = self.surfaces.get(id).ok_or(CompositorError::UnknownSurface(id))?;
        let requested = role.kind();
        let violation = match (surface.role_kind(), surface.previous_role) {
            (Some(existing), _) => Some(ProtocolError::RoleAlreadyAssigned { surface: id, existing }),
            (None, Some(previous)) if previous != requested => {
                Some(ProtocolError::RoleMismatch { surface: id, previous, requested })
            }
            _ => None,
        };
        if let Some(err) = violation {
            let client = surface.client();
            return Err(self.fail_client(client, err));
        }
        tracing::debug!(surface = %id, role = %requested, "Assigned role");
        self.surface_mut(id)?.set_role(role);
        Ok(())
    }

    // Surface lifecycle.

    pub fn create_surface(&mut self, client: ClientId) -> SurfaceId {
        let id = self.surfaces.insert(client, self.config.max_damage_rects);
        tracing::debug!(surface = %id, %client, "Created surface");
        id
    }

    /// Destroys a surface: unmaps it, detaches its role and drops every
    /// reference other objects hold to it.
    pub fn destroy_surface(&mut self, id: SurfaceId) -> Result<()> {
        if !self.surfaces.contains(id) {
            return Err(CompositorError::UnknownSurface(id));
        }
        let dependents = self.dependents(id);

        if self.surfaces.get(id).is_some_and(Surface::is_mapped) {
            self.surface_mut(id)?.mapped = false;
            self.on_unmapped(id);
        }
        for popup in self.popups_of(id) {
            self.dismiss_popup(popup);
        }

        let role = self.surface_mut(id)?.take_role();
        match role {
            Some(Role::Subsurface(sub)) => {
                if let Some(parent) = self.surfaces.get_mut(sub.parent()) {
                    parent.remove_child(id);
                }
            }
            Some(Role::Popup(_)) => {
                self.popups.retain(|p| *p != id);
                let above = self.seat.pop_popup_grab(id);
                for popup in above.into_iter().filter(|p| *p != id) {
                    self.dismiss_popup(popup);
                }
            }
            Some(Role::Toplevel(_)) => {
                let orphans: Vec<SurfaceId> = self
                    .surfaces
                    .iter()
                    .filter(|s| s.role().and_then(Role::as_toplevel).is_some_and(|t| t.parent() == Some(id)))
                    .map(Surface::id)
                    .collect();
                for orphan in orphans {
                    if let Some(toplevel) = self.surface_mut(orphan)?.role.as_mut().and_then(Role::as_toplevel_mut) {
                        toplevel.set_parent(None);
                    }
                }
            }
            Some(Role::Layer(layer)) => self.arrange_output(layer.output()),
            Some(Role::Cursor(_)) => {
                if self.cursor.surface() == Some(id) {
                    self.cursor.set_image(None, false);
                    self.update_cursor(true);
                }
            }
            Some(Role::DragIcon(_)) | Some(Role::SessionLock(_)) | None => {}
        }

        let surface = self.surface_mut(id)?;
        let current = surface.current.buffer.take();
        if let Some(buffer) = current {
            self.release_buffer(&buffer);
        }
        self.seat.surface_destroyed(id);
        self.surfaces.remove(id);
        tracing::debug!(surface = %id, "Destroyed surface");

        for dependent in dependents {
            self.update_mapped(dependent);
        }
        Ok(())
    }

    /// Drops everything a client owns, e.g. after its connection closed.
    pub fn disconnect_client(&mut self, client: ClientId) {
        let surfaces = self.surfaces.surfaces_of_client(client);
        tracing::info!(%client, surfaces = surfaces.len(), "Disconnecting client");
        // Children before parents keeps the tree consistent while tearing down.
        for id in surfaces.into_iter().rev() {
            if let Err(err) = self.destroy_surface(id) {
                tracing::debug!(surface = %id, %err, "Surface already gone during disconnect");
            }
        }
        self.buffers.remove_client_buffers(client);
        if self.session_lock.as_ref().is_some_and(|lock| lock.client == client) {
            tracing::warn!(%client, "Lock client disconnected; session stays locked");
        }
        self.events.discard_client(client);
    }

    /// Disconnects the client that caused `err` and returns the error for the caller.
    pub(crate) fn fail_client(&mut self, client: ClientId, err: ProtocolError) -> CompositorError {
        tracing::warn!(%client, code = err.code(), error = %err, "Protocol error");
        self.disconnect_client(client);
        self.events.push(CompositorEvent::ClientError { client, code: err.code(), reason: err.to_string() });
        CompositorError::Protocol(err)
    }

    // Pending state.

    /// Attaches a buffer, or detaches with `None`. Offsets must go through [`Compositor::offset`].
    pub fn attach(&mut self, id: SurfaceId, buffer: Option<BufferId>, dx: i32, dy: i32) -> Result<()> {
        let client = self.client_of(id)?;
        if dx != 0 || dy != 0 {
            return Err(self.fail_client(client, ProtocolError::InvalidOffset { surface: id, dx, dy }));
        }
        let assignment = match buffer {
            Some(buffer) => {
                let details = match self.buffers.get_buffer_details(buffer) {
                    Some(details) if details.owner != client => {
                        let err = stratum_buffer_manager::BufferError::ForeignBuffer {
                            buffer,
                            owner: details.owner,
                            requester: client,
                        };
                        return Err(self.fail_client(client, err.into()));
                    }
                    Some(details) => details,
                    None => {
                        let err = stratum_buffer_manager::BufferError::UnknownBuffer(buffer);
                        return Err(self.fail_client(client, err.into()));
                    }
                };
                BufferAssignment::Attach(details)
            }
            None => BufferAssignment::Detach,
        };
        self.surface_mut(id)?.pending.buffer = Some(assignment);
        Ok(())
    }

    pub fn offset(&mut self, id: SurfaceId, dx: i32, dy: i32) -> Result<()> {
        let pending = &mut self.surface_mut(id)?.pending;
        pending.offset = Some(pending.offset.unwrap_or_default() + Point::new(dx, dy));
        Ok(())
    }

    /// Damage in surface-local coordinates.
    pub fn damage(&mut self, id: SurfaceId, rect: Rectangle) -> Result<()> {
        self.surface_mut(id)?.pending.surface_damage.push(rect);
        Ok(())
    }

    /// Damage in buffer coordinates.
    pub fn damage_buffer(&mut self, id: SurfaceId, rect: Rectangle) -> Result<()> {
        self.surface_mut(id)?.pending.buffer_damage.push(rect);
        Ok(())
    }

    /// `None` makes the surface fully transparent for occlusion purposes.
    pub fn set_opaque_region(&mut self, id: SurfaceId, region: Option<Region>) -> Result<()> {
        self.surface_mut(id)?.pending.opaque_region = Some(region.unwrap_or_default());
        Ok(())
    }

    /// `None` accepts input on the whole surface.
    pub fn set_input_region(&mut self, id: SurfaceId, region: Option<Region>) -> Result<()> {
        self.surface_mut(id)?.pending.input_region = Some(region);
        Ok(())
    }

    pub fn set_buffer_scale(&mut self, id: SurfaceId, scale: i32) -> Result<()> {
        let client = self.client_of(id)?;
        if scale <= 0 {
            return Err(self.fail_client(client, ProtocolError::InvalidScale { scale }));
        }
        self.surface_mut(id)?.pending.scale = Some(scale);
        Ok(())
    }

    pub fn set_buffer_transform(&mut self, id: SurfaceId, transform: Transform) -> Result<()> {
        self.surface_mut(id)?.pending.transform = Some(transform);
        Ok(())
    }

    pub fn frame(&mut self, id: SurfaceId, callback: CallbackId) -> Result<()> {
        self.surface_mut(id)?.pending.frame_callbacks.push(callback);
        Ok(())
    }

    // Commit.

    /// Commits the pending state of a surface on behalf of its client.
    pub fn commit(&mut self, id: SurfaceId) -> Result<()> {
        self.surface_mut(id)?.stage_pending();
        self.request_commit(id, CommitOrigin::Itself)
    }

    /// Applies the staged state if the role accepts a commit from `origin`.
    /// Rejected commits stay cached.
    pub(crate) fn request_commit(&mut self, id: SurfaceId, origin: CommitOrigin) -> Result<()> {
        let gate = CommitGate { origin, effectively_synced: self.is_effectively_synced(id) };
        let surface = self.surfaces.get(id).ok_or(CompositorError::UnknownSurface(id))?;
        let accepted = match surface.role() {
            Some(role) => role.behavior().accept_commit(&gate),
            None => origin == CommitOrigin::Itself,
        };
        if !accepted {
            tracing::trace!(surface = %id, ?origin, "Commit cached until the parent commits");
            return Ok(());
        }
        self.apply_commit(id, origin)
    }

    fn apply_commit(&mut self, id: SurfaceId, origin: CommitOrigin) -> Result<()> {
        let surface = self.surfaces.get(id).ok_or(CompositorError::UnknownSurface(id))?;
        if !surface.has_cached_state() {
            return Ok(());
        }
        let client = surface.client();
        let preview = surface.preview();
        let checked = surface.validate_staged(&preview).and_then(|()| match surface.role() {
            Some(role) => role.behavior().check_commit(id, &preview),
            None => Ok(()),
        });
        if let Err(err) = checked {
            return Err(self.fail_client(client, err));
        }

        let sequence = self.next_commit_sequence();
        let Some(applied) = self.surface_mut(id)?.apply_staged(sequence) else {
            return Ok(());
        };
        if let Some(buffer) = applied.attached_buffer {
            self.take_buffer_reference(id, client, buffer)?;
        }
        if let Some(buffer) = applied.replaced_buffer {
            self.release_buffer(&buffer);
        }
        self.apply_child_positions(id);

        let reaction = self
            .with_role(id, |role, ctx| role.behavior_mut().on_commit(ctx, &preview))?
            .unwrap_or_default();
        tracing::trace!(surface = %id, ?origin, sequence, ?reaction, "Applied commit");

        self.update_mapped(id);
        self.handle_reaction(id, reaction);
        self.refresh_tree(id);

        let children: Vec<SurfaceId> = self.surfaces.get(id).map(|s| s.children().collect()).unwrap_or_default();
        for child in children {
            if self.surfaces.get(child).is_some_and(Surface::has_cached_state) {
                self.request_commit(child, CommitOrigin::Parent)?;
            }
        }
        Ok(())
    }

    fn take_buffer_reference(&mut self, id: SurfaceId, client: ClientId, buffer: Arc<BufferDetails>) -> Result<()> {
        match self.buffers.acquire(buffer.id, client) {
            Ok(details) if details.is_destroyed() => {
                tracing::warn!(surface = %id, buffer = %buffer.id, "Committed buffer was destroyed, treating as detach");
                self.release_buffer(&details);
            }
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!(surface = %id, buffer = %buffer.id, %err, "Committed buffer is gone, treating as detach");
            }
        }
        self.surface_mut(id)?.current.buffer = None;
        Ok(())
    }

    pub(crate) fn release_buffer(&mut self, buffer: &BufferDetails) {
        match self.buffers.release(buffer.id) {
            Ok(ReleaseOutcome::Released { owner }) => {
                self.events.push(CompositorEvent::BufferRelease { client: owner, buffer: buffer.id });
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(buffer = %buffer.id, %err, "Buffer already forgotten"),
        }
    }

    fn handle_reaction(&mut self, id: SurfaceId, reaction: CommitReaction) {
        if reaction.contains(CommitReaction::ARRANGE) {
            let output = self.surfaces.get(id).and_then(Surface::role).and_then(Role::as_layer).map(|l| l.output());
            if let Some(output) = output {
                self.arrange_output(output);
            }
        }
        if reaction.contains(CommitReaction::CURSOR_IMAGE) && self.cursor.surface() == Some(id) {
            self.update_cursor(true);
        }
    }

    // Mapping.

    fn compute_mapped(&self, id: SurfaceId) -> bool {
        let Some(surface) = self.surfaces.get(id) else {
            return false;
        };
        let Some(role) = surface.role() else {
            return false;
        };
        if surface.current.buffer.is_none() || !role.behavior().can_map() {
            return false;
        }
        if let Some(output) = role.behavior().exclusive_output() {
            if !self.outputs.get(&output).is_some_and(Output::is_initialized) {
                return false;
            }
        }
        match role {
            Role::Subsurface(sub) => self.surfaces.get(sub.parent()).is_some_and(Surface::is_mapped),
            Role::Popup(popup) => self.surfaces.get(popup.parent()).is_some_and(Surface::is_mapped),
            _ => true,
        }
    }

    /// Recomputes the mapped state of `id` and everything depending on it.
    pub(crate) fn update_mapped(&mut self, id: SurfaceId) {
        let mapped = self.compute_mapped(id);
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };
        let was_mapped = surface.mapped;
        surface.mapped = mapped;
        match (was_mapped, mapped) {
            (false, true) => self.on_mapped(id),
            (true, false) => self.on_unmapped(id),
            _ => {}
        }
        for dependent in self.dependents(id) {
            self.update_mapped(dependent);
        }
    }

    fn on_mapped(&mut self, id: SurfaceId) {
        let kind = self.surfaces.get(id).and_then(Surface::role_kind);
        tracing::debug!(surface = %id, role = ?kind, "Surface mapped");
        match kind {
            Some(RoleKind::Toplevel) => {
                let origin = self.placement_area().loc();
                if let Some(toplevel) = self
                    .surfaces
                    .get_mut(id)
                    .and_then(|s| s.role.as_mut())
                    .and_then(Role::as_toplevel_mut)
                {
                    if toplevel.position() == Point::default() {
                        toplevel.set_position(origin);
                    }
                }
                self.windows.push(id);
            }
            Some(RoleKind::Layer) => {
                if let Some(output) = self.layer_output(id) {
                    self.arrange_output(output);
                }
            }
            _ => {}
        }
    }

    fn on_unmapped(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };
        let kind = surface.role_kind();
        let client = surface.client();
        let old_rect = surface.global_rect.take();
        let left = std::mem::take(&mut surface.outputs);
        surface.damage.clear();
        tracing::debug!(surface = %id, role = ?kind, "Surface unmapped");

        if let Some(rect) = old_rect {
            self.damage_outputs(&Region::from_rect(rect));
        }
        for output in left {
            self.events.push(CompositorEvent::SurfaceLeave { client, surface: id, output });
        }
        match kind {
            Some(RoleKind::Toplevel) => self.windows.retain(|w| *w != id),
            Some(RoleKind::Layer) => {
                if let Some(output) = self.layer_output(id) {
                    self.arrange_output(output);
                }
            }
            _ => {}
        }
        for popup in self.popups_of(id) {
            self.dismiss_popup(popup);
        }
    }

    fn layer_output(&self, id: SurfaceId) -> Option<OutputId> {
        self.surfaces.get(id)?.role()?.as_layer().map(|l| l.output())
    }

    /// Where new windows go: the usable area of the output under the cursor.
    pub(crate) fn placement_area(&self) -> Rectangle {
        self.cursor_output()
            .and_then(|id| self.outputs.get(&id))
            .map(Output::usable)
            .unwrap_or_default()
    }

    pub(crate) fn popups_of(&self, parent: SurfaceId) -> Vec<SurfaceId> {
        self.popups
            .iter()
            .copied()
            .filter(|p| {
                self.surfaces
                    .get(*p)
                    .and_then(Surface::role)
                    .and_then(Role::as_popup)
                    .is_some_and(|popup| popup.parent() == parent)
            })
            .collect()
    }

    /// Surfaces whose mapped state or position derive from `id`.
    pub(crate) fn dependents(&self, id: SurfaceId) -> Vec<SurfaceId> {
        let mut dependents: Vec<SurfaceId> = self.surfaces.get(id).map(|s| s.children().collect()).unwrap_or_default();
        dependents.extend(self.popups_of(id));
        dependents
    }

    // Positions, damage, enter/leave.

    /// Global position of the surface origin, if the surface can be placed.
    pub fn surface_origin(&self, id: SurfaceId) -> Option<Point> {
        let role = self.surfaces.get(id)?.role()?;
        let anchor = match role {
            Role::Toplevel(_) => Point::default(),
            Role::Popup(popup) => self.surface_origin(popup.parent())? + self.window_geometry_origin(popup.parent()),
            Role::Subsurface(sub) => self.surface_origin(sub.parent())?,
            Role::Layer(layer) => self.outputs.get(&layer.output())?.position(),
            Role::SessionLock(lock) => self.outputs.get(&lock.output())?.position(),
            Role::Cursor(_) | Role::DragIcon(_) => self.cursor.position(),
        };
        Some(anchor + role.behavior().role_position())
    }

    /// Offset of the window geometry inside the surface.
    pub(crate) fn window_geometry_origin(&self, id: SurfaceId) -> Point {
        let geometry = match self.surfaces.get(id).and_then(Surface::role) {
            Some(Role::Toplevel(toplevel)) => toplevel.window_geometry(),
            Some(Role::Popup(popup)) => popup.window_geometry(),
            _ => None,
        };
        geometry.map(|g| g.loc()).unwrap_or_default()
    }

    pub(crate) fn damage_outputs(&mut self, damage: &Region) {
        if damage.is_empty() {
            return;
        }
        for output in self.outputs.values_mut() {
            output.add_damage(damage);
        }
    }

    /// Moves the surface's accumulated damage to the outputs and updates its
    /// global rectangle and output membership.
    fn refresh_surface(&mut self, id: SurfaceId) {
        let origin = self.surface_origin(id);
        let is_cursor = self.cursor.surface() == Some(id);
        let Some(surface) = self.surfaces.get_mut(id) else {
            return;
        };
        let local_damage = surface.damage.take();
        let (true, Some(origin)) = (surface.mapped, origin) else {
            return;
        };
        let rect = Rectangle::from_loc_and_size(origin, surface.size());
        let old = surface.global_rect.replace(rect);

        // The cursor pipeline damages cursor images itself.
        if !is_cursor {
            let mut damage = Region::new();
            match old {
                Some(old) if old == rect => damage = local_damage.translated(origin.x, origin.y),
                Some(old) => {
                    damage.add(old);
                    damage.add(rect);
                }
                None => damage.add(rect),
            }
            self.damage_outputs(&damage);
        }
        self.update_surface_outputs(id);
    }

    /// Refreshes `id` and, recursively, its dependents.
    pub(crate) fn refresh_tree(&mut self, id: SurfaceId) {
        self.refresh_surface(id);
        for dependent in self.dependents(id) {
            self.refresh_tree(dependent);
        }
    }

    pub(crate) fn refresh_all_surfaces(&mut self) {
        for id in self.surfaces.ids() {
            self.refresh_surface(id);
        }
    }

    fn update_surface_outputs(&mut self, id: SurfaceId) {
        let Some(surface) = self.surfaces.get(id) else {
            return;
        };
        let entered: BTreeSet<OutputId> = match (surface.mapped, surface.global_rect) {
            (true, Some(rect)) => self
                .outputs
                .values()
                .filter(|o| o.is_initialized() && o.geometry().intersects(&rect))
                .map(Output::id)
                .collect(),
            _ => BTreeSet::new(),
        };
        let client = surface.client();
        let previous = surface.outputs.clone();
        for output in entered.difference(&previous) {
            self.events.push(CompositorEvent::SurfaceEnter { client, surface: id, output: *output });
        }
        for output in previous.difference(&entered) {
            self.events.push(CompositorEvent::SurfaceLeave { client, surface: id, output: *output });
        }
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.outputs = entered;
        }
    }

    /// Emits the frame callbacks of mapped surfaces shown on `output`.
    pub(crate) fn send_frame_callbacks(&mut self, output: OutputId) {
        let time_ms = self.elapsed_ms();
        for id in self.surfaces.ids() {
            let Some(surface) = self.surfaces.get_mut(id) else {
                continue;
            };
            if !surface.mapped || !surface.outputs.contains(&output) || surface.current.frame_callbacks.is_empty() {
                continue;
            }
            let callbacks = std::mem::take(&mut surface.current.frame_callbacks);
            let client = surface.client();
            self.events.push(CompositorEvent::FrameDone { client, callbacks, time_ms });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::ToplevelRole;
    use pretty_assertions::assert_eq;
    use stratum_buffer_manager::{BufferFormat, BufferType};

    fn compositor() -> Compositor {
        Compositor::new(CompositorConfig::default())
    }

    fn buffer(compositor: &mut Compositor, client: ClientId, w: u32, h: u32) -> BufferId {
        compositor
            .buffers_mut()
            .register_buffer(BufferType::Shm, w, h, w * 4, BufferFormat::Argb8888, client)
            .unwrap()
            .id
    }

    #[test]
    fn test_pending_state_is_isolated_until_commit() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        let buf = buffer(&mut c, client, 20, 20);
        c.attach(id, Some(buf), 0, 0).unwrap();
        c.set_buffer_scale(id, 2).unwrap();
        c.set_buffer_transform(id, Transform::Rotated90).unwrap();
        let current = c.surface(id).unwrap().current();
        assert!(current.buffer.is_none());
        assert_eq!(current.scale, 1);
        assert_eq!(current.transform, Transform::Normal);

        c.commit(id).unwrap();
        let current = c.surface(id).unwrap().current();
        assert_eq!(current.buffer.as_ref().map(|b| b.id), Some(buf));
        assert_eq!(current.scale, 2);
    }

    #[test]
    fn test_nonzero_attach_offset_disconnects_client() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        let err = c.attach(id, None, 3, 0).unwrap_err();
        assert!(matches!(err, CompositorError::Protocol(ProtocolError::InvalidOffset { dx: 3, .. })));
        assert!(c.surface(id).is_none());
        assert!(matches!(c.drain_events().last(), Some(CompositorEvent::ClientError { code: 6, .. })));
    }

    #[test]
    fn test_foreign_buffer_is_rejected() {
        let mut c = compositor();
        let owner = ClientId::new(1);
        let thief = ClientId::new(2);
        let buf = buffer(&mut c, owner, 4, 4);
        let id = c.create_surface(thief);
        let err = c.attach(id, Some(buf), 0, 0).unwrap_err();
        assert!(matches!(err, CompositorError::Protocol(ProtocolError::Buffer(_))));
        assert!(c.buffers().get_buffer_details(buf).is_some());
    }

    #[test]
    fn test_replaced_buffer_is_released() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        let first = buffer(&mut c, client, 4, 4);
        let second = buffer(&mut c, client, 4, 4);
        c.attach(id, Some(first), 0, 0).unwrap();
        c.commit(id).unwrap();
        assert!(c.drain_events().is_empty());

        c.attach(id, Some(second), 0, 0).unwrap();
        c.commit(id).unwrap();
        assert_eq!(c.drain_events(), vec![CompositorEvent::BufferRelease { client, buffer: first }]);
    }

    #[test]
    fn test_invalid_scale_is_protocol_error() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        assert!(matches!(
            c.set_buffer_scale(id, 0),
            Err(CompositorError::Protocol(ProtocolError::InvalidScale { scale: 0 }))
        ));
    }

    #[test]
    fn test_role_reassignment_is_rejected() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        c.assign_role(id, Role::Toplevel(ToplevelRole::new())).unwrap();
        let err = c.assign_role(id, Role::Toplevel(ToplevelRole::new())).unwrap_err();
        assert!(matches!(
            err,
            CompositorError::Protocol(ProtocolError::RoleAlreadyAssigned { existing: RoleKind::Toplevel, .. })
        ));
    }

    #[test]
    fn test_unknown_surface() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        c.destroy_surface(id).unwrap();
        assert!(matches!(c.commit(id), Err(CompositorError::UnknownSurface(_))));
        assert!(matches!(c.destroy_surface(id), Err(CompositorError::UnknownSurface(_))));
    }

    #[test]
    fn test_surface_without_role_is_never_mapped() {
        let mut c = compositor();
        let client = ClientId::new(1);
        let id = c.create_surface(client);
        let buf = buffer(&mut c, client, 4, 4);
        c.attach(id, Some(buf), 0, 0).unwrap();
        c.commit(id).unwrap();
        assert!(!c.surface(id).unwrap().is_mapped());
    }
}
