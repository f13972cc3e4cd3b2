//! Shell requests: toplevels, popups, layer surfaces, the session lock and the
//! seat-driven interactions that act on them.

use stratum_buffer_manager::ClientId;

use crate::compositor::Compositor;
use crate::error::{CompositorError, ProtocolError, Result};
use crate::events::CompositorEvent;
use crate::geometry::{Point, Rectangle, Size};
use crate::output::OutputId;
use crate::role::layer::Layer;
use crate::role::popup::Positioner;
use crate::role::toplevel::{ResizeEdge, ToplevelRequest, ToplevelStates};
use crate::role::{DragIconRole, LayerRole, PopupRole, Role, RoleKind, SessionLockRole, ToplevelRole};
use crate::region::Region;
use crate::seat::{SeatGrab, Serial};
use crate::surface::{Surface, SurfaceId};

/// An active session lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLock {
    pub client: ClientId,
}

impl Compositor {
    /// Disconnects the owner of `surface` with `err` and returns the error.
    fn reject(&mut self, surface: SurfaceId, err: ProtocolError) -> CompositorError {
        match self.client_of(surface) {
            Ok(client) => self.fail_client(client, err),
            Err(unknown) => unknown,
        }
    }

    fn require_role(&mut self, surface: SurfaceId, kind: RoleKind, request: &'static str) -> Result<()> {
        let actual = self.surfaces.get(surface).ok_or(CompositorError::UnknownSurface(surface))?.role_kind();
        if actual != Some(kind) {
            return Err(self.reject(surface, ProtocolError::NoRole { surface, request }));
        }
        Ok(())
    }

    // Toplevels.

    /// The initial configure is sent when the client first commits.
    pub fn get_toplevel(&mut self, surface: SurfaceId) -> Result<()> {
        self.assign_role(surface, Role::Toplevel(ToplevelRole::new()))
    }

    fn toplevel_mut(&mut self, surface: SurfaceId, request: &'static str) -> Result<&mut ToplevelRole> {
        self.require_role(surface, RoleKind::Toplevel, request)?;
        self.surfaces
            .get_mut(surface)
            .and_then(|s| s.role.as_mut())
            .and_then(Role::as_toplevel_mut)
            .ok_or(CompositorError::UnknownSurface(surface))
    }

    pub fn toplevel(&self, surface: SurfaceId) -> Option<&ToplevelRole> {
        self.surfaces.get(surface)?.role()?.as_toplevel()
    }

    pub fn toplevel_set_title(&mut self, surface: SurfaceId, title: impl Into<String>) -> Result<()> {
        self.toplevel_mut(surface, "set_title")?.set_title(title.into());
        Ok(())
    }

    pub fn toplevel_set_app_id(&mut self, surface: SurfaceId, app_id: impl Into<String>) -> Result<()> {
        self.toplevel_mut(surface, "set_app_id")?.set_app_id(app_id.into());
        Ok(())
    }

    pub fn toplevel_set_parent(&mut self, surface: SurfaceId, parent: Option<SurfaceId>) -> Result<()> {
        self.toplevel_mut(surface, "set_parent")?;
        if let Some(parent) = parent {
            let mut current = Some(parent);
            while let Some(id) = current {
                if id == surface {
                    return Err(self.reject(surface, ProtocolError::InvalidParent { surface }));
                }
                current = self.toplevel(id).and_then(ToplevelRole::parent);
            }
            if self.toplevel(parent).is_none() {
                return Err(self.reject(surface, ProtocolError::InvalidParent { surface }));
            }
        }
        self.toplevel_mut(surface, "set_parent")?.set_parent(parent);
        Ok(())
    }

    pub fn toplevel_set_min_size(&mut self, surface: SurfaceId, size: Size) -> Result<()> {
        let result = self.toplevel_mut(surface, "set_min_size")?.set_min_size(surface, size);
        result.map_err(|err| self.reject(surface, err))
    }

    pub fn toplevel_set_max_size(&mut self, surface: SurfaceId, size: Size) -> Result<()> {
        let result = self.toplevel_mut(surface, "set_max_size")?.set_max_size(surface, size);
        result.map_err(|err| self.reject(surface, err))
    }

    /// Maximize, fullscreen and minimize requests from the client.
    pub fn toplevel_request(&mut self, surface: SurfaceId, request: ToplevelRequest) -> Result<()> {
        self.require_role(surface, RoleKind::Toplevel, "state request")?;
        self.with_role(surface, |role, ctx| {
            if let Some(toplevel) = role.as_toplevel_mut() {
                toplevel.request(request, ctx);
            }
        })?;
        Ok(())
    }

    /// Compositor-side state change, e.g. from window management.
    pub fn set_toplevel_state(&mut self, surface: SurfaceId, states: ToplevelStates, on: bool) -> Result<()> {
        self.toplevel(surface).ok_or(CompositorError::UnknownSurface(surface))?;
        self.with_role(surface, |role, ctx| {
            if let Some(toplevel) = role.as_toplevel_mut() {
                toplevel.set_state(states, on, ctx);
            }
        })?;
        Ok(())
    }

    /// Suggests a size to the client. Zero lets the client choose.
    pub fn set_toplevel_size(&mut self, surface: SurfaceId, size: Size) -> Result<()> {
        self.toplevel(surface).ok_or(CompositorError::UnknownSurface(surface))?;
        self.with_role(surface, |role, ctx| {
            if let Some(toplevel) = role.as_toplevel_mut() {
                toplevel.set_size(size, ctx);
            }
        })?;
        Ok(())
    }

    /// Raises the toplevel, gives it keyboard focus and moves the activated
    /// state to it.
    pub fn activate_toplevel(&mut self, surface: SurfaceId) -> Result<()> {
        self.toplevel(surface).ok_or(CompositorError::UnknownSurface(surface))?;
        let others: Vec<SurfaceId> = self.windows.iter().copied().filter(|w| *w != surface).collect();
        for other in others {
            self.set_toplevel_state(other, ToplevelStates::ACTIVATED, false)?;
        }
        self.set_toplevel_state(surface, ToplevelStates::ACTIVATED, true)?;
        if let Some(index) = self.windows.iter().position(|w| *w == surface) {
            let window = self.windows.remove(index);
            self.windows.push(window);
            self.refresh_tree(surface);
        }
        self.seat.set_keyboard_focus(Some(surface));
        Ok(())
    }

    /// Window geometry of a toplevel or popup, applied on the next commit.
    pub fn set_window_geometry(&mut self, surface: SurfaceId, geometry: Rectangle) -> Result<()> {
        let result = match self.surfaces.get_mut(surface).ok_or(CompositorError::UnknownSurface(surface))?.role.as_mut() {
            Some(Role::Toplevel(toplevel)) => toplevel.set_window_geometry(surface, geometry),
            Some(Role::Popup(popup)) => popup.set_window_geometry(surface, geometry),
            _ => Err(ProtocolError::NoRole { surface, request: "set_window_geometry" }),
        };
        result.map_err(|err| self.reject(surface, err))
    }

    /// Acknowledges a configure of any configurable role.
    pub fn ack_configure(&mut self, surface: SurfaceId, serial: Serial) -> Result<()> {
        let result = self.with_role(surface, |role, ctx| match role {
            Role::Toplevel(toplevel) => toplevel.ack_configure(serial, ctx),
            Role::Popup(popup) => popup.ack_configure(serial, ctx),
            Role::Layer(layer) => layer.ack_configure(serial, ctx),
            Role::SessionLock(lock) => lock.ack_configure(serial, ctx),
            _ => Err(ProtocolError::NoRole { surface, request: "ack_configure" }),
        })?;
        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(self.reject(surface, err)),
            None => Err(self.reject(surface, ProtocolError::NoRole { surface, request: "ack_configure" })),
        }
    }

    // Popups.

    /// Creates a popup below a toplevel, popup or layer surface. The constraint
    /// area is the output containing the anchor point.
    pub fn get_popup(&mut self, surface: SurfaceId, parent: SurfaceId, positioner: Positioner) -> Result<()> {
        let client = self.client_of(surface)?;
        let parent_kind = self.surfaces.get(parent).ok_or(CompositorError::UnknownSurface(parent))?.role_kind();
        if !matches!(parent_kind, Some(RoleKind::Toplevel | RoleKind::Popup | RoleKind::Layer)) {
            return Err(self.fail_client(client, ProtocolError::InvalidParent { surface }));
        }
        let bounds = self.popup_bounds(parent, &positioner);
        let role = PopupRole::new(parent, positioner, bounds).map_err(|err| self.fail_client(client, err))?;
        self.assign_role(surface, Role::Popup(role))?;
        self.popups.push(surface);
        Ok(())
    }

    /// Output area the popup may occupy, relative to the parent's window geometry.
    fn popup_bounds(&self, parent: SurfaceId, positioner: &Positioner) -> Rectangle {
        let origin = self.surface_origin(parent).unwrap_or_default() + self.window_geometry_origin(parent);
        let anchor = positioner.anchor_rect;
        let anchor_point = origin + Point::new(anchor.x + anchor.width / 2, anchor.y + anchor.height / 2);
        let output = self
            .outputs
            .values()
            .filter(|o| o.is_initialized())
            .find(|o| o.geometry().contains(anchor_point))
            .or_else(|| self.cursor_output().and_then(|id| self.outputs.get(&id)));
        match output {
            Some(output) => output.geometry().translate(-origin.x, -origin.y),
            None => Rectangle::new(i32::MIN / 4, i32::MIN / 4, i32::MAX / 2, i32::MAX / 2),
        }
    }

    pub fn popup(&self, surface: SurfaceId) -> Option<&PopupRole> {
        self.surfaces.get(surface)?.role()?.as_popup()
    }

    /// Requests an explicit grab. A stale serial dismisses the popup.
    pub fn popup_grab(&mut self, surface: SurfaceId, serial: Serial) -> Result<()> {
        self.require_role(surface, RoleKind::Popup, "grab")?;
        let (parent, committed) = match self.popup(surface) {
            Some(popup) => (popup.parent(), popup.has_committed()),
            None => return Err(CompositorError::UnknownSurface(surface)),
        };
        if committed {
            let err = ProtocolError::InvalidPopupGrab { surface, reason: "grab requested after the first commit" };
            return Err(self.reject(surface, err));
        }
        let parent_is_popup = self.popup(parent).is_some();
        if parent_is_popup && self.seat.popup_grab_top() != Some(parent) {
            let err = ProtocolError::InvalidPopupGrab { surface, reason: "parent is not the topmost grabbing popup" };
            return Err(self.reject(surface, err));
        }
        if !self.seat.validate_grab_serial(serial) {
            tracing::debug!(popup = %surface, %serial, "Popup grab with stale serial, dismissing");
            self.dismiss_popup(surface);
            return Ok(());
        }
        if let Some(popup) = self.surfaces.get_mut(surface).and_then(|s| s.role.as_mut()).and_then(Role::as_popup_mut) {
            popup.set_grabbed();
        }
        self.seat.push_popup_grab(surface);
        Ok(())
    }

    pub fn popup_reposition(&mut self, surface: SurfaceId, positioner: Positioner, token: u32) -> Result<Serial> {
        self.require_role(surface, RoleKind::Popup, "reposition")?;
        let parent = self.popup(surface).map(PopupRole::parent).ok_or(CompositorError::UnknownSurface(surface))?;
        let bounds = self.popup_bounds(parent, &positioner);
        let result = self.with_role(surface, |role, ctx| match role.as_popup_mut() {
            Some(popup) => {
                popup.update_bounds(bounds, ctx);
                popup.reposition(positioner, token, ctx)
            }
            None => Err(ProtocolError::NoRole { surface, request: "reposition" }),
        })?;
        match result {
            Some(Ok(serial)) => Ok(serial),
            Some(Err(err)) => Err(self.reject(surface, err)),
            None => Err(CompositorError::UnknownSurface(surface)),
        }
    }

    /// Dismisses a popup together with every popup grabbed after it and every
    /// popup stacked on it.
    pub(crate) fn dismiss_popup(&mut self, surface: SurfaceId) {
        if self.popup(surface).map_or(true, PopupRole::is_dismissed) {
            return;
        }
        let dismissed = self.with_role(surface, |role, ctx| {
            if let Some(popup) = role.as_popup_mut() {
                popup.dismiss(ctx);
            }
        });
        if let Err(err) = dismissed {
            tracing::warn!(popup = %surface, %err, "Could not dismiss popup");
        }
        for above in self.seat.pop_popup_grab(surface) {
            self.dismiss_popup(above);
        }
        self.update_mapped(surface);
        for child in self.popups_of(surface) {
            self.dismiss_popup(child);
        }
    }

    /// Dismisses the whole popup grab chain, e.g. after a click outside of it.
    pub fn dismiss_grabbed_popups(&mut self) {
        if let Some(&bottom) = self.seat.popup_grab().first() {
            self.dismiss_popup(bottom);
        }
    }

    // Layer surfaces.

    pub fn get_layer_surface(
        &mut self,
        surface: SurfaceId,
        output: OutputId,
        layer: Layer,
        namespace: impl Into<String>,
    ) -> Result<()> {
        if !self.outputs.contains_key(&output) {
            return Err(CompositorError::UnknownOutput(output));
        }
        self.assign_role(surface, Role::Layer(LayerRole::new(output, layer, namespace)))
    }

    /// Pending layer state. Changes apply on the next commit.
    pub fn layer_surface_mut(&mut self, surface: SurfaceId) -> Result<&mut LayerRole> {
        self.require_role(surface, RoleKind::Layer, "layer surface request")?;
        self.surfaces
            .get_mut(surface)
            .and_then(|s| s.role.as_mut())
            .and_then(Role::as_layer_mut)
            .ok_or(CompositorError::UnknownSurface(surface))
    }

    pub fn layer_surface(&self, surface: SurfaceId) -> Option<&LayerRole> {
        self.surfaces.get(surface)?.role()?.as_layer()
    }

    /// Moves the exclusive zone of a mapped layer surface to `index` in its
    /// output's priority list and re-arranges the output. A rejected move
    /// leaves the arrangement untouched.
    pub fn reorder_exclusive_zone(&mut self, surface: SurfaceId, index: usize) -> Result<()> {
        let output = self.layer_surface(surface).map(LayerRole::output).ok_or(CompositorError::UnknownSurface(surface))?;
        let target = self.outputs.get_mut(&output).ok_or(CompositorError::UnknownOutput(output))?;
        target.zones.reorder(surface, index)?;
        tracing::debug!(%surface, %output, index, "Reordered exclusive zone");
        self.arrange_output(output);
        Ok(())
    }

    // Session lock.

    pub fn is_locked(&self) -> bool {
        self.session_lock.is_some()
    }

    /// Locks the session for `client`. From now on only lock surfaces and the
    /// cursor are drawn.
    pub fn lock_session(&mut self, client: ClientId) -> Result<()> {
        if self.session_lock.is_some() {
            return Err(self.fail_client(client, ProtocolError::SessionLock("the session is already locked")));
        }
        tracing::info!(%client, "Session locked");
        self.session_lock = Some(SessionLock { client });
        self.seat.set_keyboard_focus(None);
        self.dismiss_grabbed_popups();
        for output in self.outputs.values_mut() {
            output.damage_whole();
        }
        self.events.push(CompositorEvent::SessionLocked { client });
        Ok(())
    }

    pub fn get_lock_surface(&mut self, surface: SurfaceId, output: OutputId) -> Result<()> {
        let client = self.client_of(surface)?;
        if self.session_lock.map(|lock| lock.client) != Some(client) {
            return Err(self.fail_client(client, ProtocolError::SessionLock("client does not hold the lock")));
        }
        let size = self.outputs.get(&output).ok_or(CompositorError::UnknownOutput(output))?.logical_size();
        let taken = self
            .surfaces
            .iter()
            .any(|s| s.role().and_then(Role::as_session_lock).is_some_and(|l| l.output() == output));
        if taken {
            return Err(self.fail_client(client, ProtocolError::SessionLock("output already has a lock surface")));
        }
        self.assign_role(surface, Role::SessionLock(SessionLockRole::new(output)))?;
        self.with_role(surface, |role, ctx| {
            if let Some(lock) = role.as_session_lock_mut() {
                lock.configure(size, ctx);
            }
        })?;
        Ok(())
    }

    pub fn unlock_session(&mut self, client: ClientId) -> Result<()> {
        if self.session_lock.map(|lock| lock.client) != Some(client) {
            return Err(self.fail_client(client, ProtocolError::SessionLock("client does not hold the lock")));
        }
        tracing::info!(%client, "Session unlocked");
        self.session_lock = None;
        let lock_surfaces: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|s| s.role_kind() == Some(RoleKind::SessionLock))
            .map(Surface::id)
            .collect();
        for surface in lock_surfaces {
            if let Some(lock) = self.surfaces.get_mut(surface) {
                lock.take_role();
            }
            self.update_mapped(surface);
        }
        for output in self.outputs.values_mut() {
            output.damage_whole();
        }
        Ok(())
    }

    // Seat-driven interactions.

    /// Returns whether the move grab started.
    pub fn start_move(&mut self, surface: SurfaceId, serial: Serial) -> Result<bool> {
        self.require_role(surface, RoleKind::Toplevel, "move")?;
        Ok(self.seat.start_move(surface, serial))
    }

    /// Returns whether the resize grab started.
    pub fn start_resize(&mut self, surface: SurfaceId, serial: Serial, edges: ResizeEdge) -> Result<bool> {
        self.require_role(surface, RoleKind::Toplevel, "resize")?;
        if !edges.is_valid() {
            return Err(self.reject(surface, ProtocolError::InvalidResizeEdge { surface, edges }));
        }
        let started = self.seat.start_resize(surface, serial, edges);
        if started {
            self.set_toplevel_state(surface, ToplevelStates::RESIZING, true)?;
        }
        Ok(started)
    }

    /// Starts a drag from `origin`. The icon, if any, takes the drag icon role.
    pub fn start_drag(&mut self, origin: SurfaceId, icon: Option<SurfaceId>, serial: Serial) -> Result<bool> {
        if !self.surfaces.contains(origin) {
            return Err(CompositorError::UnknownSurface(origin));
        }
        if let Some(icon) = icon {
            let has_icon_role = self.surfaces.get(icon).and_then(Surface::role_kind) == Some(RoleKind::DragIcon);
            if !has_icon_role {
                self.assign_role(icon, Role::DragIcon(DragIconRole::new()))?;
            }
        }
        let started = self.seat.start_drag(origin, icon, serial);
        if let (true, Some(icon)) = (started, icon) {
            self.refresh_tree(icon);
        }
        Ok(started)
    }

    /// Ends the current grab. A finished resize clears the resizing state.
    pub fn end_grab(&mut self) -> Result<()> {
        match self.seat.end_grab() {
            Some(SeatGrab::Resize { surface, .. }) if self.toplevel(surface).is_some() => {
                self.set_toplevel_state(surface, ToplevelStates::RESIZING, false)
            }
            Some(SeatGrab::Drag(drag)) => {
                if let Some(icon) = drag.icon.filter(|icon| self.surfaces.contains(*icon)) {
                    let rect = self.surfaces.get(icon).and_then(|s| s.global_rect);
                    if let Some(rect) = rect {
                        self.damage_outputs(&Region::from_rect(rect));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
