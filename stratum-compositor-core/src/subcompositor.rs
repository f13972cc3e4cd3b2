//! Sub-surfaces.
//!
//! A sub-surface is positioned relative to its parent and stacked among the
//! parent's other children. In synchronized mode its commits are cached and
//! only applied when the parent commits; a sub-surface is effectively
//! synchronized if it or any sub-surface ancestor is synchronized.

use crate::compositor::Compositor;
use crate::error::{CompositorError, ProtocolError, Result};
use crate::geometry::Point;
use crate::role::{CommitReaction, Role, RoleBehavior, RoleContext, RoleKind};
use crate::surface::{CommitGate, CommitOrigin, CommitPreview, Surface, SurfaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Synchronized,
    Desynchronized,
}

#[derive(Debug)]
pub struct SubsurfaceRole {
    parent: SurfaceId,
    sync: SyncMode,
    position: Point,
    /// Applied when the parent commits.
    pending_position: Option<Point>,
}

impl SubsurfaceRole {
    pub fn new(parent: SurfaceId) -> Self {
        Self { parent, sync: SyncMode::default(), position: Point::default(), pending_position: None }
    }

    pub fn parent(&self) -> SurfaceId {
        self.parent
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync
    }

    pub fn is_synced(&self) -> bool {
        self.sync == SyncMode::Synchronized
    }

    /// Position relative to the parent surface origin.
    pub fn position(&self) -> Point {
        self.position
    }

    pub fn pending_position(&self) -> Option<Point> {
        self.pending_position
    }

    pub(crate) fn apply_pending_position(&mut self) -> bool {
        match self.pending_position.take() {
            Some(position) if position != self.position => {
                self.position = position;
                true
            }
            _ => false,
        }
    }
}

impl RoleBehavior for SubsurfaceRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Subsurface
    }

    fn role_position(&self) -> Point {
        self.position
    }

    fn accept_commit(&self, gate: &CommitGate) -> bool {
        if gate.effectively_synced {
            gate.origin == CommitOrigin::Parent
        } else {
            gate.origin == CommitOrigin::Itself
        }
    }

    fn on_commit(&mut self, _ctx: &mut RoleContext<'_>, _preview: &CommitPreview) -> CommitReaction {
        CommitReaction::empty()
    }
}

impl Compositor {
    /// Gives `surface` the sub-surface role below `parent`. The new child is
    /// placed on top of its siblings immediately.
    pub fn get_subsurface(&mut self, surface: SurfaceId, parent: SurfaceId) -> Result<()> {
        let client = self.client_of(surface)?;
        if !self.surfaces.contains(parent) {
            return Err(CompositorError::UnknownSurface(parent));
        }
        if surface == parent || self.is_ancestor(surface, parent) {
            return Err(self.fail_client(client, ProtocolError::BadSubsurfaceParent { surface, parent }));
        }
        self.assign_role(surface, Role::Subsurface(SubsurfaceRole::new(parent)))?;
        if let Some(child) = self.surfaces.get_mut(surface) {
            child.parent = Some(parent);
        }
        if let Some(parent) = self.surfaces.get_mut(parent) {
            parent.add_child(surface);
        }
        tracing::debug!(%surface, %parent, "Created sub-surface");
        Ok(())
    }

    /// Whether `ancestor` is `surface` itself or one of its parents.
    fn is_ancestor(&self, ancestor: SurfaceId, surface: SurfaceId) -> bool {
        let mut current = Some(surface);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.surfaces.get(id).and_then(Surface::parent);
        }
        false
    }

    fn subsurface_mut(&mut self, surface: SurfaceId, request: &'static str) -> Result<&mut SubsurfaceRole> {
        let client = self.client_of(surface)?;
        let is_subsurface = self.surfaces.get(surface).and_then(Surface::role_kind) == Some(RoleKind::Subsurface);
        if !is_subsurface {
            return Err(self.fail_client(client, ProtocolError::NoRole { surface, request }));
        }
        self.surfaces
            .get_mut(surface)
            .and_then(|s| s.role.as_mut())
            .and_then(Role::as_subsurface_mut)
            .ok_or(CompositorError::UnknownSurface(surface))
    }

    /// Moves every child of `parent` to the position it requested since the
    /// parent's last commit.
    pub(crate) fn apply_child_positions(&mut self, parent: SurfaceId) {
        let children: Vec<SurfaceId> = self.surfaces.get(parent).map(|s| s.children().collect()).unwrap_or_default();
        for child in children {
            let moved = self
                .surfaces
                .get_mut(child)
                .and_then(|s| s.role.as_mut())
                .and_then(Role::as_subsurface_mut)
                .is_some_and(SubsurfaceRole::apply_pending_position);
            if moved {
                tracing::trace!(surface = %child, %parent, "Applied sub-surface position");
            }
        }
    }

    /// Takes effect on the parent's next commit.
    pub fn subsurface_set_position(&mut self, surface: SurfaceId, x: i32, y: i32) -> Result<()> {
        self.subsurface_mut(surface, "set_position")?.pending_position = Some(Point::new(x, y));
        Ok(())
    }

    pub fn place_above(&mut self, surface: SurfaceId, sibling: SurfaceId) -> Result<()> {
        self.restack(surface, sibling, true)
    }

    pub fn place_below(&mut self, surface: SurfaceId, sibling: SurfaceId) -> Result<()> {
        self.restack(surface, sibling, false)
    }

    /// Moves `surface` next to `sibling` in the parent's pending stacking order.
    fn restack(&mut self, surface: SurfaceId, sibling: SurfaceId, above: bool) -> Result<()> {
        let request = if above { "place_above" } else { "place_below" };
        let parent = self.subsurface_mut(surface, request)?.parent();
        let sibling_parent = self.surfaces.get(sibling).and_then(Surface::role).and_then(Role::as_subsurface).map(SubsurfaceRole::parent);
        if sibling == surface || (sibling != parent && sibling_parent != Some(parent)) {
            let client = self.client_of(surface)?;
            return Err(self.fail_client(client, ProtocolError::BadSibling { surface, sibling }));
        }
        let parent_surface = self.surfaces.get_mut(parent).ok_or(CompositorError::UnknownSurface(parent))?;
        let stacking = parent_surface.pending_stacking_mut();
        stacking.retain(|id| *id != surface);
        let index = stacking.iter().position(|id| *id == sibling).unwrap_or(stacking.len());
        stacking.insert(if above { index + 1 } else { index }, surface);
        Ok(())
    }

    pub fn set_sync(&mut self, surface: SurfaceId) -> Result<()> {
        self.subsurface_mut(surface, "set_sync")?.sync = SyncMode::Synchronized;
        Ok(())
    }

    /// Switching to desynchronized applies any cached state of the surface and
    /// of descendants that are no longer effectively synchronized.
    pub fn set_desync(&mut self, surface: SurfaceId) -> Result<()> {
        self.subsurface_mut(surface, "set_desync")?.sync = SyncMode::Desynchronized;
        self.flush_desynced(surface)
    }

    fn flush_desynced(&mut self, surface: SurfaceId) -> Result<()> {
        if self.is_effectively_synced(surface) {
            return Ok(());
        }
        if self.surfaces.get(surface).is_some_and(Surface::has_cached_state) {
            tracing::trace!(%surface, "Applying cached state after desync");
            self.request_commit(surface, CommitOrigin::Itself)?;
        }
        let children: Vec<SurfaceId> = self.surfaces.get(surface).map(|s| s.children().collect()).unwrap_or_default();
        for child in children {
            self.flush_desynced(child)?;
        }
        Ok(())
    }

    pub fn is_effectively_synced(&self, surface: SurfaceId) -> bool {
        let mut current = surface;
        loop {
            match self.surfaces.get(current).and_then(Surface::role).and_then(Role::as_subsurface) {
                Some(sub) if sub.is_synced() => return true,
                Some(sub) => current = sub.parent(),
                None => return false,
            }
        }
    }
}
