//! The surface half of the commit protocol.
//!
//! A commit first folds the pending state into the surface's cached state
//! ([`Surface::stage_pending`]). If the role accepts the commit, the cached state
//! is validated and becomes current in one step ([`Surface::apply_staged`]).
//! Otherwise it stays cached until the parent commits and re-requests the
//! commit with [`CommitOrigin::Parent`].
//!
//! The compositor drives the parts that reach beyond one surface: buffer
//! reference counting, role reactions, mapping and child propagation.

use std::sync::Arc;

use stratum_buffer_manager::BufferDetails;

use crate::error::ProtocolError;
use crate::geometry::{Point, Size, Transform};

use super::{BufferAssignment, Surface};

/// Who asked for a commit to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOrigin {
    /// The client committed this surface.
    Itself,
    /// A parent applied its own commit and propagates to a synced child.
    Parent,
}

/// Input of a role's commit acceptance decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitGate {
    pub origin: CommitOrigin,
    /// The surface, or any sub-surface ancestor, is in synchronized mode.
    pub effectively_synced: bool,
}

/// The surface state a staged commit would produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPreview {
    pub has_buffer: bool,
    pub buffer_size: Option<Size>,
    pub scale: i32,
    pub transform: Transform,
    /// Logical size after the commit.
    pub surface_size: Size,
    /// Sum of all buffer offsets, including the staged one.
    pub buffer_offset: Point,
}

/// Result of applying a staged commit.
#[derive(Debug, Default)]
pub(crate) struct AppliedCommit {
    /// Buffer that stopped being current; its reference must be dropped.
    pub replaced_buffer: Option<Arc<BufferDetails>>,
    /// Buffer that became current; a reference must be taken.
    pub attached_buffer: Option<Arc<BufferDetails>>,
    pub size_changed: bool,
    pub stacking_changed: bool,
}

impl Surface {
    /// Moves the pending state into the cached state, merging with any commit
    /// that is already waiting there.
    pub(crate) fn stage_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        match self.cached.as_mut() {
            Some(cached) => cached.merge_from(pending),
            None => self.cached = Some(pending),
        }
    }

    pub(crate) fn preview(&self) -> CommitPreview {
        let staged = self.cached.as_ref();
        let buffer_size = match staged.and_then(|s| s.buffer.as_ref()) {
            Some(BufferAssignment::Attach(buffer)) => {
                Some(Size::new(buffer.width as i32, buffer.height as i32))
            }
            Some(BufferAssignment::Detach) => None,
            None => self.current.buffer_size(),
        };
        let scale = staged.and_then(|s| s.scale).unwrap_or(self.current.scale);
        let transform = staged.and_then(|s| s.transform).unwrap_or(self.current.transform);
        let staged_offset = staged.and_then(|s| s.offset).unwrap_or_default();
        CommitPreview {
            has_buffer: buffer_size.is_some(),
            buffer_size,
            scale,
            transform,
            surface_size: super::logical_size(buffer_size, scale, transform),
            buffer_offset: self.current.buffer_offset + staged_offset,
        }
    }

    /// Checks the staged state against surface-level rules.
    pub(crate) fn validate_staged(&self, preview: &CommitPreview) -> Result<(), ProtocolError> {
        if let Some(size) = preview.buffer_size {
            let oriented = preview.transform.transform_size(size);
            if oriented.checked_div_exact(preview.scale).is_none() {
                return Err(ProtocolError::BufferSizeNotDivisible {
                    surface: self.id,
                    size,
                    scale: preview.scale,
                });
            }
        }
        Ok(())
    }

    /// Makes the staged state current. Returns `None` when nothing was staged.
    ///
    /// Damage is merged into the visible damage rather than replacing it.
    pub(crate) fn apply_staged(&mut self, sequence: u64) -> Option<AppliedCommit> {
        let staged = self.cached.take()?;
        let mut applied = AppliedCommit::default();
        let old_size = self.current.logical_size();

        match staged.buffer {
            Some(BufferAssignment::Attach(buffer)) => {
                let same = self.current.buffer.as_ref().is_some_and(|b| b.id == buffer.id);
                if !same {
                    applied.attached_buffer = Some(buffer.clone());
                    applied.replaced_buffer = self.current.buffer.replace(buffer);
                }
            }
            Some(BufferAssignment::Detach) => {
                applied.replaced_buffer = self.current.buffer.take();
            }
            None => {}
        }
        if let Some(offset) = staged.offset {
            self.current.buffer_offset = self.current.buffer_offset + offset;
        }
        if let Some(input) = staged.input_region {
            self.current.input_region = input;
        }
        if let Some(opaque) = staged.opaque_region {
            self.current.opaque_region = opaque;
        }
        if let Some(scale) = staged.scale {
            self.current.scale = scale;
        }
        if let Some(transform) = staged.transform {
            self.current.transform = transform;
        }
        self.current.frame_callbacks.extend(staged.frame_callbacks);

        let new_size = self.current.logical_size();
        applied.size_changed = new_size != old_size;
        self.damage.merge_commit(
            &staged.surface_damage,
            &staged.buffer_damage,
            self.current.scale,
            self.current.transform,
            self.current.buffer_size(),
        );
        if applied.size_changed {
            self.damage.add_full(new_size);
        }

        if let Some(stacking) = self.pending_stacking.take() {
            applied.stacking_changed = stacking != self.stacking;
            self.stacking = stacking;
        }
        self.commit_sequence = sequence;
        Some(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rectangle;
    use crate::surface::SurfaceId;
    use pretty_assertions::assert_eq;
    use stratum_buffer_manager::{BufferFormat, BufferManager, BufferType, ClientId};

    fn setup() -> (Surface, BufferManager) {
        let client = ClientId::new(1);
        (Surface::new(SurfaceId::new(0, 1), client, 64), BufferManager::new())
    }

    fn buffer(manager: &mut BufferManager, w: u32, h: u32) -> Arc<BufferDetails> {
        manager
            .register_buffer(BufferType::Shm, w, h, w * 4, BufferFormat::Argb8888, ClientId::new(1))
            .unwrap()
    }

    #[test]
    fn test_pending_changes_do_not_touch_current() {
        let (mut surface, mut manager) = setup();
        surface.pending.buffer = Some(BufferAssignment::Attach(buffer(&mut manager, 64, 64)));
        surface.pending.scale = Some(2);
        surface.pending.offset = Some(Point::new(3, 3));
        assert!(surface.current().buffer.is_none());
        assert_eq!(surface.current().scale, 1);
        assert_eq!(surface.current().buffer_offset, Point::default());
    }

    #[test]
    fn test_stage_then_apply() {
        let (mut surface, mut manager) = setup();
        let first = buffer(&mut manager, 64, 64);
        surface.pending.buffer = Some(BufferAssignment::Attach(first.clone()));
        surface.pending.scale = Some(2);
        surface.stage_pending();
        assert!(surface.pending().is_empty());
        assert!(surface.has_cached_state());

        let preview = surface.preview();
        assert_eq!(preview.surface_size, Size::new(32, 32));
        surface.validate_staged(&preview).unwrap();

        let applied = surface.apply_staged(7).unwrap();
        assert_eq!(applied.attached_buffer.map(|b| b.id), Some(first.id));
        assert!(applied.replaced_buffer.is_none());
        assert!(applied.size_changed);
        assert_eq!(surface.size(), Size::new(32, 32));
        assert_eq!(surface.commit_sequence(), 7);
        assert_eq!(surface.damage().extents(), Rectangle::new(0, 0, 32, 32));
        assert!(surface.apply_staged(8).is_none());
    }

    #[test]
    fn test_replacing_buffer_reports_old_one() {
        let (mut surface, mut manager) = setup();
        let first = buffer(&mut manager, 10, 10);
        let second = buffer(&mut manager, 10, 10);
        surface.pending.buffer = Some(BufferAssignment::Attach(first.clone()));
        surface.stage_pending();
        surface.apply_staged(1);
        surface.damage.clear();

        surface.pending.buffer = Some(BufferAssignment::Attach(second.clone()));
        surface.pending.surface_damage.push(Rectangle::new(0, 0, 2, 2));
        surface.stage_pending();
        let applied = surface.apply_staged(2).unwrap();
        assert_eq!(applied.replaced_buffer.map(|b| b.id), Some(first.id));
        assert!(!applied.size_changed);
        assert_eq!(surface.damage().extents(), Rectangle::new(0, 0, 2, 2));
    }

    #[test]
    fn test_scale_must_divide_buffer_size() {
        let (mut surface, mut manager) = setup();
        surface.pending.buffer = Some(BufferAssignment::Attach(buffer(&mut manager, 15, 10)));
        surface.pending.scale = Some(2);
        surface.stage_pending();
        let preview = surface.preview();
        assert!(matches!(
            surface.validate_staged(&preview),
            Err(ProtocolError::BufferSizeNotDivisible { scale: 2, .. })
        ));
    }

    #[test]
    fn test_repeated_staging_merges() {
        let (mut surface, _manager) = setup();
        surface.pending.offset = Some(Point::new(1, 0));
        surface.stage_pending();
        surface.pending.offset = Some(Point::new(0, 2));
        surface.pending.transform = Some(Transform::Flipped);
        surface.stage_pending();
        surface.apply_staged(1);
        assert_eq!(surface.current().buffer_offset, Point::new(1, 2));
        assert_eq!(surface.current().transform, Transform::Flipped);
    }
}
