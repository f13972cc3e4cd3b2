//! Surfaces: the addressable entities clients draw into.
//!
//! Every double-buffered attribute exists twice. Request handlers only touch the
//! [`PendingState`]; the commit step moves it into the [`SurfaceAttributes`] that
//! rendering reads. A synced sub-surface parks its commits in a cached copy until
//! its parent commits (see [`commit`]).
//!
//! Surfaces live in a [`SurfaceRegistry`] and refer to each other through
//! [`SurfaceId`] handles, never through pointers.

pub mod commit;
pub mod damage;
pub mod registry;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use stratum_buffer_manager::{BufferDetails, ClientId};

use crate::events::CallbackId;
use crate::geometry::{Point, Rectangle, Size, Transform};
use crate::output::OutputId;
use crate::region::Region;
use crate::role::{Role, RoleKind};

pub use commit::{CommitGate, CommitOrigin, CommitPreview};
pub use damage::DamageTracker;
pub use registry::SurfaceRegistry;

/// Generational handle of a surface. A handle of a destroyed surface never
/// resolves again, even after its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId {
    index: u32,
    generation: u32,
}

impl SurfaceId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}.{}", self.index, self.generation)
    }
}

/// A change of the attached buffer recorded by `attach`.
#[derive(Debug, Clone)]
pub enum BufferAssignment {
    Attach(Arc<BufferDetails>),
    Detach,
}

/// Committed state, read by roles and the repaint pipeline.
#[derive(Debug, Clone)]
pub struct SurfaceAttributes {
    pub buffer: Option<Arc<BufferDetails>>,
    /// Sum of all committed buffer offsets.
    pub buffer_offset: Point,
    /// `None` accepts input everywhere on the surface.
    pub input_region: Option<Region>,
    pub opaque_region: Region,
    pub scale: i32,
    pub transform: Transform,
    pub frame_callbacks: Vec<CallbackId>,
}

impl Default for SurfaceAttributes {
    fn default() -> Self {
        Self {
            buffer: None,
            buffer_offset: Point::default(),
            input_region: None,
            opaque_region: Region::new(),
            scale: 1,
            transform: Transform::Normal,
            frame_callbacks: Vec::new(),
        }
    }
}

impl SurfaceAttributes {
    pub fn buffer_size(&self) -> Option<Size> {
        self.buffer
            .as_ref()
            .map(|b| Size::new(b.width as i32, b.height as i32))
    }

    /// Size in surface-local coordinates: buffer size after transform and scale.
    pub fn logical_size(&self) -> Size {
        logical_size(self.buffer_size(), self.scale, self.transform)
    }
}

pub(crate) fn logical_size(buffer_size: Option<Size>, scale: i32, transform: Transform) -> Size {
    match buffer_size {
        Some(size) => {
            let size = transform.transform_size(size);
            let scale = scale.max(1);
            Size::new(size.width / scale, size.height / scale)
        }
        None => Size::default(),
    }
}

/// Uncommitted changes. Fields left `None` keep their current value on commit.
#[derive(Debug, Clone, Default)]
pub struct PendingState {
    pub(crate) buffer: Option<BufferAssignment>,
    pub(crate) offset: Option<Point>,
    pub(crate) surface_damage: Vec<Rectangle>,
    pub(crate) buffer_damage: Vec<Rectangle>,
    pub(crate) input_region: Option<Option<Region>>,
    pub(crate) opaque_region: Option<Region>,
    pub(crate) scale: Option<i32>,
    pub(crate) transform: Option<Transform>,
    pub(crate) frame_callbacks: Vec<CallbackId>,
}

impl PendingState {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_none()
            && self.offset.is_none()
            && self.surface_damage.is_empty()
            && self.buffer_damage.is_empty()
            && self.input_region.is_none()
            && self.opaque_region.is_none()
            && self.scale.is_none()
            && self.transform.is_none()
            && self.frame_callbacks.is_empty()
    }

    pub fn buffer(&self) -> Option<&BufferAssignment> {
        self.buffer.as_ref()
    }

    pub fn scale(&self) -> Option<i32> {
        self.scale
    }

    /// Folds a newer pending state on top of this one. Later values win;
    /// damage and frame callbacks accumulate, offsets add up.
    pub(crate) fn merge_from(&mut self, newer: PendingState) {
        if newer.buffer.is_some() {
            self.buffer = newer.buffer;
        }
        if let Some(offset) = newer.offset {
            self.offset = Some(self.offset.unwrap_or_default() + offset);
        }
        self.surface_damage.extend(newer.surface_damage);
        self.buffer_damage.extend(newer.buffer_damage);
        if newer.input_region.is_some() {
            self.input_region = newer.input_region;
        }
        if newer.opaque_region.is_some() {
            self.opaque_region = newer.opaque_region;
        }
        if newer.scale.is_some() {
            self.scale = newer.scale;
        }
        if newer.transform.is_some() {
            self.transform = newer.transform;
        }
        self.frame_callbacks.extend(newer.frame_callbacks);
    }
}

/// A surface record owned by the [`SurfaceRegistry`].
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    client: ClientId,
    pub(crate) pending: PendingState,
    pub(crate) cached: Option<PendingState>,
    pub(crate) current: SurfaceAttributes,
    pub(crate) damage: DamageTracker,
    pub(crate) role: Option<Role>,
    pub(crate) previous_role: Option<RoleKind>,
    pub(crate) parent: Option<SurfaceId>,
    /// Sub-surface stacking from bottom to top. Contains the surface itself
    /// as the pivot between the children below and above it.
    pub(crate) stacking: Vec<SurfaceId>,
    pub(crate) pending_stacking: Option<Vec<SurfaceId>>,
    pub(crate) mapped: bool,
    pub(crate) outputs: BTreeSet<OutputId>,
    /// Global rectangle while mapped, used to damage the old area on moves.
    pub(crate) global_rect: Option<Rectangle>,
    pub(crate) commit_sequence: u64,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId, client: ClientId, max_damage_rects: usize) -> Self {
        Self {
            id,
            client,
            pending: PendingState::default(),
            cached: None,
            current: SurfaceAttributes::default(),
            damage: DamageTracker::new(max_damage_rects),
            role: None,
            previous_role: None,
            parent: None,
            stacking: vec![id],
            pending_stacking: None,
            mapped: false,
            outputs: BTreeSet::new(),
            global_rect: None,
            commit_sequence: 0,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn current(&self) -> &SurfaceAttributes {
        &self.current
    }

    pub fn pending(&self) -> &PendingState {
        &self.pending
    }

    /// Whether a synced commit is waiting for the parent.
    pub fn has_cached_state(&self) -> bool {
        self.cached.is_some()
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref()
    }

    pub fn role_kind(&self) -> Option<RoleKind> {
        self.role.as_ref().map(Role::kind)
    }

    pub fn parent(&self) -> Option<SurfaceId> {
        self.parent
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn outputs(&self) -> &BTreeSet<OutputId> {
        &self.outputs
    }

    pub fn size(&self) -> Size {
        self.current.logical_size()
    }

    /// Position of the last applied commit in the compositor-wide commit order.
    pub fn commit_sequence(&self) -> u64 {
        self.commit_sequence
    }

    /// Visible damage accumulated since it was last propagated to outputs.
    pub fn damage(&self) -> &Region {
        self.damage.region()
    }

    pub fn children_below(&self) -> &[SurfaceId] {
        let pivot = self.stacking_pivot();
        &self.stacking[..pivot]
    }

    pub fn children_above(&self) -> &[SurfaceId] {
        let pivot = self.stacking_pivot();
        &self.stacking[pivot + 1..]
    }

    /// All direct sub-surface children, bottom to top.
    pub fn children(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.stacking.iter().copied().filter(move |id| *id != self.id)
    }

    fn stacking_pivot(&self) -> usize {
        self.stacking.iter().position(|id| *id == self.id).unwrap_or(0)
    }

    /// Stacking order that the next commit will apply.
    pub(crate) fn pending_stacking_mut(&mut self) -> &mut Vec<SurfaceId> {
        let current = &self.stacking;
        self.pending_stacking.get_or_insert_with(|| current.clone())
    }

    /// Adds a new sub-surface child on top of the stack, effective immediately.
    pub(crate) fn add_child(&mut self, child: SurfaceId) {
        self.stacking.push(child);
        if let Some(pending) = self.pending_stacking.as_mut() {
            pending.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: SurfaceId) {
        self.stacking.retain(|id| *id != child);
        if let Some(pending) = self.pending_stacking.as_mut() {
            pending.retain(|id| *id != child);
        }
    }

    /// Installs a role. Callers check for an existing role first.
    pub(crate) fn set_role(&mut self, role: Role) {
        debug_assert!(self.role.is_none(), "{} already has a role", self.id);
        if self.role.is_some() {
            tracing::error!(surface = %self.id, "Refusing to replace an attached role");
            return;
        }
        self.previous_role = Some(role.kind());
        self.role = Some(role);
    }

    pub(crate) fn take_role(&mut self) -> Option<Role> {
        self.role.take()
    }
}
