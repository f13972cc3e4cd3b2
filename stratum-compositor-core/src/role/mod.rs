//! Roles give a surface its behavior.
//!
//! A [`Role`] is a tagged union over the role payloads. Every payload implements
//! [`RoleBehavior`], which answers the three questions the commit protocol asks:
//! where the surface sits ([`RoleBehavior::role_position`]), whether a commit may
//! be applied now ([`RoleBehavior::accept_commit`]), and what happens once it
//! was ([`RoleBehavior::on_commit`]).

pub mod cursor;
pub mod layer;
pub mod popup;
pub mod session_lock;
pub mod toplevel;

use std::fmt;

use bitflags::bitflags;
use stratum_buffer_manager::ClientId;

use crate::error::ProtocolError;
use crate::events::EventQueue;
use crate::geometry::Point;
use crate::output::OutputId;
use crate::seat::SerialCounter;
use crate::subcompositor::SubsurfaceRole;
use crate::surface::{CommitGate, CommitOrigin, CommitPreview, SurfaceId};

pub use cursor::{CursorRole, DragIconRole};
pub use layer::LayerRole;
pub use popup::PopupRole;
pub use session_lock::SessionLockRole;
pub use toplevel::ToplevelRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Toplevel,
    Popup,
    Subsurface,
    Layer,
    Cursor,
    DragIcon,
    SessionLock,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleKind::Toplevel => "toplevel",
            RoleKind::Popup => "popup",
            RoleKind::Subsurface => "subsurface",
            RoleKind::Layer => "layer",
            RoleKind::Cursor => "cursor",
            RoleKind::DragIcon => "drag icon",
            RoleKind::SessionLock => "session lock",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Follow-up work a role asks the compositor to do after a commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommitReaction: u32 {
        /// Anchors, margins, size or exclusive zone changed; re-arrange the output.
        const ARRANGE = 1;
        /// The role position relative to the parent changed.
        const GEOMETRY = 1 << 1;
        /// The cursor image must be refreshed.
        const CURSOR_IMAGE = 1 << 2;
        /// The role lost its buffer and reset itself to its initial state.
        const RESET = 1 << 3;
    }
}

/// What a role may use while reacting to requests or commits.
pub struct RoleContext<'a> {
    pub surface: SurfaceId,
    pub client: ClientId,
    pub serials: &'a mut SerialCounter,
    pub events: &'a mut EventQueue,
}

pub trait RoleBehavior {
    fn kind(&self) -> RoleKind;

    /// Position of the surface origin relative to whatever the role anchors
    /// to: the parent surface, the cursor hotspot, an output or the global space.
    fn role_position(&self) -> Point;

    /// Default roles only apply their own commits.
    fn accept_commit(&self, gate: &CommitGate) -> bool {
        gate.origin == CommitOrigin::Itself
    }

    /// Rejects a commit before anything is applied.
    fn check_commit(&self, _surface: SurfaceId, _preview: &CommitPreview) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Role-specific mapping condition on top of having a buffer.
    fn can_map(&self) -> bool {
        true
    }

    /// Applies role state after the surface state became current.
    fn on_commit(&mut self, ctx: &mut RoleContext<'_>, preview: &CommitPreview) -> CommitReaction;

    /// Output the role is bound to, if any. Such surfaces are only mapped while
    /// that output is initialized.
    fn exclusive_output(&self) -> Option<OutputId> {
        None
    }
}

#[derive(Debug)]
pub enum Role {
    Toplevel(ToplevelRole),
    Popup(PopupRole),
    Subsurface(SubsurfaceRole),
    Layer(LayerRole),
    Cursor(CursorRole),
    DragIcon(DragIconRole),
    SessionLock(SessionLockRole),
}

macro_rules! role_accessors {
    ($($variant:ident => $as_ref:ident, $as_mut:ident, $ty:ty;)*) => {
        impl Role {
            $(
                pub fn $as_ref(&self) -> Option<&$ty> {
                    match self {
                        Role::$variant(role) => Some(role),
                        _ => None,
                    }
                }

                pub fn $as_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        Role::$variant(role) => Some(role),
                        _ => None,
                    }
                }
            )*
        }
    };
}

role_accessors! {
    Toplevel => as_toplevel, as_toplevel_mut, ToplevelRole;
    Popup => as_popup, as_popup_mut, PopupRole;
    Subsurface => as_subsurface, as_subsurface_mut, SubsurfaceRole;
    Layer => as_layer, as_layer_mut, LayerRole;
    Cursor => as_cursor, as_cursor_mut, CursorRole;
    DragIcon => as_drag_icon, as_drag_icon_mut, DragIconRole;
    SessionLock => as_session_lock, as_session_lock_mut, SessionLockRole;
}

impl Role {
    pub fn behavior(&self) -> &dyn RoleBehavior {
        match self {
            Role::Toplevel(role) => role,
            Role::Popup(role) => role,
            Role::Subsurface(role) => role,
            Role::Layer(role) => role,
            Role::Cursor(role) => role,
            Role::DragIcon(role) => role,
            Role::SessionLock(role) => role,
        }
    }

    pub fn behavior_mut(&mut self) -> &mut dyn RoleBehavior {
        match self {
            Role::Toplevel(role) => role,
            Role::Popup(role) => role,
            Role::Subsurface(role) => role,
            Role::Layer(role) => role,
            Role::Cursor(role) => role,
            Role::DragIcon(role) => role,
            Role::SessionLock(role) => role,
        }
    }

    pub fn kind(&self) -> RoleKind {
        self.behavior().kind()
    }
}
