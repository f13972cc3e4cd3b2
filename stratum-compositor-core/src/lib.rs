//! # Stratum Compositor Core
//!
//! The protocol-independent heart of the Stratum compositor:
//! - Surfaces: double-buffered state, damage, frame callbacks and the commit
//!   protocol, including the synchronized sub-surface cache.
//! - Roles: toplevels, popups, sub-surfaces, layer surfaces, the cursor, drag
//!   icons and session lock surfaces. A surface gets at most one role for its
//!   whole life.
//! - Exclusive zones: arbitration of the space layer surfaces reserve along
//!   output edges.
//! - Outputs: lifecycle, modes, scale and transform, damage accumulation and
//!   the repaint pipeline with optional oversampling, driven either directly or
//!   by one paint thread per output behind a [`GlobalLock`].
//! - The cursor, on a hardware plane where possible and composited otherwise.
//!
//! Everything a client would observe is queued as a [`CompositorEvent`] and
//! drained by the protocol layer with [`Compositor::drain_events`].

pub mod compositor;
pub mod cursor;
pub mod error;
pub mod events;
pub mod exclusive_zone;
pub mod geometry;
pub mod output;
pub mod region;
pub mod role;
pub mod seat;
pub mod shell;
pub mod subcompositor;
pub mod surface;

pub use compositor::Compositor;
pub use cursor::Cursor;
pub use error::{BackendError, CompositorError, ProtocolError, Result};
pub use events::{CallbackId, CompositorEvent};
pub use exclusive_zone::{ExclusiveZoneArbiter, ExclusiveZoneEntry, ExclusiveZones};
pub use geometry::{Point, Rectangle, Size, Transform};
pub use output::{
    GammaTable, GlobalLock, Mode, Output, OutputBackend, OutputConfig, OutputId, OutputState, OutputWorker,
    RepaintOutcome,
};
pub use region::Region;
pub use role::{Role, RoleKind};
pub use seat::{Seat, Serial};
pub use shell::SessionLock;
pub use subcompositor::{SubsurfaceRole, SyncMode};
pub use surface::{Surface, SurfaceId};
