//! Error types of the compositor core.
//!
//! - [`ProtocolError`]: a client sent a request that is invalid in the current
//!   state. The offending client is disconnected; nothing else is affected.
//! - [`BackendError`]: the output backend could not satisfy a request. Most of
//!   these degrade gracefully (software cursor, direct-scale rendering).
//! - [`CompositorError`]: everything a caller of the core can observe.

use stratum_buffer_manager::BufferError;
use thiserror::Error;

use crate::exclusive_zone::ExclusiveZoneError;
use crate::geometry::Size;
use crate::output::{Mode, OutputId, OutputState};
use crate::role::toplevel::ResizeEdge;
use crate::role::RoleKind;
use crate::seat::Serial;
use crate::surface::SurfaceId;

/// A request that violates the protocol state of its object.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("{surface} already has the {existing} role")]
    RoleAlreadyAssigned { surface: SurfaceId, existing: RoleKind },

    #[error("{surface} had the {previous} role and cannot become a {requested}")]
    RoleMismatch { surface: SurfaceId, previous: RoleKind, requested: RoleKind },

    #[error("{surface} has no role that accepts '{request}'")]
    NoRole { surface: SurfaceId, request: &'static str },

    #[error("{surface} acknowledged serial {serial} which was never sent or is stale")]
    InvalidSerial { surface: SurfaceId, serial: Serial },

    #[error("{surface} attached a buffer before acknowledging its first configure")]
    UnconfiguredBuffer { surface: SurfaceId },

    #[error("{surface} attached with a non-zero offset ({dx}, {dy}); use the offset request")]
    InvalidOffset { surface: SurfaceId, dx: i32, dy: i32 },

    #[error("buffer scale {scale} must be positive")]
    InvalidScale { scale: i32 },

    #[error("{surface}: buffer size {size} is not divisible by scale {scale}")]
    BufferSizeNotDivisible { surface: SurfaceId, size: Size, scale: i32 },

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("{surface}: invalid window geometry {width}x{height}")]
    InvalidGeometry { surface: SurfaceId, width: i32, height: i32 },

    #[error("{surface}: invalid size bounds (min {min}, max {max})")]
    InvalidSizeBounds { surface: SurfaceId, min: Size, max: Size },

    #[error("{surface}: parent would create a cycle")]
    InvalidParent { surface: SurfaceId },

    #[error("invalid positioner: {0}")]
    InvalidPositioner(String),

    #[error("{surface}: {reason}")]
    InvalidPopupGrab { surface: SurfaceId, reason: &'static str },

    #[error("{surface} cannot be a sub-surface of {parent}")]
    BadSubsurfaceParent { surface: SurfaceId, parent: SurfaceId },

    #[error("{sibling} is neither a sibling nor the parent of {surface}")]
    BadSibling { surface: SurfaceId, sibling: SurfaceId },

    #[error("{surface}: a zero {axis} requires anchoring both opposite edges")]
    InvalidLayerSize { surface: SurfaceId, axis: &'static str },

    #[error("{surface}: exclusive edge must be one of the anchored edges")]
    InvalidExclusiveEdge { surface: SurfaceId },

    #[error("{surface}: buffer size {got} does not match configured size {expected}")]
    DimensionsMismatch { surface: SurfaceId, expected: Size, got: Size },

    #[error("session lock: {0}")]
    SessionLock(&'static str),

    #[error("{surface}: resize edges {edges:?} are empty or opposite")]
    InvalidResizeEdge { surface: SurfaceId, edges: ResizeEdge },
}

impl ProtocolError {
    /// Stable numeric code sent alongside the reason when the client is disconnected.
    pub fn code(&self) -> u32 {
        match self {
            ProtocolError::RoleAlreadyAssigned { .. } => 1,
            ProtocolError::RoleMismatch { .. } => 2,
            ProtocolError::NoRole { .. } => 3,
            ProtocolError::InvalidSerial { .. } => 4,
            ProtocolError::UnconfiguredBuffer { .. } => 5,
            ProtocolError::InvalidOffset { .. } => 6,
            ProtocolError::InvalidScale { .. } => 7,
            ProtocolError::BufferSizeNotDivisible { .. } => 8,
            ProtocolError::Buffer(_) => 9,
            ProtocolError::InvalidGeometry { .. } => 10,
            ProtocolError::InvalidSizeBounds { .. } => 11,
            ProtocolError::InvalidParent { .. } => 12,
            ProtocolError::InvalidPositioner(_) => 13,
            ProtocolError::InvalidPopupGrab { .. } => 14,
            ProtocolError::BadSubsurfaceParent { .. } => 15,
            ProtocolError::BadSibling { .. } => 16,
            ProtocolError::InvalidLayerSize { .. } => 17,
            ProtocolError::InvalidExclusiveEdge { .. } => 18,
            ProtocolError::DimensionsMismatch { .. } => 19,
            ProtocolError::SessionLock(_) => 20,
            ProtocolError::InvalidResizeEdge { .. } => 21,
        }
    }
}

/// Failures reported by an output backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("no hardware cursor plane available")]
    NoCursorPlane,

    #[error("out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("mode {0} is not supported by this output")]
    UnsupportedMode(Mode),

    #[error("gamma table has {got} entries per channel, expected {expected}")]
    InvalidGammaSize { expected: usize, got: usize },

    #[error("presentation failed: {0}")]
    PresentFailed(String),

    #[error("device error: {0}")]
    Device(String),
}

/// Errors returned by compositor operations.
#[derive(Debug, Error)]
pub enum CompositorError {
    /// The client has been disconnected because of this violation.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The surface was destroyed or never existed.
    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),

    #[error("unknown output {0}")]
    UnknownOutput(OutputId),

    /// Mode changes block until a paint thread acknowledges them, so they may not
    /// be requested from a paint thread.
    #[error("mode change for {output} requested from a paint thread")]
    ModeChangeFromPaintThread { output: OutputId },

    #[error("{operation} is not allowed while {output} is {state:?}")]
    InvalidOutputState { output: OutputId, state: OutputState, operation: &'static str },

    #[error("exclusive zone: {0}")]
    ExclusiveZone(#[from] ExclusiveZoneError),

    #[error("failed to spawn paint thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_buffer_manager::{BufferFormat, BufferId, BufferManager, BufferType, ClientId};

    #[test]
    fn test_protocol_error_codes_are_distinct() {
        let surface = SurfaceId::new(3, 1);
        let errors = [
            ProtocolError::NoRole { surface, request: "set_window_geometry" },
            ProtocolError::InvalidScale { scale: 0 },
            ProtocolError::SessionLock("already locked"),
            ProtocolError::InvalidPositioner("zero size".into()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(ProtocolError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_protocol_error_wraps_into_compositor_error() {
        let err: CompositorError = ProtocolError::InvalidScale { scale: -1 }.into();
        assert_eq!(err.to_string(), "protocol error: buffer scale -1 must be positive");
    }

    #[test]
    fn test_buffer_error_becomes_protocol_error() {
        let buffer_err = BufferError::UnknownBuffer(unknown_buffer_id());
        let err: ProtocolError = buffer_err.clone().into();
        assert_eq!(err, ProtocolError::Buffer(buffer_err));
        assert_eq!(err.code(), 9);
    }

    fn unknown_buffer_id() -> BufferId {
        let mut manager = BufferManager::new();
        manager
            .register_buffer(BufferType::Shm, 1, 1, 4, BufferFormat::Argb8888, ClientId::new(99))
            .map(|b| b.id)
            .unwrap()
    }
}
