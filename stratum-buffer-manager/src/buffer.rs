//! Buffer objects, their owners and their reference counts.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Identifies a client connection.
///
/// Only used for ownership checks and for addressing outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Unique identifier for a registered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn new_unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    /// Shared memory pool.
    Shm,
    /// DMA buffer file descriptor.
    DmaBuf,
}

/// Pixel formats accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFormat {
    Argb8888,
    Xrgb8888,
    /// Two planes: Y followed by interleaved UV.
    Nv12,
}

impl BufferFormat {
    /// Bytes per pixel of the first plane.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            BufferFormat::Argb8888 | BufferFormat::Xrgb8888 => 4,
            BufferFormat::Nv12 => 1,
        }
    }

    /// Whether the format carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        matches!(self, BufferFormat::Argb8888)
    }
}

/// Errors raised by [`BufferManager`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("{0} is not registered")]
    UnknownBuffer(BufferId),

    #[error("{buffer} is owned by {owner}, not by {requester}")]
    ForeignBuffer { buffer: BufferId, owner: ClientId, requester: ClientId },

    #[error("invalid buffer dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("stride {stride} is too small for width {width} in {format:?}")]
    InvalidStride { stride: u32, width: u32, format: BufferFormat },
}

/// Properties and reference count of a registered buffer.
///
/// The registering client holds the first reference. Every surface that
/// shows the buffer as current content holds one more.
#[derive(Debug)]
pub struct BufferDetails {
    pub id: BufferId,
    pub buffer_type: BufferType,
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub format: BufferFormat,
    pub owner: ClientId,
    ref_count: AtomicUsize,
    destroyed: AtomicBool,
}

impl BufferDetails {
    fn new(
        buffer_type: BufferType,
        width: u32,
        height: u32,
        stride: u32,
        format: BufferFormat,
        owner: ClientId,
    ) -> Self {
        Self {
            id: BufferId::new_unique(),
            buffer_type,
            width,
            height,
            stride,
            format,
            owner,
            ref_count: AtomicUsize::new(1),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Whether the client already destroyed its handle to this buffer.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn increment_ref_count(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the count after decrementing. Saturates at zero.
    fn decrement_ref_count(&self) -> usize {
        let previous = self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}

/// What happened to a buffer after a reference was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other compositor references remain.
    StillInUse,
    /// Only the client's own reference remains; the client should be told it may reuse the buffer.
    Released { owner: ClientId },
    /// The last reference is gone and the buffer was forgotten.
    Removed,
}

/// Registry of client buffers shared by the compositor.
#[derive(Default)]
pub struct BufferManager {
    buffers: HashMap<BufferId, Arc<BufferDetails>>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self { buffers: HashMap::new() }
    }

    /// Registers a client buffer. The returned buffer has a reference count of one.
    pub fn register_buffer(
        &mut self,
        buffer_type: BufferType,
        width: u32,
        height: u32,
        stride: u32,
        format: BufferFormat,
        owner: ClientId,
    ) -> Result<Arc<BufferDetails>, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::InvalidDimensions { width, height });
        }
        let min_stride = width.checked_mul(format.bytes_per_pixel());
        if min_stride.map_or(true, |min| stride < min) {
            return Err(BufferError::InvalidStride { stride, width, format });
        }

        let details = Arc::new(BufferDetails::new(buffer_type, width, height, stride, format, owner));
        tracing::trace!(buffer = %details.id, %owner, width, height, "Registered buffer");
        self.buffers.insert(details.id, details.clone());
        Ok(details)
    }

    pub fn get_buffer_details(&self, id: BufferId) -> Option<Arc<BufferDetails>> {
        self.buffers.get(&id).cloned()
    }

    /// Takes a compositor reference on a buffer on behalf of `client`.
    ///
    /// Fails if the buffer is unknown or belongs to another client.
    pub fn acquire(&self, id: BufferId, client: ClientId) -> Result<Arc<BufferDetails>, BufferError> {
        let details = self.buffers.get(&id).ok_or(BufferError::UnknownBuffer(id))?;
        if details.owner != client {
            return Err(BufferError::ForeignBuffer {
                buffer: id,
                owner: details.owner,
                requester: client,
            });
        }
        details.increment_ref_count();
        Ok(details.clone())
    }

    /// Drops one compositor reference.
    pub fn release(&mut self, id: BufferId) -> Result<ReleaseOutcome, BufferError> {
        let details = self.buffers.get(&id).cloned().ok_or(BufferError::UnknownBuffer(id))?;
        let remaining = details.decrement_ref_count();
        let outcome = match remaining {
            0 => {
                self.buffers.remove(&id);
                ReleaseOutcome::Removed
            }
            1 if !details.is_destroyed() => ReleaseOutcome::Released { owner: details.owner },
            _ => ReleaseOutcome::StillInUse,
        };
        tracing::trace!(buffer = %id, remaining, ?outcome, "Released buffer reference");
        Ok(outcome)
    }

    /// Drops the client's own reference after it destroyed its buffer handle.
    ///
    /// A buffer still shown by a surface stays registered until that surface lets go of it.
    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<ReleaseOutcome, BufferError> {
        let details = self.buffers.get(&id).cloned().ok_or(BufferError::UnknownBuffer(id))?;
        if details.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(ReleaseOutcome::StillInUse);
        }
        if details.decrement_ref_count() == 0 {
            self.buffers.remove(&id);
            return Ok(ReleaseOutcome::Removed);
        }
        Ok(ReleaseOutcome::StillInUse)
    }

    /// Forgets every buffer owned by `client`, e.g. after its connection was closed.
    pub fn remove_client_buffers(&mut self, client: ClientId) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|_, details| details.owner != client);
        let removed = before - self.buffers.len();
        if removed > 0 {
            tracing::debug!(%client, removed, "Removed buffers of disconnected client");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
