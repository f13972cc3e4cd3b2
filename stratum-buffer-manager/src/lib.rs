//! # Stratum Buffer Manager
//!
//! Tracks client buffers for the Stratum compositor: registration, ownership
//! checks and reference counting. The compositor core takes a reference when a
//! buffer becomes a surface's current content and drops it when the content is
//! replaced; [`BufferManager::release`] reports when the client may reuse the
//! buffer.

pub mod buffer;

pub use buffer::{
    BufferDetails, BufferError, BufferFormat, BufferId, BufferManager, BufferType, ClientId,
    ReleaseOutcome,
};
