//! Error types for the DMA buffer manager.

use crate::descriptor::PhysAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for buffer management operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No free slot matches the request class.
    ///
    /// Recovered inside `BufferManager::allocate` by the dynamic fallback.
    #[error("slot pool exhausted: no free slot for this request")]
    PoolExhausted,

    /// The host could not provide contiguous physical memory.
    #[error("contiguous memory exhausted: cannot allocate {size} bytes")]
    ResourceExhausted {
        /// Page-rounded size that was requested from the host.
        size: usize,
    },

    /// A request the allocator cannot serve as stated (for example, zero bytes).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A descriptor that does not name a live buffer.
    #[error("invalid buffer descriptor: {0}")]
    InvalidDescriptor(String),

    /// A user-space mapping request reaches past the end of the buffer.
    #[error("mapping of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfRangeMap {
        /// Byte offset into the buffer.
        offset: usize,
        /// Requested mapping length in bytes.
        len: usize,
        /// Recorded buffer size.
        size: usize,
    },

    /// Address lies above the top of physical DRAM.
    #[error("physical address {0} is above the top of DRAM")]
    StaleHardwareAddress(PhysAddr),

    /// The host failed to establish a CPU or user mapping.
    #[error("mapping failed: {0}")]
    MapFailed(String),

    /// Waiting for hardware completion timed out.
    #[error("timed out after {0:?} waiting for hardware completion")]
    Timeout(Duration),

    /// Waiting for hardware completion was interrupted.
    #[error("wait for hardware completion interrupted")]
    Interrupted,

    /// Invalid manager or region configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fixed hardware window that this board does not provide.
    #[error("unsupported window: {0}")]
    UnsupportedWindow(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}
