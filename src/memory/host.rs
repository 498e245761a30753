//! Services the hosting environment provides to the buffer manager.
//!
//! The allocator never touches hardware itself. It asks the host to:
//!
//! - map a physical range into CPU address space ([`IoMapper`])
//! - hand out contiguous physical memory for the fallback path
//!   ([`CoherentAllocator`])
//! - expose a physical range to a user process ([`UserMapper`])
//!
//! [`HeapHost`](super::HeapHost) simulates all of this in process memory;
//! [`DevMem`](super::DevMem) does it on the board through `/dev/mem`.

use crate::descriptor::{CpuAddr, PhysAddr};
use crate::error::Result;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Caching attributes of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Uncached, strongly ordered.
    Uncached,
    /// Uncached, write-combining.
    WriteCombine,
}

/// A CPU virtual mapping of a physical range.
///
/// Produced by [`IoMapper::map`] and handed back to [`IoMapper::unmap`].
/// It is deliberately not `Clone`: one mapping, one unmap.
pub struct CpuMapping {
    ptr: NonNull<u8>,
    len: usize,
    phys: PhysAddr,
}

impl CpuMapping {
    /// Wrap a mapping established by a host.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// mapping is passed back to the `IoMapper` that produced it.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize, phys: PhysAddr) -> Self {
        Self { ptr, len, phys }
    }

    /// CPU address of the first byte.
    #[inline]
    pub fn addr(&self) -> CpuAddr {
        CpuAddr(self.ptr.as_ptr() as usize)
    }

    /// Raw pointer to the first byte.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for an empty mapping.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Physical address the mapping starts at.
    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }
}

// SAFETY: the mapping is a plain address range; access is synchronized by
// the buffer manager lock or by the owner of the buffer.
unsafe impl Send for CpuMapping {}
// SAFETY: see above; `&CpuMapping` only exposes the address.
unsafe impl Sync for CpuMapping {}

impl fmt::Debug for CpuMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuMapping")
            .field("phys", &self.phys)
            .field("cpu", &self.addr())
            .field("len", &self.len)
            .finish()
    }
}

/// Maps physical ranges into CPU address space (ioremap / iounmap).
pub trait IoMapper: Send + Sync {
    /// Establish an uncached CPU mapping of `[phys, phys + len)`.
    fn map(&self, phys: PhysAddr, len: usize) -> Result<CpuMapping>;

    /// Tear a mapping down.
    fn unmap(&self, mapping: CpuMapping);
}

/// One block of host-allocated contiguous memory.
///
/// The three fields travel together: a block is released with exactly the
/// values it was allocated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoherentBlock {
    /// Physical address.
    pub phys: PhysAddr,
    /// Size in bytes, as allocated.
    pub size: usize,
    /// CPU address of the coherent mapping.
    pub cpu: CpuAddr,
}

/// General-purpose contiguous physical memory allocator of the host.
pub trait CoherentAllocator: Send + Sync {
    /// Allocate `size` bytes of contiguous memory with a coherent CPU mapping.
    ///
    /// Returns `None` when no contiguous range is available.
    fn alloc(&self, size: usize) -> Option<CoherentBlock>;

    /// Release a block previously returned by `alloc`.
    fn free(&self, block: CoherentBlock);
}

/// A physical range exposed to user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRange {
    /// User virtual address.
    pub addr: usize,
    /// Physical address the range starts at.
    pub phys: PhysAddr,
    /// Length in bytes.
    pub len: usize,
    /// Caching attributes.
    pub policy: CachePolicy,
}

/// Maps physical pages into a user address space (remap_pfn_range).
pub trait UserMapper: Send + Sync {
    /// Map `[phys, phys + len)` with the given caching policy.
    fn map_user(&self, phys: PhysAddr, len: usize, policy: CachePolicy) -> Result<UserRange>;

    /// Remove a user mapping.
    fn unmap_user(&self, range: UserRange);
}

/// A live user-space mapping; unmapped when dropped.
pub struct UserMapping {
    range: UserRange,
    mapper: Arc<dyn UserMapper>,
}

impl UserMapping {
    pub(crate) fn new(range: UserRange, mapper: Arc<dyn UserMapper>) -> Self {
        Self { range, mapper }
    }

    /// The mapped range.
    #[inline]
    pub fn range(&self) -> &UserRange {
        &self.range
    }

    /// User virtual address of the first byte.
    #[inline]
    pub fn addr(&self) -> usize {
        self.range.addr
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.range.len
    }

    /// Returns true for an empty mapping.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.len == 0
    }
}

impl Drop for UserMapping {
    fn drop(&mut self) {
        self.mapper.unmap_user(self.range);
    }
}

impl fmt::Debug for UserMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserMapping")
            .field("range", &self.range)
            .finish()
    }
}

/// The set of host services a buffer manager runs on.
#[derive(Clone)]
pub struct Host {
    /// CPU mapping of physical ranges.
    pub io: Arc<dyn IoMapper>,
    /// Contiguous allocator used by the fallback path.
    pub coherent: Arc<dyn CoherentAllocator>,
    /// User-space mapping.
    pub user: Arc<dyn UserMapper>,
}

impl Host {
    /// Bundle host services.
    pub fn new(
        io: Arc<dyn IoMapper>,
        coherent: Arc<dyn CoherentAllocator>,
        user: Arc<dyn UserMapper>,
    ) -> Self {
        Self { io, coherent, user }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}
