//! Buffer descriptors exchanged across the buffer protocol.
//!
//! A consumer only ever identifies a buffer by its physical address, exactly
//! like the DMA engines it programs. The provenance of a buffer (which
//! allocation path produced it) travels with the descriptor and is the only
//! thing `free` uses to pick a teardown path.
//!
//! Two shapes exist:
//!
//! - [`BufferToken`]: the owned handle returned by `BufferManager::allocate`.
//!   Freeing consumes it, so a token cannot be freed twice.
//! - [`MemDesc`]: the `#[repr(C)]` wire form used by ioctl-style callers,
//!   carrying raw flag bits. It is decoded and checked against live state
//!   before anything is released.

use crate::error::{Error, Result};
use std::fmt;

/// Raw flag: buffer came from the slot pool.
pub const DESC_DMAMAP: u32 = 0x1;
/// Raw flag: slot-pool buffer came from an internally reserved fixed-purpose slot.
pub const DESC_VPU_DMA: u32 = 0x2;
/// Raw flag: buffer came from the dynamic fallback allocator.
pub const DESC_ALLOC: u32 = 0x4;

/// A hardware-visible DRAM address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    /// The null physical address.
    pub const NULL: PhysAddr = PhysAddr(0);

    /// Raw address value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the zero address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    #[inline]
    pub const fn add(self, bytes: usize) -> PhysAddr {
        PhysAddr(self.0 + bytes as u64)
    }

    /// Address `bytes` past this one, or `None` if it does not fit in 64 bits.
    #[inline]
    pub const fn checked_add(self, bytes: usize) -> Option<PhysAddr> {
        match self.0.checked_add(bytes as u64) {
            Some(addr) => Some(PhysAddr(addr)),
            None => None,
        }
    }

    /// Distance from `base` to this address, if this address is not below it.
    #[inline]
    pub fn offset_from(self, base: PhysAddr) -> Option<usize> {
        self.0.checked_sub(base.0).map(|d| d as usize)
    }

    /// Page frame number for a given page size.
    #[inline]
    pub const fn page_frame(self, page_size: usize) -> u64 {
        self.0 / page_size as u64
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A CPU virtual address mapping a buffer's physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuAddr(pub usize);

impl CpuAddr {
    /// The address as a raw pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0 as *mut u8
    }
}

impl fmt::Display for CpuAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Which slot pool a slot-pool buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// The general fixed-size slot pool.
    General,
    /// The internally reserved fixed-purpose pool (codec working sets).
    Internal,
}

impl PoolKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::General => "general",
            PoolKind::Internal => "internal",
        }
    }
}

/// Which allocation path produced a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Issued from a slot pool.
    SlotPool(PoolKind),
    /// Issued by the dynamic fallback allocator.
    Dynamic,
}

impl Provenance {
    /// Encode into raw descriptor flag bits.
    pub fn to_flags(self) -> u32 {
        match self {
            Provenance::SlotPool(PoolKind::General) => DESC_DMAMAP,
            Provenance::SlotPool(PoolKind::Internal) => DESC_DMAMAP | DESC_VPU_DMA,
            Provenance::Dynamic => DESC_ALLOC,
        }
    }

    /// Decode raw flag bits.
    ///
    /// Returns `Ok(None)` for zero flags (an unallocated descriptor) and an
    /// error for any combination no allocation path ever produces.
    pub fn from_flags(flags: u32) -> Result<Option<Self>> {
        match flags {
            0 => Ok(None),
            DESC_DMAMAP => Ok(Some(Provenance::SlotPool(PoolKind::General))),
            f if f == DESC_DMAMAP | DESC_VPU_DMA => {
                Ok(Some(Provenance::SlotPool(PoolKind::Internal)))
            }
            DESC_ALLOC => Ok(Some(Provenance::Dynamic)),
            other => Err(Error::InvalidDescriptor(format!(
                "unrecognized flags {other:#x}"
            ))),
        }
    }

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::SlotPool(kind) => kind.as_str(),
            Provenance::Dynamic => "dynamic",
        }
    }
}

/// The value a consumer carries for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Usable size in bytes (possibly rounded up from the request).
    pub size: usize,
    /// Physical address to program into DMA engines.
    pub phys: PhysAddr,
    /// CPU mapping, when one was established.
    pub cpu: Option<CpuAddr>,
    /// Allocation path that produced the buffer.
    pub provenance: Provenance,
}

impl BufferDescriptor {
    /// Encode as a wire descriptor.
    ///
    /// Fails if the physical address or size does not fit the 32-bit wire format.
    pub fn to_mem_desc(&self) -> Result<MemDesc> {
        let narrow = |v: u64, what: &str| {
            u32::try_from(v).map_err(|_| {
                Error::InvalidDescriptor(format!("{what} {v:#x} does not fit the wire format"))
            })
        };
        Ok(MemDesc {
            size: narrow(self.size as u64, "size")?,
            phys_addr: narrow(self.phys.0, "physical address")?,
            cpu_addr: self.cpu.map(|c| c.0).unwrap_or(0),
            flags: self.provenance.to_flags(),
        })
    }
}

/// Owned handle to one live buffer.
///
/// Returned by `BufferManager::allocate` and consumed by
/// `BufferManager::free`. Not `Clone`: one token per live buffer.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a BufferToken leaks the buffer until bulk teardown"]
pub struct BufferToken {
    desc: BufferDescriptor,
    owner: u64,
}

impl BufferToken {
    pub(crate) fn new(desc: BufferDescriptor, owner: u64) -> Self {
        Self { desc, owner }
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    pub(crate) fn into_descriptor(self) -> BufferDescriptor {
        self.desc
    }

    /// The buffer's descriptor.
    #[inline]
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.desc
    }

    /// Physical address of the buffer.
    #[inline]
    pub fn phys(&self) -> PhysAddr {
        self.desc.phys
    }

    /// Size of the buffer in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.desc.size
    }

    /// Allocation path that produced the buffer.
    #[inline]
    pub fn provenance(&self) -> Provenance {
        self.desc.provenance
    }

    /// The buffer's CPU mapping as a byte slice, if mapped.
    ///
    /// # Safety
    ///
    /// The caller must ensure no hardware engine or other thread writes the
    /// buffer while the slice is alive.
    pub unsafe fn as_slice(&self) -> Option<&[u8]> {
        self.desc
            .cpu
            // SAFETY: the mapping covers `size` bytes while the token is live.
            .map(|cpu| unsafe { std::slice::from_raw_parts(cpu.as_ptr(), self.desc.size) })
    }

    /// The buffer's CPU mapping as a mutable byte slice, if mapped.
    ///
    /// # Safety
    ///
    /// The caller must ensure exclusive access to the buffer memory.
    pub unsafe fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        self.desc
            .cpu
            // SAFETY: the mapping covers `size` bytes and we hold `&mut self`.
            .map(|cpu| unsafe { std::slice::from_raw_parts_mut(cpu.as_ptr(), self.desc.size) })
    }
}

/// Wire-format buffer descriptor, as exchanged with ioctl-style callers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemDesc {
    /// Size in bytes.
    pub size: u32,
    /// Physical address.
    pub phys_addr: u32,
    /// CPU address, native word width (informational; never used for release).
    pub cpu_addr: usize,
    /// Raw provenance flags (`DESC_*`).
    pub flags: u32,
}

impl MemDesc {
    /// An allocate request for `size` bytes with zeroed flags.
    pub fn request(size: u32) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Physical address of the described buffer.
    pub fn phys(&self) -> PhysAddr {
        PhysAddr(u64::from(self.phys_addr))
    }
}
