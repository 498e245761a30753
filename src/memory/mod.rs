//! Physical memory management for hardware buffers.
//!
//! This module holds the allocator internals behind the buffer protocol in
//! [`crate::manager`].
//!
//! # Architecture
//!
//! - [`RegionTable`]: fixed partitioning of DRAM into purpose-specific regions
//! - [`SlotPool`]: first-fit fixed-size slots over the general and internal regions
//! - [`DynamicAllocator`]: fallback onto the host's contiguous allocator
//! - [`RecordTracker`]: one record per live dynamic allocation
//! - [`IoMapper`], [`CoherentAllocator`], [`UserMapper`]: services of the host,
//!   implemented by [`HeapHost`] (simulation), [`DevMem`] (board) and
//!   [`CarveoutAllocator`]
//!
//! # Example
//!
//! ```rust
//! use parallax_dma::memory::{CpuAccess, HeapHost, RegionKind, RegionTable, SlotPool};
//! use parallax_dma::memory::defaults::PAGE_SIZE;
//!
//! let host = HeapHost::new();
//! let mut pool = SlotPool::new(
//!     &RegionTable::parallax(),
//!     RegionKind::Vpu,
//!     &[RegionKind::Hvpu],
//!     PAGE_SIZE,
//! )
//! .unwrap();
//!
//! let grant = pool.allocate(64 * 1024, CpuAccess::Mapped, &host).unwrap();
//! pool.free(grant.phys, &host);
//! ```

mod carveout;
pub mod defaults;
mod devmem;
mod fallback;
mod heap;
mod host;
mod records;
mod region;
mod slot_pool;

pub use carveout::{CarveoutAllocator, CarveoutStats};
pub use devmem::{DEV_MEM_PATH, DevMem};
pub use fallback::DynamicAllocator;
pub use heap::{HeapHost, HeapHostStats, SimulatedHost};
pub use host::{
    CachePolicy, CoherentAllocator, CoherentBlock, CpuMapping, Host, IoMapper, UserMapper,
    UserMapping, UserRange,
};
pub use records::{AllocationRecord, RecordTracker};
pub use region::{Region, RegionKind, RegionTable};
pub use slot_pool::{CpuAccess, FreeOutcome, Slot, SlotGrant, SlotPool, SlotState};
