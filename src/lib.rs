//! # Parallax DMA
//!
//! Static physical-memory buffer allocator for the Parallax vision board's
//! video codec, capture and framebuffer engines.
//!
//! DMA engines need physically contiguous buffers, and a long-running vision
//! workload fragments memory until the host's contiguous allocator starts
//! failing. The board therefore reserves fixed regions of DRAM and carves
//! them into slots handed out first-fit; only when no slot fits does a
//! request fall back to the host allocator.
//!
//! ## Features
//!
//! - **Fixed regions**: one [`RegionTable`](memory::RegionTable) partitions DRAM by purpose
//! - **Slot pools**: general codec slots plus reserved codec working sets
//! - **Dynamic fallback**: page-rounded host allocations, tracked for bulk teardown
//! - **Typed provenance**: free dispatches on an enum, never on raw flag bits
//! - **Pluggable host**: heap simulation for tests, `/dev/mem` on the board
//!
//! ## Quick Start
//!
//! ```rust
//! use parallax_dma::prelude::*;
//!
//! let config = ManagerConfig::default();
//! let host = SimulatedHost::new(&config);
//! let manager = BufferManager::new(config, host.host())?;
//!
//! let token = manager.allocate(256 * 1024)?;
//! manager.check_hardware_address(token.phys())?;
//! let _user = manager.map_for_user_space(&token, 0, 4096)?;
//! manager.free(token)?;
//! # Ok::<(), parallax_dma::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod completion;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod manager;
pub mod memory;
pub mod observability;
pub mod window;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::completion::CompletionSignal;
    pub use crate::config::ManagerConfig;
    pub use crate::descriptor::{
        BufferDescriptor, BufferToken, MemDesc, PhysAddr, PoolKind, Provenance,
    };
    pub use crate::device::{VpuDevice, VpuSession};
    pub use crate::error::{Error, Result};
    pub use crate::manager::{BufferManager, BufferStats};
    pub use crate::memory::{CpuAccess, FreeOutcome, RegionKind, RegionTable, SimulatedHost};
}

pub use error::{Error, Result};
