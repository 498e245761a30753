//! Heap-backed simulated host.
//!
//! Stands in for the kernel services on a development machine and in tests.
//! Each CPU mapping is backed by a zeroed heap allocation; physical addresses
//! are only bookkeeping. Mapping the same physical range twice yields two
//! independent views, so contents do not survive an unmap.

use super::carveout::CarveoutAllocator;
use super::host::{CachePolicy, CpuMapping, Host, IoMapper, UserMapper, UserRange};
use crate::config::ManagerConfig;
use crate::descriptor::PhysAddr;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const USER_BASE: usize = 0x7f00_0000_0000;

/// Counters of host calls made by the buffer manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapHostStats {
    /// Successful CPU mappings.
    pub maps: usize,
    /// CPU unmappings.
    pub unmaps: usize,
    /// CPU mappings currently live.
    pub live_mappings: usize,
    /// Unmap calls for mappings this host never produced.
    pub stray_unmaps: usize,
    /// User mappings established.
    pub user_maps: usize,
    /// User mappings removed.
    pub user_unmaps: usize,
}

/// A host whose "physical memory" lives on the heap.
///
/// # Example
///
/// ```rust
/// use parallax_dma::memory::{HeapHost, IoMapper};
/// use parallax_dma::descriptor::PhysAddr;
///
/// let host = HeapHost::new();
/// let mapping = host.map(PhysAddr(0x1a40_0000), 4096).unwrap();
/// assert_eq!(mapping.len(), 4096);
/// host.unmap(mapping);
/// assert_eq!(host.stats().live_mappings, 0);
/// ```
#[derive(Debug, Default)]
pub struct HeapHost {
    /// Backing storage keyed by CPU address.
    backing: Mutex<HashMap<usize, (PhysAddr, Box<[u8]>)>>,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
    stray_unmaps: AtomicUsize,
    user_maps: AtomicUsize,
    user_unmaps: AtomicUsize,
    next_user: AtomicUsize,
    fail_next_map: AtomicBool,
}

impl HeapHost {
    /// Create a host with no mappings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `map` call fail, as an exhausted vmalloc area would.
    pub fn fail_next_map(&self) {
        self.fail_next_map.store(true, Ordering::SeqCst);
    }

    /// Snapshot of call counters.
    pub fn stats(&self) -> HeapHostStats {
        HeapHostStats {
            maps: self.maps.load(Ordering::SeqCst),
            unmaps: self.unmaps.load(Ordering::SeqCst),
            live_mappings: self.backing.lock().unwrap().len(),
            stray_unmaps: self.stray_unmaps.load(Ordering::SeqCst),
            user_maps: self.user_maps.load(Ordering::SeqCst),
            user_unmaps: self.user_unmaps.load(Ordering::SeqCst),
        }
    }

    /// Physical address backing a live CPU mapping, if any.
    pub fn phys_of(&self, cpu: usize) -> Option<PhysAddr> {
        self.backing.lock().unwrap().get(&cpu).map(|(phys, _)| *phys)
    }
}

impl IoMapper for HeapHost {
    fn map(&self, phys: PhysAddr, len: usize) -> Result<CpuMapping> {
        if len == 0 {
            return Err(Error::MapFailed(format!("zero-length mapping at {phys}")));
        }
        if self.fail_next_map.swap(false, Ordering::SeqCst) {
            return Err(Error::MapFailed(format!(
                "simulated failure mapping {len} bytes at {phys}"
            )));
        }

        let mut data = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::new(data.as_mut_ptr())
            .ok_or_else(|| Error::MapFailed("heap returned null".into()))?;

        self.backing
            .lock()
            .unwrap()
            .insert(ptr.as_ptr() as usize, (phys, data));
        self.maps.fetch_add(1, Ordering::SeqCst);

        // SAFETY: `data` stays in `backing` until this mapping is unmapped.
        Ok(unsafe { CpuMapping::from_raw_parts(ptr, len, phys) })
    }

    fn unmap(&self, mapping: CpuMapping) {
        let removed = self
            .backing
            .lock()
            .unwrap()
            .remove(&(mapping.as_ptr() as usize));
        match removed {
            Some(_) => {
                self.unmaps.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                self.stray_unmaps.fetch_add(1, Ordering::SeqCst);
                tracing::error!(mapping = ?mapping, "unmap of unknown mapping");
            }
        }
    }
}

impl UserMapper for HeapHost {
    fn map_user(&self, phys: PhysAddr, len: usize, policy: CachePolicy) -> Result<UserRange> {
        if len == 0 {
            return Err(Error::MapFailed(format!("zero-length user mapping at {phys}")));
        }
        let offset = self.next_user.fetch_add(len, Ordering::SeqCst);
        self.user_maps.fetch_add(1, Ordering::SeqCst);
        Ok(UserRange {
            addr: USER_BASE + offset,
            phys,
            len,
            policy,
        })
    }

    fn unmap_user(&self, _range: UserRange) {
        self.user_unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

/// A complete simulated host: heap mappings plus a carve-out fallback
/// allocator over the configured fallback window.
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    /// Mapping services.
    pub heap: Arc<HeapHost>,
    /// Fallback contiguous allocator.
    pub carveout: Arc<CarveoutAllocator>,
}

impl SimulatedHost {
    /// Build a simulated host for `config`.
    pub fn new(config: &ManagerConfig) -> Self {
        let heap = Arc::new(HeapHost::new());
        let (base, size) = config.fallback_window;
        let carveout = Arc::new(CarveoutAllocator::new(
            base,
            size,
            config.page_size,
            heap.clone(),
        ));
        Self { heap, carveout }
    }

    /// The host services to hand to a `BufferManager`.
    pub fn host(&self) -> Host {
        Host::new(self.heap.clone(), self.carveout.clone(), self.heap.clone())
    }
}
