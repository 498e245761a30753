//! First-fit contiguous allocator over a physical carve-out window.
//!
//! This is the host-side allocator behind the dynamic fallback path when the
//! allocator runs outside the kernel: a window of physical memory set aside
//! for general contiguous allocations, handed out first-fit at page
//! granularity, with each block mapped for the CPU through an [`IoMapper`].

use super::defaults::page_align;
use super::host::{CoherentAllocator, CoherentBlock, CpuMapping, IoMapper};
use crate::descriptor::PhysAddr;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Counters for the carve-out allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CarveoutStats {
    /// Successful allocations.
    pub allocs: usize,
    /// Successful releases.
    pub frees: usize,
    /// Releases refused because size or CPU address did not match.
    pub mismatched_frees: usize,
    /// Blocks currently live.
    pub live_blocks: usize,
    /// Bytes currently live.
    pub live_bytes: usize,
}

struct LiveBlock {
    size: usize,
    mapping: CpuMapping,
}

#[derive(Default)]
struct CarveoutState {
    /// Live blocks keyed by physical address.
    blocks: BTreeMap<PhysAddr, LiveBlock>,
    allocs: usize,
    frees: usize,
    mismatched_frees: usize,
}

/// Contiguous allocator over `[base, base + size)`.
pub struct CarveoutAllocator {
    base: PhysAddr,
    size: usize,
    page_size: usize,
    io: Arc<dyn IoMapper>,
    state: Mutex<CarveoutState>,
}

impl CarveoutAllocator {
    /// Create an allocator over a physical window.
    pub fn new(base: PhysAddr, size: usize, page_size: usize, io: Arc<dyn IoMapper>) -> Self {
        Self {
            base,
            size,
            page_size,
            io,
            state: Mutex::new(CarveoutState::default()),
        }
    }

    /// First address of the window.
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// Size of the window in bytes.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> CarveoutStats {
        let state = self.state.lock().unwrap();
        CarveoutStats {
            allocs: state.allocs,
            frees: state.frees,
            mismatched_frees: state.mismatched_frees,
            live_blocks: state.blocks.len(),
            live_bytes: state.blocks.values().map(|b| b.size).sum(),
        }
    }

    fn find_gap(&self, blocks: &BTreeMap<PhysAddr, LiveBlock>, size: usize) -> Option<PhysAddr> {
        let end = self.base.add(self.size);
        let mut cursor = self.base;
        for (&start, block) in blocks {
            if start.offset_from(cursor).is_some_and(|gap| gap >= size) {
                return Some(cursor);
            }
            cursor = start.add(block.size);
        }
        end.offset_from(cursor)
            .is_some_and(|gap| gap >= size)
            .then_some(cursor)
    }
}

impl CoherentAllocator for CarveoutAllocator {
    fn alloc(&self, size: usize) -> Option<CoherentBlock> {
        if size == 0 {
            return None;
        }
        let size = page_align(size, self.page_size)?;

        let mut state = self.state.lock().unwrap();
        let phys = self.find_gap(&state.blocks, size)?;

        let mapping = match self.io.map(phys, size) {
            Ok(mapping) => mapping,
            Err(e) => {
                tracing::error!(phys = %phys, size, error = %e, "carve-out block mapping failed");
                return None;
            }
        };

        let block = CoherentBlock {
            phys,
            size,
            cpu: mapping.addr(),
        };
        state.blocks.insert(phys, LiveBlock { size, mapping });
        state.allocs += 1;
        Some(block)
    }

    fn free(&self, block: CoherentBlock) {
        let mut state = self.state.lock().unwrap();
        let matches = state
            .blocks
            .get(&block.phys)
            .is_some_and(|live| live.size == block.size && live.mapping.addr() == block.cpu);

        if !matches {
            state.mismatched_frees += 1;
            tracing::error!(
                phys = %block.phys,
                size = block.size,
                cpu = %block.cpu,
                "refusing release that does not match a live block"
            );
            return;
        }

        if let Some(live) = state.blocks.remove(&block.phys) {
            self.io.unmap(live.mapping);
            state.frees += 1;
        }
    }
}

impl fmt::Debug for CarveoutAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarveoutAllocator")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("page_size", &self.page_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapHost;

    fn carveout(size: usize) -> (Arc<HeapHost>, CarveoutAllocator) {
        let heap = Arc::new(HeapHost::new());
        let alloc = CarveoutAllocator::new(PhysAddr(0x2000_0000), size, 4096, heap.clone());
        (heap, alloc)
    }

    #[test]
    fn test_first_fit_and_reuse() {
        let (_heap, alloc) = carveout(16 * 4096);

        let a = alloc.alloc(4096).unwrap();
        let b = alloc.alloc(100).unwrap();
        assert_eq!(a.phys, PhysAddr(0x2000_0000));
        assert_eq!(b.phys, PhysAddr(0x2000_1000));
        assert_eq!(b.size, 4096, "size is page rounded");

        alloc.free(a);
        let c = alloc.alloc(4096).unwrap();
        assert_eq!(c.phys, PhysAddr(0x2000_0000), "gap at the front is reused");

        alloc.free(b);
        alloc.free(c);
        assert_eq!(alloc.stats().live_blocks, 0);
        assert_eq!(alloc.stats().frees, 3);
    }

    #[test]
    fn test_exhaustion() {
        let (_heap, alloc) = carveout(2 * 4096);
        let a = alloc.alloc(8192).unwrap();
        assert!(alloc.alloc(1).is_none());
        alloc.free(a);
        assert!(alloc.alloc(8192).is_some());
    }

    #[test]
    fn test_gap_too_small_is_skipped() {
        let (_heap, alloc) = carveout(4 * 4096);
        let a = alloc.alloc(4096).unwrap();
        let b = alloc.alloc(4096).unwrap();
        alloc.free(a);
        let big = alloc.alloc(2 * 4096).unwrap();
        assert_eq!(big.phys, b.phys.add(4096));
    }

    #[test]
    fn test_mismatched_free_refused() {
        let (heap, alloc) = carveout(4 * 4096);
        let a = alloc.alloc(4096).unwrap();

        alloc.free(CoherentBlock { size: 8192, ..a });
        let stats = alloc.stats();
        assert_eq!(stats.mismatched_frees, 1);
        assert_eq!(stats.live_blocks, 1);
        assert_eq!(heap.stats().live_mappings, 1);

        alloc.free(a);
        assert_eq!(alloc.stats().live_blocks, 0);
        assert_eq!(heap.stats().live_mappings, 0);
    }

    #[test]
    fn test_map_failure_leaves_no_block() {
        let (heap, alloc) = carveout(4 * 4096);
        heap.fail_next_map();
        assert!(alloc.alloc(4096).is_none());
        assert_eq!(alloc.stats().live_blocks, 0);
    }
}
