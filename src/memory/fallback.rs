//! Dynamic fallback onto the host's contiguous allocator.

use super::defaults::page_align;
use super::host::{CoherentAllocator, CoherentBlock};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Serves requests the slot pool cannot, from host contiguous memory.
///
/// Sizes are rounded up to whole pages. A failed request is reported, never
/// retried. Blocks are released with exactly the `(phys, size, cpu)` triple
/// they were allocated with; callers source it from the allocation record.
#[derive(Clone)]
pub struct DynamicAllocator {
    host: Arc<dyn CoherentAllocator>,
    page_size: usize,
}

impl DynamicAllocator {
    /// Wrap a host allocator.
    pub fn new(host: Arc<dyn CoherentAllocator>, page_size: usize) -> Self {
        Self { host, page_size }
    }

    /// Allocate at least `size` bytes.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when the host has no contiguous range left.
    pub fn allocate(&self, size: usize) -> Result<CoherentBlock> {
        let size = page_align(size, self.page_size).ok_or(Error::ResourceExhausted { size })?;
        let block = self
            .host
            .alloc(size)
            .ok_or(Error::ResourceExhausted { size })?;
        tracing::debug!(phys = %block.phys, cpu = %block.cpu, size, "dynamic block allocated");
        Ok(block)
    }

    /// Release a block.
    pub fn free(&self, block: CoherentBlock) {
        tracing::debug!(phys = %block.phys, size = block.size, "dynamic block freed");
        self.host.free(block);
    }
}

impl std::fmt::Debug for DynamicAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicAllocator")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
