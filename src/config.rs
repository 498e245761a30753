//! Buffer manager configuration.

use crate::descriptor::PhysAddr;
use crate::error::{Error, Result};
use crate::memory::defaults::{
    DRAM_TOP, FALLBACK_WINDOW_OFFS, FALLBACK_WINDOW_SIZE, PAGE_SIZE, PLAT_PHYS_OFFSET,
};
use crate::memory::{RegionKind, RegionTable};
use crate::observability::TracingConfig;

/// Configuration for a [`BufferManager`](crate::manager::BufferManager).
///
/// The default is the Parallax board layout.
///
/// # Example
///
/// ```rust
/// use parallax_dma::config::ManagerConfig;
/// use parallax_dma::descriptor::PhysAddr;
/// use parallax_dma::memory::{Region, RegionKind, RegionTable};
///
/// let regions = RegionTable::new(vec![Region::new(
///     RegionKind::Vpu,
///     PhysAddr(0x1a40_0000),
///     20 * 128 * 1024,
///     128 * 1024,
/// )])
/// .unwrap();
///
/// let config = ManagerConfig::default()
///     .with_regions(regions)
///     .with_internal_pools(vec![]);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Physical memory partitioning.
    pub regions: RegionTable,
    /// Region backing the general slot pool.
    pub general_pool: RegionKind,
    /// Regions backing the internal fixed-purpose pool, in search order.
    pub internal_pools: Vec<RegionKind>,
    /// Top of physical DRAM; the bound for address validation.
    pub dram_top: PhysAddr,
    /// CPU page size (power of two).
    pub page_size: usize,
    /// Physical window `(base, size)` the fallback allocator draws from.
    pub fallback_window: (PhysAddr, usize),
    /// Which operations get tracing spans.
    pub tracing: TracingConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            regions: RegionTable::parallax(),
            general_pool: RegionKind::Vpu,
            internal_pools: vec![RegionKind::Hvpu, RegionKind::Jvpu, RegionKind::Dvpu],
            dram_top: PhysAddr(DRAM_TOP),
            page_size: PAGE_SIZE,
            fallback_window: (
                PhysAddr(PLAT_PHYS_OFFSET).add(FALLBACK_WINDOW_OFFS),
                FALLBACK_WINDOW_SIZE,
            ),
            tracing: TracingConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Replace the region table.
    pub fn with_regions(mut self, regions: RegionTable) -> Self {
        self.regions = regions;
        self
    }

    /// Set the general pool region.
    pub fn with_general_pool(mut self, kind: RegionKind) -> Self {
        self.general_pool = kind;
        self
    }

    /// Set the internal pool regions.
    pub fn with_internal_pools(mut self, kinds: Vec<RegionKind>) -> Self {
        self.internal_pools = kinds;
        self
    }

    /// Set the top of DRAM.
    pub fn with_dram_top(mut self, top: PhysAddr) -> Self {
        self.dram_top = top;
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the fallback allocator window.
    pub fn with_fallback_window(mut self, base: PhysAddr, size: usize) -> Self {
        self.fallback_window = (base, size);
        self
    }

    /// Set the tracing span configuration.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !self.page_size.is_power_of_two() {
            return invalid(format!("page size {} is not a power of two", self.page_size));
        }

        let Some(general) = self.regions.get(self.general_pool) else {
            return invalid(format!("general pool region {} missing", self.general_pool));
        };
        if general.slot_size == 0 || general.slot_size % self.page_size != 0 {
            return invalid(format!(
                "general slot size {} is not a non-zero multiple of the page size",
                general.slot_size
            ));
        }

        for &kind in &self.internal_pools {
            let Some(region) = self.regions.get(kind) else {
                return invalid(format!("internal pool region {kind} missing"));
            };
            if kind == self.general_pool {
                return invalid(format!("region {kind} used for both pools"));
            }
            if region.slot_size % self.page_size != 0 || region.slot_size <= general.slot_size {
                return invalid(format!(
                    "internal slot size {} of {kind} must be a page multiple above the general slot size {}",
                    region.slot_size, general.slot_size
                ));
            }
        }

        let (fb_base, fb_size) = self.fallback_window;
        if fb_size > 0 && self.regions.intersects(fb_base, fb_size) {
            return invalid(format!(
                "fallback window at {fb_base} overlaps a reserved region"
            ));
        }
        if fb_base.add(fb_size) > self.dram_top.add(1) {
            return invalid(format!("fallback window at {fb_base} extends above DRAM"));
        }
        if self.regions.end() > self.dram_top.add(1) {
            return invalid("regions extend above the top of DRAM".into());
        }

        Ok(())
    }
}
