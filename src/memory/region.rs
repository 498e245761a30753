//! Static partitioning of physical DRAM into purpose-specific regions.

use super::defaults::*;
use crate::descriptor::PhysAddr;
use crate::error::{Error, Result};
use std::fmt;

/// Purpose a region of physical memory is dedicated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionKind {
    /// General VPU codec buffers.
    Vpu,
    /// H.264 working buffers (internal, fixed size).
    Hvpu,
    /// JPEG working buffers (internal, fixed size).
    Jvpu,
    /// Deblocking buffers (internal, fixed size).
    Dvpu,
    /// Camera capture frames.
    Csi,
    /// General DMA surfaces (IPU, framebuffer).
    Dma,
    /// GPU memory.
    Gpu,
}

impl RegionKind {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Vpu => "vpu",
            RegionKind::Hvpu => "hvpu",
            RegionKind::Jvpu => "jvpu",
            RegionKind::Dvpu => "dvpu",
            RegionKind::Csi => "csi",
            RegionKind::Dma => "dma",
            RegionKind::Gpu => "gpu",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous physical address range dedicated to one purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// What the region is for.
    pub kind: RegionKind,
    /// First physical address of the region.
    pub base: PhysAddr,
    /// Total size in bytes.
    pub size: usize,
    /// Slot granularity in bytes; 0 for variable-size use.
    pub slot_size: usize,
}

impl Region {
    /// Describe a region.
    pub const fn new(kind: RegionKind, base: PhysAddr, size: usize, slot_size: usize) -> Self {
        Self {
            kind,
            base,
            size,
            slot_size,
        }
    }

    /// One past the last address of the region.
    #[inline]
    pub fn end(&self) -> PhysAddr {
        self.base.add(self.size)
    }

    /// Whether `addr` lies in `[base, base + size)`.
    #[inline]
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Number of whole slots in the region (0 for variable regions).
    pub fn slot_count(&self) -> usize {
        if self.slot_size == 0 {
            0
        } else {
            self.size / self.slot_size
        }
    }

    /// Physical address of slot `index`.
    pub fn slot_addr(&self, index: usize) -> Option<PhysAddr> {
        (index < self.slot_count()).then(|| self.base.add(index * self.slot_size))
    }

    fn overlaps(&self, other: &Region) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Read-only table of the board's memory regions.
///
/// Regions never overlap. The table is fixed once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTable {
    regions: Vec<Region>,
}

impl RegionTable {
    /// Build a table from region descriptions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any region is empty, has slots larger than
    /// itself, is declared twice, or overlaps another region.
    pub fn new(regions: Vec<Region>) -> Result<Self> {
        for (i, r) in regions.iter().enumerate() {
            if r.size == 0 {
                return Err(Error::InvalidConfig(format!("region {} is empty", r.kind)));
            }
            if r.slot_size > r.size {
                return Err(Error::InvalidConfig(format!(
                    "region {}: slot size {} exceeds region size {}",
                    r.kind, r.slot_size, r.size
                )));
            }
            for other in &regions[i + 1..] {
                if other.kind == r.kind {
                    return Err(Error::InvalidConfig(format!(
                        "region {} declared twice",
                        r.kind
                    )));
                }
                if r.overlaps(other) {
                    return Err(Error::InvalidConfig(format!(
                        "region {} [{}, {}) overlaps region {} [{}, {})",
                        r.kind,
                        r.base,
                        r.end(),
                        other.kind,
                        other.base,
                        other.end()
                    )));
                }
            }
        }
        Ok(Self { regions })
    }

    /// The Parallax board layout.
    pub fn parallax() -> Self {
        let at = |offs: usize| PhysAddr(PLAT_PHYS_OFFSET).add(offs);
        Self {
            regions: vec![
                Region::new(
                    RegionKind::Vpu,
                    at(VPU_MEM_OFFS),
                    VPU_BUF_NUM * VPU_BUF_SIZE,
                    VPU_BUF_SIZE,
                ),
                Region::new(
                    RegionKind::Hvpu,
                    at(HVPU_MEM_OFFS),
                    INTERNAL_BUF_NUM * HVPU_BUF_SIZE,
                    HVPU_BUF_SIZE,
                ),
                Region::new(
                    RegionKind::Jvpu,
                    at(JVPU_MEM_OFFS),
                    INTERNAL_BUF_NUM * JVPU_BUF_SIZE,
                    JVPU_BUF_SIZE,
                ),
                Region::new(
                    RegionKind::Dvpu,
                    at(DVPU_MEM_OFFS),
                    INTERNAL_BUF_NUM * DVPU_BUF_SIZE,
                    DVPU_BUF_SIZE,
                ),
                Region::new(
                    RegionKind::Csi,
                    at(CSI_MEM_OFFS),
                    CSI_BUF_NUM * DMA_BUF_SIZE,
                    DMA_BUF_SIZE,
                ),
                Region::new(
                    RegionKind::Dma,
                    at(DMA_MEM_OFFS),
                    GPU_MEM_OFFS - DMA_MEM_OFFS,
                    DMA_BUF_SIZE,
                ),
                Region::new(RegionKind::Gpu, at(GPU_MEM_OFFS), GPU_BUF_SIZE, 0),
            ],
        }
    }

    /// Region dedicated to `kind`, if the board has one.
    pub fn get(&self, kind: RegionKind) -> Option<&Region> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// Region containing `addr`, if any.
    pub fn containing(&self, addr: PhysAddr) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Iterate over regions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Whether any region intersects `[base, base + size)`.
    pub fn intersects(&self, base: PhysAddr, size: usize) -> bool {
        let probe = Region::new(RegionKind::Gpu, base, size, 0);
        self.regions.iter().any(|r| r.overlaps(&probe))
    }

    /// Highest end address of any region.
    pub fn end(&self) -> PhysAddr {
        self.regions
            .iter()
            .map(Region::end)
            .max()
            .unwrap_or(PhysAddr::NULL)
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::parallax()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallax_table_is_consistent() {
        let table = RegionTable::parallax();
        let rebuilt = RegionTable::new(table.regions.clone());
        assert!(rebuilt.is_ok(), "built-in table must not overlap: {rebuilt:?}");
        assert_eq!(table.iter().count(), 7);
    }

    #[test]
    fn test_region_lookup() {
        let table = RegionTable::parallax();
        let vpu = table.get(RegionKind::Vpu).unwrap();
        assert_eq!(vpu.base, PhysAddr(0x1a40_0000));
        assert_eq!(vpu.slot_count(), VPU_BUF_NUM);
        assert_eq!(vpu.slot_addr(1), Some(vpu.base.add(VPU_BUF_SIZE)));
        assert_eq!(vpu.slot_addr(VPU_BUF_NUM), None);

        let gpu = table.get(RegionKind::Gpu).unwrap();
        assert_eq!(gpu.slot_count(), 0);
    }

    #[test]
    fn test_containing() {
        let table = RegionTable::parallax();
        let hvpu = *table.get(RegionKind::Hvpu).unwrap();
        assert_eq!(table.containing(hvpu.base).unwrap().kind, RegionKind::Hvpu);
        assert_eq!(
            table.containing(hvpu.end()).unwrap().kind,
            RegionKind::Vpu,
            "regions are half-open"
        );
        assert!(table.containing(PhysAddr(PLAT_PHYS_OFFSET)).is_none());
    }

    #[test]
    fn test_overlap_rejected() {
        let a = Region::new(RegionKind::Vpu, PhysAddr(0x1000), 0x2000, 0x1000);
        let b = Region::new(RegionKind::Csi, PhysAddr(0x2000), 0x2000, 0x1000);
        let err = RegionTable::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_adjacent_regions_accepted() {
        let a = Region::new(RegionKind::Vpu, PhysAddr(0x1000), 0x1000, 0x1000);
        let b = Region::new(RegionKind::Csi, PhysAddr(0x2000), 0x1000, 0);
        assert!(RegionTable::new(vec![a, b]).is_ok());
    }

    #[test]
    fn test_bad_regions_rejected() {
        let empty = Region::new(RegionKind::Vpu, PhysAddr(0x1000), 0, 0);
        assert!(RegionTable::new(vec![empty]).is_err());

        let oversized_slot = Region::new(RegionKind::Vpu, PhysAddr(0x1000), 0x1000, 0x2000);
        assert!(RegionTable::new(vec![oversized_slot]).is_err());

        let a = Region::new(RegionKind::Vpu, PhysAddr(0x1000), 0x1000, 0);
        let b = Region::new(RegionKind::Vpu, PhysAddr(0x8000), 0x1000, 0);
        assert!(RegionTable::new(vec![a, b]).is_err());
    }
}
