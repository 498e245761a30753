//! Board memory layout constants.
//!
//! The Parallax board reserves the top of its first 256MB of DRAM for
//! hardware buffers, split into fixed regions by offset from the platform's
//! physical base. The values here are the default [`RegionTable`] and
//! [`ManagerConfig`].
//!
//! ```text
//! offset  136MB  JVPU   2 x 8MB   JPEG working buffers
//!         152MB  DVPU   2 x 2MB   deblocking buffers
//!         156MB  HVPU   2 x 4MB   H.264 working buffers
//!         164MB  VPU   20 x 576KB general codec buffers
//!         176MB  CSI    2 x 10MB  capture frames (one per CSI)
//!         196MB  DMA    2 x 10MB  IPU / framebuffer surfaces
//!         224MB  GPU    32MB      variable
//! ```
//!
//! [`RegionTable`]: super::RegionTable
//! [`ManagerConfig`]: crate::config::ManagerConfig

const MB: usize = 1024 * 1024;

/// Physical address where DRAM starts.
pub const PLAT_PHYS_OFFSET: u64 = 0x1000_0000;

/// Installed DRAM.
pub const DRAM_SIZE: u64 = 1024 * MB as u64;

/// Top of physical DRAM; addresses above it are never valid DMA targets.
pub const DRAM_TOP: u64 = PLAT_PHYS_OFFSET + DRAM_SIZE;

/// CPU page size.
pub const PAGE_SIZE: usize = 4096;

/// Offset of the JPEG working buffer region.
pub const JVPU_MEM_OFFS: usize = 136 * MB;
/// Offset of the deblocking buffer region.
pub const DVPU_MEM_OFFS: usize = 152 * MB;
/// Offset of the H.264 working buffer region.
pub const HVPU_MEM_OFFS: usize = 156 * MB;
/// Offset of the general VPU buffer region.
pub const VPU_MEM_OFFS: usize = 164 * MB;
/// Offset of the capture frame region.
pub const CSI_MEM_OFFS: usize = 176 * MB;
/// Offset of the general DMA region.
pub const DMA_MEM_OFFS: usize = 196 * MB;
/// Offset of the GPU region.
pub const GPU_MEM_OFFS: usize = 224 * MB;

/// General VPU slot size (128 pages plus 16 pages of headroom).
pub const VPU_BUF_SIZE: usize = 128 * PAGE_SIZE + 16 * PAGE_SIZE;
/// JPEG working buffer size.
pub const JVPU_BUF_SIZE: usize = 8 * MB;
/// Deblocking buffer size.
pub const DVPU_BUF_SIZE: usize = 2 * MB;
/// H.264 working buffer size.
pub const HVPU_BUF_SIZE: usize = 4 * MB;
/// Capture frame and DMA surface size.
pub const DMA_BUF_SIZE: usize = 10 * MB;
/// GPU region size.
pub const GPU_BUF_SIZE: usize = 32 * MB;

/// Number of general VPU slots.
pub const VPU_BUF_NUM: usize = 20;
/// Number of instances of each internal working buffer.
pub const INTERNAL_BUF_NUM: usize = 2;
/// Number of capture frames (one per CSI port).
pub const CSI_BUF_NUM: usize = 2;

/// Index of the IPU image-converter surface inside a DMA surface group.
pub const FB_IC_BUFFER_INDEX: usize = 2;
/// Highest framebuffer id with a fixed surface.
pub const FB_MAX_ID: u32 = 5;

/// Start of the window the default fallback allocator draws from.
///
/// Sits directly above the reserved regions, standing in for the kernel's
/// contiguous allocator area.
pub const FALLBACK_WINDOW_OFFS: usize = 256 * MB;
/// Size of the default fallback window.
pub const FALLBACK_WINDOW_SIZE: usize = 64 * MB;

/// Round `size` up to a multiple of `page_size` (a power of two).
///
/// Returns `None` when the rounded size does not fit in a `usize`.
#[inline]
pub const fn page_align(size: usize, page_size: usize) -> Option<usize> {
    match size.checked_add(page_size - 1) {
        Some(end) => Some(end & !(page_size - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpu_buf_size() {
        assert_eq!(VPU_BUF_SIZE, 589_824);
        assert_eq!(VPU_BUF_SIZE % PAGE_SIZE, 0);
    }

    #[test]
    fn test_general_pool_fits_region() {
        assert!(VPU_BUF_NUM * VPU_BUF_SIZE <= CSI_MEM_OFFS - VPU_MEM_OFFS);
    }

    #[test]
    fn test_internal_pools_fill_regions() {
        assert_eq!(DVPU_MEM_OFFS - JVPU_MEM_OFFS, INTERNAL_BUF_NUM * JVPU_BUF_SIZE);
        assert_eq!(HVPU_MEM_OFFS - DVPU_MEM_OFFS, INTERNAL_BUF_NUM * DVPU_BUF_SIZE);
        assert_eq!(VPU_MEM_OFFS - HVPU_MEM_OFFS, INTERNAL_BUF_NUM * HVPU_BUF_SIZE);
    }

    #[test]
    fn test_page_align() {
        assert_eq!(page_align(0, 4096), Some(0));
        assert_eq!(page_align(1, 4096), Some(4096));
        assert_eq!(page_align(4096, 4096), Some(4096));
        assert_eq!(page_align(4097, 4096), Some(8192));
    }

    #[test]
    fn test_page_align_overflow() {
        assert_eq!(page_align(usize::MAX, 4096), None);
        assert_eq!(page_align(usize::MAX - 100, 4096), None);
        assert_eq!(page_align(usize::MAX - 4095, 4096), Some(usize::MAX - 4095));
    }
}
