//! Fixed hardware windows.
//!
//! Some consumers never allocate: each capture port owns one frame in the
//! CSI region, and each framebuffer owns a surface at a fixed place in the
//! DMA region. Their addresses are computed from the region table.
//!
//! ```text
//! DMA region, 10MB slots:
//!   [0] [1] [2]=fb0..2   [3] [4] [5]=fb3..5
//!             ^ image-converter surface of each group
//! ```
//!
//! Surfaces of the second group lie past the end of the DMA region, inside
//! the GPU region, as on the board. Windows are only checked against the top
//! of DRAM when mapped.

use crate::descriptor::PhysAddr;
use crate::error::{Error, Result};
use crate::memory::defaults::{FB_IC_BUFFER_INDEX, FB_MAX_ID};
use crate::memory::{CpuMapping, IoMapper, RegionKind, RegionTable};
use std::fmt;
use std::sync::Arc;

/// Surfaces per framebuffer group.
const FB_GROUP_SLOTS: usize = 3;
/// Framebuffer ids per group.
const FB_GROUP_IDS: u32 = 3;

/// Physical address of the capture frame of port `csi`.
///
/// # Errors
///
/// `UnsupportedWindow` if there is no CSI region or no slot for `csi`.
pub fn capture_frame_address(regions: &RegionTable, csi: usize) -> Result<PhysAddr> {
    let region = regions
        .get(RegionKind::Csi)
        .ok_or_else(|| Error::UnsupportedWindow("no CSI region".into()))?;
    region
        .slot_addr(csi)
        .ok_or_else(|| Error::UnsupportedWindow(format!("no capture frame for CSI {csi}")))
}

/// Physical address of the surface of framebuffer `fbid`.
///
/// # Errors
///
/// `UnsupportedWindow` for `fbid` above 5 or a missing DMA region.
pub fn framebuffer_address(regions: &RegionTable, fbid: u32) -> Result<PhysAddr> {
    if fbid > FB_MAX_ID {
        return Err(Error::UnsupportedWindow(format!(
            "framebuffer {fbid} has no fixed surface"
        )));
    }
    let region = regions
        .get(RegionKind::Dma)
        .ok_or_else(|| Error::UnsupportedWindow("no DMA region".into()))?;

    let group = (fbid / FB_GROUP_IDS) as usize;
    let slot = group * FB_GROUP_SLOTS + FB_IC_BUFFER_INDEX;
    Ok(region.base.add(slot * region.slot_size))
}

/// A CPU mapping of a fixed hardware window, unmapped on drop.
pub struct StaticWindow {
    mapping: Option<CpuMapping>,
    io: Arc<dyn IoMapper>,
}

impl StaticWindow {
    pub(crate) fn new(mapping: CpuMapping, io: Arc<dyn IoMapper>) -> Self {
        Self {
            mapping: Some(mapping),
            io,
        }
    }

    fn mapping(&self) -> &CpuMapping {
        // Only `drop` takes the mapping.
        self.mapping.as_ref().unwrap_or_else(|| unreachable!())
    }

    /// Physical address of the window.
    pub fn phys(&self) -> PhysAddr {
        self.mapping().phys()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.mapping().len()
    }

    /// Returns true for an empty window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The window as a byte slice.
    ///
    /// # Safety
    ///
    /// No hardware engine may write the window while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        let mapping = self.mapping();
        // SAFETY: the mapping is valid for `len` bytes until drop.
        unsafe { std::slice::from_raw_parts(mapping.as_ptr(), mapping.len()) }
    }

    /// The window as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the window memory.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        let mapping = self.mapping();
        // SAFETY: the mapping is valid for `len` bytes and we hold `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(mapping.as_ptr(), mapping.len()) }
    }
}

impl Drop for StaticWindow {
    fn drop(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            self.io.unmap(mapping);
        }
    }
}

impl fmt::Debug for StaticWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticWindow")
            .field("mapping", &self.mapping)
            .finish()
    }
}
