//! `/dev/mem` host for running on the board.
//!
//! Physical ranges are mapped by `mmap`-ing the memory device at the physical
//! offset. The device is opened with `O_SYNC`, which gives uncached mappings.
//!
//! # Example
//!
//! ```rust,ignore
//! use parallax_dma::memory::{DevMem, IoMapper};
//! use parallax_dma::descriptor::PhysAddr;
//!
//! let mem = DevMem::open()?;
//! let frame = mem.map(PhysAddr(0x1b00_0000), 10 * 1024 * 1024)?;
//! // ... read the capture frame ...
//! mem.unmap(frame);
//! ```

use super::defaults::PAGE_SIZE;
use super::host::{CachePolicy, CpuMapping, IoMapper, UserMapper, UserRange};
use crate::descriptor::PhysAddr;
use crate::error::{Error, Result};
use rustix::fd::{AsRawFd, OwnedFd};
use rustix::fs::{Mode, OFlags};
use rustix::mm::{MapFlags, ProtFlags};
use std::path::Path;
use std::ptr::NonNull;

/// Path of the physical memory device.
pub const DEV_MEM_PATH: &str = "/dev/mem";

/// Physical memory accessed through a memory device file.
pub struct DevMem {
    fd: OwnedFd,
    page_size: usize,
}

impl DevMem {
    /// Open `/dev/mem`.
    ///
    /// # Errors
    ///
    /// Fails without `CAP_SYS_RAWIO` or when the kernel restricts `/dev/mem`.
    pub fn open() -> Result<Self> {
        Self::open_path(DEV_MEM_PATH)
    }

    /// Open a memory device (or any file standing in for one).
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let fd = rustix::fs::open(
            path.as_ref(),
            OFlags::RDWR | OFlags::SYNC | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        Ok(Self {
            fd,
            page_size: PAGE_SIZE,
        })
    }

    /// Map `[phys, phys + len)`, returning the pointer to `phys`.
    fn mmap(&self, phys: PhysAddr, len: usize) -> Result<NonNull<u8>> {
        if len == 0 {
            return Err(Error::MapFailed(format!("zero-length mapping at {phys}")));
        }
        let page_off = (phys.as_u64() % self.page_size as u64) as usize;
        let map_base = phys.as_u64() - page_off as u64;

        // SAFETY: a fresh shared mapping chosen by the kernel (null hint), so
        // no existing memory is replaced; `map_base` is page aligned.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len + page_off,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &self.fd,
                map_base,
            )
            .map_err(|e| Error::MapFailed(format!("mmap of {phys} failed: {e}")))?
        };

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::MapFailed("mmap returned null".into()))?;
        // SAFETY: the mapping spans `page_off + len` bytes.
        Ok(unsafe { ptr.add(page_off) })
    }

    fn munmap(&self, phys: PhysAddr, addr: *mut u8, len: usize) {
        let page_off = (phys.as_u64() % self.page_size as u64) as usize;
        // SAFETY: `addr - page_off` is the start of a mapping of `len + page_off`
        // bytes created by `mmap` above.
        unsafe {
            if let Err(e) = rustix::mm::munmap(addr.sub(page_off).cast(), len + page_off) {
                tracing::error!(phys = %phys, len, error = %e, "munmap failed");
            }
        }
    }
}

impl IoMapper for DevMem {
    fn map(&self, phys: PhysAddr, len: usize) -> Result<CpuMapping> {
        let ptr = self.mmap(phys, len)?;
        // SAFETY: valid for `len` bytes until `unmap`.
        Ok(unsafe { CpuMapping::from_raw_parts(ptr, len, phys) })
    }

    fn unmap(&self, mapping: CpuMapping) {
        self.munmap(mapping.phys(), mapping.as_ptr(), mapping.len());
    }
}

impl UserMapper for DevMem {
    /// Maps into the calling process.
    ///
    /// The caching policy cannot be chosen through the device file; every
    /// mapping is uncached because of `O_SYNC`, and the returned range says so.
    fn map_user(&self, phys: PhysAddr, len: usize, policy: CachePolicy) -> Result<UserRange> {
        let ptr = self.mmap(phys, len)?;
        if policy != CachePolicy::Uncached {
            tracing::debug!(phys = %phys, len, ?policy, "user mapping falls back to uncached");
        }
        Ok(UserRange {
            addr: ptr.as_ptr() as usize,
            phys,
            len,
            policy: CachePolicy::Uncached,
        })
    }

    fn unmap_user(&self, range: UserRange) {
        self.munmap(range.phys, range.addr as *mut u8, range.len);
    }
}

impl std::fmt::Debug for DevMem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevMem")
            .field("fd", &self.fd.as_raw_fd())
            .field("page_size", &self.page_size)
            .finish()
    }
}
