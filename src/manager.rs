//! The public buffer protocol.
//!
//! [`BufferManager`] is the single entry point consumers use. It owns the
//! slot pools and the dynamic allocation records behind one coarse lock, and
//! picks the allocation path:
//!
//! ```text
//! allocate(size)
//!     │
//!     ├─► SlotPool::allocate ── Ok ──────────────► token (SlotPool(pool))
//!     │         │
//!     │    PoolExhausted
//!     │         ▼
//!     └─► DynamicAllocator::allocate ── Ok ──► track record ─► token (Dynamic)
//!                     │
//!              ResourceExhausted ──────────────► error to caller
//! ```
//!
//! Freeing dispatches on the provenance carried by the descriptor, never by
//! probing the pools.

use crate::config::ManagerConfig;
use crate::descriptor::{
    BufferDescriptor, BufferToken, CpuAddr, MemDesc, PhysAddr, PoolKind, Provenance,
};
use crate::error::{Error, Result};
use crate::memory::defaults::page_align;
use crate::memory::{
    AllocationRecord, CachePolicy, CpuAccess, DynamicAllocator, FreeOutcome, Host, RecordTracker,
    RegionTable, SlotPool, UserMapping,
};
use crate::observability::{ManagerMetrics, instrument_alloc, instrument_free};
use crate::window::StaticWindow;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Occupancy snapshot of a buffer manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Free general slots.
    pub general_free: usize,
    /// Total general slots.
    pub general_total: usize,
    /// Free internal slots.
    pub internal_free: usize,
    /// Total internal slots.
    pub internal_total: usize,
    /// Live dynamic allocation records.
    pub dynamic_records: usize,
    /// Bytes held by live dynamic allocations.
    pub dynamic_bytes: usize,
}

/// Mutable allocator state, guarded by the manager lock.
#[derive(Debug)]
struct State {
    pool: SlotPool,
    records: RecordTracker,
}

/// Physical buffer manager for one device.
///
/// All pool and record state sits behind a single mutex. Nothing under the
/// lock waits on hardware.
///
/// # Example
///
/// ```rust
/// use parallax_dma::config::ManagerConfig;
/// use parallax_dma::manager::BufferManager;
/// use parallax_dma::memory::{FreeOutcome, SimulatedHost};
///
/// let config = ManagerConfig::default();
/// let host = SimulatedHost::new(&config);
/// let manager = BufferManager::new(config, host.host()).unwrap();
///
/// let token = manager.allocate(64 * 1024).unwrap();
/// assert!(manager.validate_physical_address(token.phys()));
/// assert_eq!(manager.free(token).unwrap(), FreeOutcome::Released);
/// ```
pub struct BufferManager {
    id: u64,
    config: ManagerConfig,
    host: Host,
    dynamic: DynamicAllocator,
    state: Mutex<State>,
    metrics: ManagerMetrics,
}

impl BufferManager {
    /// Create a manager over `host` with the given layout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is inconsistent.
    pub fn new(config: ManagerConfig, host: Host) -> Result<Self> {
        config.validate()?;
        let pool = SlotPool::new(
            &config.regions,
            config.general_pool,
            &config.internal_pools,
            config.page_size,
        )?;
        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        let dynamic = DynamicAllocator::new(host.coherent.clone(), config.page_size);

        tracing::info!(
            manager = id,
            general_slots = pool.occupancy(PoolKind::General).1,
            internal_slots = pool.occupancy(PoolKind::Internal).1,
            dram_top = %config.dram_top,
            "buffer manager created"
        );

        Ok(Self {
            id,
            config,
            host,
            dynamic,
            state: Mutex::new(State {
                pool,
                records: RecordTracker::new(),
            }),
            metrics: ManagerMetrics::new(id),
        })
    }

    /// Unique id of this manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The region table.
    pub fn regions(&self) -> &RegionTable {
        &self.config.regions
    }

    /// Allocate a CPU-mapped buffer of at least `size` bytes.
    ///
    /// Tries the slot pool first and falls back to the dynamic allocator
    /// when it is exhausted.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a zero-byte request or one that cannot be
    ///   rounded up to whole pages.
    /// - `ResourceExhausted` when both paths fail.
    /// - `MapFailed` when the slot's CPU mapping could not be made.
    pub fn allocate(&self, size: usize) -> Result<BufferToken> {
        self.allocate_inner(size, CpuAccess::Mapped, false)
    }

    /// Allocate a buffer, choosing whether slot-pool buffers get a CPU mapping.
    ///
    /// Dynamic buffers always come with the host's coherent mapping.
    pub fn allocate_with(&self, size: usize, access: CpuAccess) -> Result<BufferToken> {
        self.allocate_inner(size, access, false)
    }

    /// Allocate a buffer that survives [`free_all_outstanding`](Self::free_all_outstanding).
    ///
    /// Used for device-lifetime buffers such as the codec work buffer.
    pub fn allocate_persistent(&self, size: usize) -> Result<BufferToken> {
        self.allocate_inner(size, CpuAccess::Mapped, true)
    }

    fn allocate_inner(&self, size: usize, access: CpuAccess, persistent: bool) -> Result<BufferToken> {
        let _span = instrument_alloc(&self.config.tracing, self.id, size);

        if size == 0 {
            self.metrics.record_alloc_failure();
            return Err(Error::InvalidRequest("zero-byte allocation".into()));
        }
        if page_align(size, self.config.page_size).is_none() {
            self.metrics.record_alloc_failure();
            return Err(Error::InvalidRequest(format!(
                "allocation of {size} bytes overflows page rounding"
            )));
        }

        let mut state = self.state.lock().unwrap();

        let desc = match state.pool.allocate(size, access, &*self.host.io) {
            Ok(grant) => {
                let available = state.pool.occupancy(grant.pool).0;
                self.metrics.record_slot_allocation(grant.pool, available);
                BufferDescriptor {
                    size: grant.size,
                    phys: grant.phys,
                    cpu: grant.cpu,
                    provenance: Provenance::SlotPool(grant.pool),
                }
            }
            Err(Error::PoolExhausted) => {
                self.metrics.record_fallback();
                let block = match self.dynamic.allocate(size) {
                    Ok(block) => block,
                    Err(e) => {
                        self.metrics.record_alloc_failure();
                        tracing::warn!(manager = self.id, size, error = %e, "allocation failed");
                        return Err(e);
                    }
                };

                let record = AllocationRecord {
                    block,
                    requested: size,
                    persistent,
                };
                if !state.records.track(record) {
                    self.dynamic.free(block);
                    self.metrics.record_alloc_failure();
                    return Err(Error::InvalidDescriptor(format!(
                        "host returned live address {}",
                        block.phys
                    )));
                }
                self.metrics
                    .record_dynamic_allocation(block.size, state.records.len());

                BufferDescriptor {
                    size: block.size,
                    phys: block.phys,
                    cpu: Some(block.cpu),
                    provenance: Provenance::Dynamic,
                }
            }
            Err(e) => {
                self.metrics.record_alloc_failure();
                tracing::error!(manager = self.id, size, error = %e, "slot allocation failed");
                return Err(e);
            }
        };

        tracing::debug!(
            manager = self.id,
            phys = %desc.phys,
            size = desc.size,
            path = desc.provenance.as_str(),
            persistent,
            "buffer allocated"
        );
        Ok(BufferToken::new(desc, self.id))
    }

    /// Allocate from a wire request and return the filled-in wire descriptor.
    ///
    /// The request's flags must be zero; only its size is read. The buffer
    /// is released with [`free_raw`](Self::free_raw).
    ///
    /// # Errors
    ///
    /// As [`allocate`](Self::allocate), plus `InvalidDescriptor` for
    /// non-zero input flags or a buffer that does not fit the wire format.
    pub fn allocate_raw(&self, request: MemDesc) -> Result<MemDesc> {
        if request.flags != 0 {
            return Err(Error::InvalidDescriptor(format!(
                "allocate request carries flags {:#x}",
                request.flags
            )));
        }
        let token = self.allocate(request.size as usize)?;
        match token.descriptor().to_mem_desc() {
            Ok(wire) => {
                let _ = token.into_descriptor();
                Ok(wire)
            }
            Err(e) => {
                self.free(token)?;
                Err(e)
            }
        }
    }

    /// Free a buffer.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` if the token was issued by another manager.
    pub fn free(&self, token: BufferToken) -> Result<FreeOutcome> {
        if token.owner() != self.id {
            return Err(Error::InvalidDescriptor(format!(
                "token for {} was issued by manager {}, not {}",
                token.phys(),
                token.owner(),
                self.id
            )));
        }
        let desc = token.into_descriptor();
        self.release(desc.phys, desc.provenance)
    }

    /// Free a buffer named by a wire descriptor.
    ///
    /// A zero physical address is a no-op. Size and CPU address are ignored;
    /// the release uses the values recorded at allocation.
    ///
    /// # Errors
    ///
    /// `InvalidDescriptor` for flags no allocation path produces, or flags
    /// naming a different pool than the slot at the address.
    pub fn free_raw(&self, desc: MemDesc) -> Result<FreeOutcome> {
        let phys = desc.phys();
        if phys.is_null() {
            tracing::debug!(manager = self.id, "free of cleared descriptor ignored");
            return Ok(FreeOutcome::Ignored);
        }
        match Provenance::from_flags(desc.flags)? {
            Some(provenance) => self.release(phys, provenance),
            None => Err(Error::InvalidDescriptor(format!(
                "descriptor for {phys} carries no provenance flags"
            ))),
        }
    }

    fn release(&self, phys: PhysAddr, provenance: Provenance) -> Result<FreeOutcome> {
        let _span = instrument_free(&self.config.tracing, self.id, phys);
        let mut state = self.state.lock().unwrap();

        let outcome = match provenance {
            Provenance::SlotPool(kind) => match state.pool.find(phys).map(|s| s.pool()) {
                Some(actual) if actual != kind => {
                    return Err(Error::InvalidDescriptor(format!(
                        "{phys} is a {} slot, descriptor says {}",
                        actual.as_str(),
                        kind.as_str()
                    )));
                }
                Some(_) => state.pool.free(phys, &*self.host.io),
                None => FreeOutcome::Ignored,
            },
            Provenance::Dynamic => match state.records.untrack(phys) {
                Some(record) => {
                    self.dynamic.free(record.block);
                    self.metrics.record_dynamic_records(state.records.len());
                    FreeOutcome::Released
                }
                None => FreeOutcome::Ignored,
            },
        };

        match outcome {
            FreeOutcome::Released => {
                self.metrics.record_free(provenance.as_str());
                if let Provenance::SlotPool(kind) = provenance {
                    crate::observability::record_slots_available(
                        self.id,
                        kind,
                        state.pool.occupancy(kind).0,
                    );
                }
            }
            FreeOutcome::AlreadyFree => {
                self.metrics.record_ignored_free();
                tracing::warn!(manager = self.id, phys = %phys, "double free of slot ignored");
            }
            FreeOutcome::Ignored => {
                self.metrics.record_ignored_free();
                let region = self
                    .config
                    .regions
                    .containing(phys)
                    .map(|r| r.kind.as_str())
                    .unwrap_or("none");
                tracing::warn!(
                    manager = self.id,
                    phys = %phys,
                    path = provenance.as_str(),
                    region,
                    "free matched no live buffer"
                );
            }
        }
        Ok(outcome)
    }

    /// Release every non-persistent dynamic buffer.
    ///
    /// Slot-pool buffers are untouched; their owners free them explicitly.
    /// Returns the number of buffers released.
    pub fn free_all_outstanding(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let released = state.records.free_all(&self.dynamic);
        self.metrics.record_dynamic_records(state.records.len());
        if released > 0 {
            tracing::info!(manager = self.id, released, "outstanding dynamic buffers freed");
        }
        released
    }

    /// Map `len` bytes of a buffer, starting `offset_pages` pages in, into
    /// user space with a write-combining mapping.
    ///
    /// # Errors
    ///
    /// - `InvalidDescriptor` if the buffer is no longer live.
    /// - `OutOfRangeMap` if the range reaches past the end of the buffer.
    /// - `MapFailed` from the host.
    pub fn map_for_user_space(
        &self,
        token: &BufferToken,
        offset_pages: usize,
        len: usize,
    ) -> Result<UserMapping> {
        if token.owner() != self.id {
            return Err(Error::InvalidDescriptor(format!(
                "token for {} was issued by manager {}",
                token.phys(),
                token.owner()
            )));
        }
        self.map_live(token.phys(), token.provenance(), offset_pages, len)
    }

    /// [`map_for_user_space`](Self::map_for_user_space) for a wire descriptor.
    ///
    /// A zero address or flags no allocation path produces are rejected.
    pub fn map_raw(&self, desc: &MemDesc, offset_pages: usize, len: usize) -> Result<UserMapping> {
        let phys = desc.phys();
        let provenance = Provenance::from_flags(desc.flags)?.filter(|_| !phys.is_null());
        let Some(provenance) = provenance else {
            return Err(Error::InvalidDescriptor(format!(
                "cannot map unallocated descriptor at {phys}"
            )));
        };
        self.map_live(phys, provenance, offset_pages, len)
    }

    fn map_live(
        &self,
        phys: PhysAddr,
        provenance: Provenance,
        offset_pages: usize,
        len: usize,
    ) -> Result<UserMapping> {
        let size = self.live_size(phys, provenance).ok_or_else(|| {
            Error::InvalidDescriptor(format!("no live {} buffer at {phys}", provenance.as_str()))
        })?;

        let offset = offset_pages.saturating_mul(self.config.page_size);
        let in_range = offset_pages
            .checked_mul(self.config.page_size)
            .and_then(|o| o.checked_add(len))
            .is_some_and(|end| end <= size);
        if !in_range {
            return Err(Error::OutOfRangeMap { offset, len, size });
        }
        if len == 0 {
            return Err(Error::InvalidRequest("zero-length user mapping".into()));
        }

        let range = self
            .host
            .user
            .map_user(phys.add(offset), len, CachePolicy::WriteCombine)?;
        tracing::debug!(
            manager = self.id,
            phys = %range.phys,
            len,
            user_addr = range.addr,
            "mapped for user space"
        );
        Ok(UserMapping::new(range, self.host.user.clone()))
    }

    /// Size of the live buffer at `phys`, if `provenance` matches it.
    fn live_size(&self, phys: PhysAddr, provenance: Provenance) -> Option<usize> {
        let state = self.state.lock().unwrap();
        match provenance {
            Provenance::SlotPool(kind) => state
                .pool
                .find(phys)
                .filter(|s| !s.is_free() && s.pool() == kind)
                .map(|s| s.size()),
            Provenance::Dynamic => state.records.get(phys).map(|r| r.block.size),
        }
    }

    /// Whether `addr` is at or below the top of DRAM.
    ///
    /// This is a gross sanity bound, not proof that `addr` belongs to a live
    /// buffer.
    pub fn validate_physical_address(&self, addr: PhysAddr) -> bool {
        addr <= self.config.dram_top
    }

    /// [`validate_physical_address`](Self::validate_physical_address) as a
    /// `Result`, for call sites about to program a DMA engine.
    ///
    /// # Errors
    ///
    /// `StaleHardwareAddress` if `addr` is above the top of DRAM.
    pub fn check_hardware_address(&self, addr: PhysAddr) -> Result<()> {
        if self.validate_physical_address(addr) {
            Ok(())
        } else {
            tracing::error!(manager = self.id, phys = %addr, "stale hardware address");
            Err(Error::StaleHardwareAddress(addr))
        }
    }

    /// Map a fixed hardware window (capture frame, framebuffer surface).
    ///
    /// Windows are outside the allocator's bookkeeping.
    ///
    /// # Errors
    ///
    /// `StaleHardwareAddress` if the window reaches above DRAM,
    /// `InvalidRequest` if its end overflows the address space, `MapFailed`
    /// from the host.
    pub fn map_window(&self, addr: PhysAddr, len: usize) -> Result<StaticWindow> {
        self.check_hardware_address(addr)?;
        let last = addr.checked_add(len.saturating_sub(1)).ok_or_else(|| {
            Error::InvalidRequest(format!("window of {len} bytes at {addr} overflows"))
        })?;
        self.check_hardware_address(last)?;
        let mapping = self.host.io.map(addr, len)?;
        Ok(StaticWindow::new(mapping, self.host.io.clone()))
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock().unwrap();
        let (general_free, general_total) = state.pool.occupancy(PoolKind::General);
        let (internal_free, internal_total) = state.pool.occupancy(PoolKind::Internal);
        BufferStats {
            general_free,
            general_total,
            internal_free,
            internal_total,
            dynamic_records: state.records.len(),
            dynamic_bytes: state.records.total_bytes(),
        }
    }

    /// Live dynamic allocation records, sorted by physical address.
    pub fn outstanding(&self) -> Vec<AllocationRecord> {
        self.state.lock().unwrap().records.snapshot()
    }

    /// CPU address of the live buffer at `phys`, if it has one.
    pub fn cpu_address(&self, phys: PhysAddr) -> Option<CpuAddr> {
        let state = self.state.lock().unwrap();
        state
            .pool
            .find(phys)
            .and_then(|s| s.cpu())
            .or_else(|| state.records.get(phys).map(|r| r.block.cpu))
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DESC_ALLOC;
    use crate::memory::defaults::*;
    use crate::memory::SimulatedHost;

    fn manager() -> (BufferManager, SimulatedHost) {
        let config = ManagerConfig::default();
        let host = SimulatedHost::new(&config);
        (BufferManager::new(config, host.host()).unwrap(), host)
    }

    #[test]
    fn test_small_request_uses_general_pool() {
        let (manager, _host) = manager();
        let token = manager.allocate(1000).unwrap();
        assert_eq!(token.provenance(), Provenance::SlotPool(PoolKind::General));
        assert_eq!(token.size(), VPU_BUF_SIZE);
        assert!(token.descriptor().cpu.is_some());
        assert_eq!(manager.stats().general_free, VPU_BUF_NUM - 1);
        assert_eq!(manager.free(token).unwrap(), FreeOutcome::Released);
        assert_eq!(manager.stats().general_free, VPU_BUF_NUM);
    }

    #[test]
    fn test_large_request_goes_dynamic() {
        let (manager, host) = manager();
        let token = manager.allocate(VPU_BUF_SIZE + 1).unwrap();
        assert_eq!(token.provenance(), Provenance::Dynamic);
        assert_eq!(token.size(), VPU_BUF_SIZE + PAGE_SIZE);
        assert_eq!(manager.stats().dynamic_records, 1);
        assert_eq!(host.carveout.stats().live_blocks, 1);

        assert_eq!(manager.free(token).unwrap(), FreeOutcome::Released);
        assert_eq!(manager.stats().dynamic_records, 0);
        assert_eq!(host.carveout.stats().live_blocks, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let (manager, _host) = manager();
        assert!(matches!(manager.allocate(0), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_unroundable_size_rejected() {
        let (manager, host) = manager();
        for size in [usize::MAX, usize::MAX - 100, usize::MAX - PAGE_SIZE + 2] {
            assert!(matches!(manager.allocate(size), Err(Error::InvalidRequest(_))));
        }
        let stats = manager.stats();
        assert_eq!(stats.general_free, VPU_BUF_NUM);
        assert_eq!(stats.dynamic_records, 0);
        assert_eq!(host.carveout.stats().live_blocks, 0);
    }

    #[test]
    fn test_foreign_token_rejected() {
        let (a, _ha) = manager();
        let (b, _hb) = manager();
        let token = a.allocate(4096).unwrap();
        assert!(matches!(b.map_for_user_space(&token, 0, 4096), Err(Error::InvalidDescriptor(_))));
        assert!(matches!(b.free(token), Err(Error::InvalidDescriptor(_))));
        assert_eq!(a.stats().general_free, VPU_BUF_NUM - 1);
    }

    #[test]
    fn test_free_raw_dispatch() {
        let (manager, _host) = manager();
        let wire = manager.allocate_raw(MemDesc::request(4096)).unwrap();
        assert_ne!(wire.cpu_addr, 0);
        assert_eq!(manager.free_raw(wire).unwrap(), FreeOutcome::Released);
        assert_eq!(manager.free_raw(wire).unwrap(), FreeOutcome::AlreadyFree);

        // Same address, wrong path: matches no record.
        let mut wrong = wire;
        wrong.flags = DESC_ALLOC;
        assert_eq!(manager.free_raw(wrong).unwrap(), FreeOutcome::Ignored);
    }

    #[test]
    fn test_free_raw_pool_mismatch() {
        let (manager, _host) = manager();
        let wire = manager.allocate_raw(MemDesc::request(4096)).unwrap();
        let mut internal = wire;
        internal.flags = Provenance::SlotPool(PoolKind::Internal).to_flags();
        assert!(matches!(manager.free_raw(internal), Err(Error::InvalidDescriptor(_))));
        assert_eq!(manager.stats().general_free, VPU_BUF_NUM - 1);
    }

    #[test]
    fn test_allocate_raw_rejects_flags() {
        let (manager, _host) = manager();
        let mut request = MemDesc::request(4096);
        request.flags = DESC_ALLOC;
        assert!(manager.allocate_raw(request).is_err());
    }

    #[test]
    fn test_persistent_survives_bulk_free() {
        let (manager, _host) = manager();
        let big = VPU_BUF_SIZE * 2;
        let persistent = manager.allocate_persistent(big).unwrap();
        let _leaked = manager.allocate(big).unwrap();

        assert_eq!(manager.free_all_outstanding(), 1);
        let outstanding = manager.outstanding();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].block.phys, persistent.phys());
        assert!(outstanding[0].persistent);
    }

    #[test]
    fn test_stale_token_after_bulk_free() {
        let (manager, _host) = manager();
        let token = manager.allocate(VPU_BUF_SIZE * 3).unwrap();
        manager.free_all_outstanding();

        assert!(matches!(
            manager.map_for_user_space(&token, 0, PAGE_SIZE),
            Err(Error::InvalidDescriptor(_))
        ));
        assert_eq!(manager.free(token).unwrap(), FreeOutcome::Ignored);
    }

    #[test]
    fn test_cpu_address_lookup() {
        let (manager, _host) = manager();
        let slot = manager.allocate(4096).unwrap();
        let dynamic = manager.allocate(VPU_BUF_SIZE * 2).unwrap();
        assert_eq!(manager.cpu_address(slot.phys()), slot.descriptor().cpu);
        assert_eq!(manager.cpu_address(dynamic.phys()), dynamic.descriptor().cpu);
        assert_eq!(manager.cpu_address(PhysAddr(0x1234_5000)), None);
    }

    #[test]
    fn test_map_window_bounds() {
        let (manager, host) = manager();
        let top = manager.config().dram_top;
        assert!(matches!(
            manager.map_window(top, 2 * PAGE_SIZE),
            Err(Error::StaleHardwareAddress(_))
        ));

        let window = manager.map_window(PhysAddr(PLAT_PHYS_OFFSET), PAGE_SIZE).unwrap();
        assert_eq!(window.len(), PAGE_SIZE);
        assert_eq!(host.heap.stats().live_mappings, 1);
        drop(window);
        assert_eq!(host.heap.stats().live_mappings, 0);
    }

    #[test]
    fn test_map_window_oversized_len() {
        let (manager, host) = manager();
        for addr in [manager.config().dram_top, PhysAddr(PLAT_PHYS_OFFSET)] {
            assert!(matches!(
                manager.map_window(addr, usize::MAX),
                Err(Error::InvalidRequest(_) | Error::StaleHardwareAddress(_))
            ));
        }
        assert_eq!(host.heap.stats().live_mappings, 0);
    }
}
