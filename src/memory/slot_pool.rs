//! Fixed-size slot pools over reserved regions.

use super::defaults::page_align;
use super::host::{CpuMapping, IoMapper};
use super::region::{RegionKind, RegionTable};
use crate::descriptor::{CpuAddr, PhysAddr, PoolKind};
use crate::error::{Error, Result};

/// Allocation state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available for allocation.
    Free,
    /// Handed out to a consumer.
    Allocated,
}

/// Whether an allocation needs a CPU mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuAccess {
    /// Establish a CPU mapping for software access.
    #[default]
    Mapped,
    /// Hardware-only buffer; no CPU mapping.
    Unmapped,
}

/// Result of a free request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The buffer was released.
    Released,
    /// The slot was already free; nothing changed.
    AlreadyFree,
    /// No buffer matched; nothing changed.
    Ignored,
}

/// One fixed-size subdivision of a region.
#[derive(Debug)]
pub struct Slot {
    phys: PhysAddr,
    size: usize,
    pool: PoolKind,
    region: RegionKind,
    state: SlotState,
    /// Present only while allocated with CPU access.
    mapping: Option<CpuMapping>,
}

impl Slot {
    fn new(phys: PhysAddr, size: usize, pool: PoolKind, region: RegionKind) -> Self {
        Self {
            phys,
            size,
            pool,
            region,
            state: SlotState::Free,
            mapping: None,
        }
    }

    /// Physical address of the slot.
    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    /// Slot size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pool the slot belongs to.
    pub fn pool(&self) -> PoolKind {
        self.pool
    }

    /// Region the slot was carved from.
    pub fn region(&self) -> RegionKind {
        self.region
    }

    /// Current state.
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Whether the slot can be allocated.
    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    /// CPU address of the live mapping, if any.
    pub fn cpu(&self) -> Option<CpuAddr> {
        self.mapping.as_ref().map(CpuMapping::addr)
    }
}

/// A slot handed out by [`SlotPool::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGrant {
    /// Physical address of the slot.
    pub phys: PhysAddr,
    /// Slot size in bytes.
    pub size: usize,
    /// Pool the slot came from.
    pub pool: PoolKind,
    /// CPU mapping, when requested.
    pub cpu: Option<CpuAddr>,
}

/// Slot allocator over one general region and any number of internal
/// fixed-purpose regions.
///
/// # Allocation policy
///
/// Request sizes are rounded up to whole pages, then:
///
/// 1. A request larger than a general slot is matched against the internal
///    pool, first free slot whose size equals the request exactly.
/// 2. A request no larger than a general slot takes the first free general
///    slot.
/// 3. Anything else is `PoolExhausted`; no coalescing of general slots.
///
/// A request that fits a general slot never takes an idle internal slot,
/// which keeps the codec working sets available for the codec.
///
/// Scanning is linear in declaration order. Callers serialize access.
#[derive(Debug)]
pub struct SlotPool {
    internal: Vec<Slot>,
    general: Vec<Slot>,
    general_slot_size: usize,
    page_size: usize,
}

impl SlotPool {
    /// Build pools from regions of `table`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a named region is missing or has no slots.
    pub fn new(
        table: &RegionTable,
        general: RegionKind,
        internal: &[RegionKind],
        page_size: usize,
    ) -> Result<Self> {
        let general_region = table
            .get(general)
            .ok_or_else(|| Error::InvalidConfig(format!("no {general} region for general pool")))?;
        if general_region.slot_count() == 0 {
            return Err(Error::InvalidConfig(format!(
                "general pool region {general} has no slots"
            )));
        }

        let general_slots = (0..general_region.slot_count())
            .filter_map(|i| general_region.slot_addr(i))
            .map(|phys| Slot::new(phys, general_region.slot_size, PoolKind::General, general))
            .collect();

        let mut internal_slots = Vec::new();
        for &kind in internal {
            let region = table
                .get(kind)
                .ok_or_else(|| Error::InvalidConfig(format!("no {kind} region for internal pool")))?;
            if region.slot_count() == 0 {
                return Err(Error::InvalidConfig(format!(
                    "internal pool region {kind} has no slots"
                )));
            }
            internal_slots.extend(
                (0..region.slot_count())
                    .filter_map(|i| region.slot_addr(i))
                    .map(|phys| Slot::new(phys, region.slot_size, PoolKind::Internal, kind)),
            );
        }

        Ok(Self {
            internal: internal_slots,
            general: general_slots,
            general_slot_size: general_region.slot_size,
            page_size,
        })
    }

    /// Allocate a slot for a `size`-byte request.
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` if no free slot matches the request class.
    /// - `MapFailed` if a CPU mapping was requested and could not be made;
    ///   the slot stays free.
    pub fn allocate(
        &mut self,
        size: usize,
        access: CpuAccess,
        io: &dyn IoMapper,
    ) -> Result<SlotGrant> {
        let size = page_align(size, self.page_size).ok_or(Error::PoolExhausted)?;

        let slot = if size > self.general_slot_size {
            self.internal
                .iter_mut()
                .find(|s| s.is_free() && s.size == size)
        } else {
            self.general.iter_mut().find(|s| s.is_free())
        }
        .ok_or(Error::PoolExhausted)?;

        if access == CpuAccess::Mapped {
            slot.mapping = Some(io.map(slot.phys, slot.size)?);
        }
        slot.state = SlotState::Allocated;

        tracing::debug!(
            pool = slot.pool.as_str(),
            region = %slot.region,
            phys = %slot.phys,
            size,
            "slot allocated"
        );

        Ok(SlotGrant {
            phys: slot.phys,
            size: slot.size,
            pool: slot.pool,
            cpu: slot.cpu(),
        })
    }

    /// Free the slot at exactly `phys`, searching both pools.
    ///
    /// The CPU mapping, if any, is torn down before the slot becomes free.
    /// An address that matches no slot start is `Ignored`: it belongs to the
    /// dynamic path or is a miscomputed address.
    pub fn free(&mut self, phys: PhysAddr, io: &dyn IoMapper) -> FreeOutcome {
        let Some(slot) = self
            .internal
            .iter_mut()
            .chain(self.general.iter_mut())
            .find(|s| s.phys == phys)
        else {
            return FreeOutcome::Ignored;
        };

        if slot.is_free() {
            return FreeOutcome::AlreadyFree;
        }

        if let Some(mapping) = slot.mapping.take() {
            io.unmap(mapping);
        }
        slot.state = SlotState::Free;

        tracing::debug!(
            pool = slot.pool.as_str(),
            region = %slot.region,
            phys = %slot.phys,
            "slot freed"
        );
        FreeOutcome::Released
    }

    /// The slot starting at `phys`, if any.
    pub fn find(&self, phys: PhysAddr) -> Option<&Slot> {
        self.slots().find(|s| s.phys == phys)
    }

    /// All slots, internal pool first.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.internal.iter().chain(self.general.iter())
    }

    /// Size of one general slot.
    pub fn general_slot_size(&self) -> usize {
        self.general_slot_size
    }

    /// Free and total slots of one pool.
    pub fn occupancy(&self, pool: PoolKind) -> (usize, usize) {
        let slots = match pool {
            PoolKind::General => &self.general,
            PoolKind::Internal => &self.internal,
        };
        (slots.iter().filter(|s| s.is_free()).count(), slots.len())
    }
}
