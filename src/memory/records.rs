//! Bookkeeping for live dynamic allocations.

use super::fallback::DynamicAllocator;
use super::host::CoherentBlock;
use crate::descriptor::PhysAddr;
use std::collections::HashMap;

/// One live dynamically allocated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// The host block, exactly as allocated.
    pub block: CoherentBlock,
    /// Size the consumer asked for.
    pub requested: usize,
    /// Survives bulk teardown (device-lifetime buffers).
    pub persistent: bool,
}

/// Records of live dynamic allocations, keyed by physical address.
///
/// Holds exactly one record per live dynamic buffer.
#[derive(Debug, Default)]
pub struct RecordTracker {
    records: HashMap<PhysAddr, AllocationRecord>,
}

impl RecordTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Returns false, leaving the tracker unchanged, if one
    /// already exists for the address.
    pub fn track(&mut self, record: AllocationRecord) -> bool {
        let phys = record.block.phys;
        if self.records.contains_key(&phys) {
            tracing::error!(phys = %phys, "duplicate allocation record");
            return false;
        }
        self.records.insert(phys, record);
        true
    }

    /// Remove and return the record for `phys`.
    pub fn untrack(&mut self, phys: PhysAddr) -> Option<AllocationRecord> {
        self.records.remove(&phys)
    }

    /// The record for `phys`, if any.
    pub fn get(&self, phys: PhysAddr) -> Option<&AllocationRecord> {
        self.records.get(&phys)
    }

    /// Release every non-persistent record's block and forget it.
    ///
    /// Returns the number of blocks released.
    pub fn free_all(&mut self, dynamic: &DynamicAllocator) -> usize {
        let mut released = 0;
        self.records.retain(|_, record| {
            if record.persistent {
                return true;
            }
            dynamic.free(record.block);
            released += 1;
            false
        });
        released
    }

    /// Snapshot of all records, sorted by physical address.
    pub fn snapshot(&self) -> Vec<AllocationRecord> {
        let mut records: Vec<_> = self.records.values().copied().collect();
        records.sort_by_key(|r| r.block.phys);
        records
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bytes held by live records.
    pub fn total_bytes(&self) -> usize {
        self.records.values().map(|r| r.block.size).sum()
    }
}
