//! Integration tests for the buffer protocol.
//!
//! These drive `BufferManager` through its public API on a simulated host
//! and check the allocator's guarantees: slot exclusivity, region
//! containment, the fallback path, bulk teardown and map bounds.

use parallax_dma::descriptor::{DESC_ALLOC, MemDesc, PhysAddr, PoolKind, Provenance};
use parallax_dma::memory::defaults::*;
use parallax_dma::memory::{CpuAccess, FreeOutcome, Region, RegionKind, RegionTable, SimulatedHost};
use parallax_dma::prelude::*;
use std::sync::Arc;
use std::thread;

const KB: usize = 1024;
const MB: usize = 1024 * KB;

fn parallax_manager() -> (BufferManager, SimulatedHost) {
    let config = ManagerConfig::default();
    let host = SimulatedHost::new(&config);
    (BufferManager::new(config, host.host()).unwrap(), host)
}

fn vpu_base() -> PhysAddr {
    PhysAddr(PLAT_PHYS_OFFSET).add(VPU_MEM_OFFS)
}

/// A layout with only a general region of 20 x 128KB slots.
fn small_slot_manager() -> (BufferManager, SimulatedHost) {
    let regions = RegionTable::new(vec![Region::new(
        RegionKind::Vpu,
        vpu_base(),
        20 * 128 * KB,
        128 * KB,
    )])
    .unwrap();
    let config = ManagerConfig::default()
        .with_regions(regions)
        .with_internal_pools(vec![]);
    let host = SimulatedHost::new(&config);
    (BufferManager::new(config, host.host()).unwrap(), host)
}

/// Deterministic pseudo-random sequence for operation mixes.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// Twenty 128KB buffers fill the general region in order; the next one falls
/// back to the dynamic allocator.
#[test]
fn test_general_region_fill_then_fallback() {
    let (manager, _host) = small_slot_manager();

    let tokens: Vec<_> = (0..20).map(|_| manager.allocate(128 * KB).unwrap()).collect();
    for (i, token) in tokens.iter().enumerate() {
        assert_eq!(token.phys(), vpu_base().add(i * 128 * KB));
        assert_eq!(token.provenance(), Provenance::SlotPool(PoolKind::General));
    }

    let extra = manager.allocate(128 * KB).unwrap();
    assert_eq!(extra.provenance(), Provenance::Dynamic);
    assert_eq!(extra.descriptor().to_mem_desc().unwrap().flags, DESC_ALLOC);
    assert_eq!(manager.stats().dynamic_records, 1);
}

/// Both H.264 working buffers come from the internal pool; a third request
/// of the same size is served dynamically.
#[test]
fn test_internal_working_buffers() {
    let (manager, _host) = parallax_manager();
    let hvpu = manager.regions().get(RegionKind::Hvpu).copied().unwrap();

    let first = manager.allocate(HVPU_BUF_SIZE).unwrap();
    let second = manager.allocate(HVPU_BUF_SIZE).unwrap();
    assert_eq!(first.provenance(), Provenance::SlotPool(PoolKind::Internal));
    assert_eq!(second.provenance(), Provenance::SlotPool(PoolKind::Internal));
    assert_eq!(first.phys(), hvpu.base);
    assert_eq!(second.phys(), hvpu.base.add(HVPU_BUF_SIZE));

    let third = manager.allocate(HVPU_BUF_SIZE).unwrap();
    assert_eq!(third.provenance(), Provenance::Dynamic);
    assert_eq!(manager.stats().general_free, VPU_BUF_NUM);
}

/// Freeing a cleared descriptor succeeds and changes nothing.
#[test]
fn test_free_cleared_descriptor() {
    let (manager, host) = parallax_manager();
    let live = manager.allocate(4096).unwrap();
    let before = manager.stats();
    let heap_before = host.heap.stats();

    assert_eq!(manager.free_raw(MemDesc::default()).unwrap(), FreeOutcome::Ignored);

    assert_eq!(manager.stats(), before);
    assert_eq!(host.heap.stats(), heap_before);
    manager.free(live).unwrap();
}

/// Address validation is bounded by the top of DRAM, inclusive.
#[test]
fn test_validate_physical_address() {
    let (manager, _host) = parallax_manager();
    let top = PhysAddr(DRAM_TOP);

    assert!(manager.validate_physical_address(top));
    assert!(!manager.validate_physical_address(top.add(1)));
    assert!(manager.validate_physical_address(PhysAddr(PLAT_PHYS_OFFSET)));
    assert!(manager.validate_physical_address(PhysAddr::NULL));

    assert!(manager.check_hardware_address(top).is_ok());
    assert!(matches!(
        manager.check_hardware_address(top.add(1)),
        Err(Error::StaleHardwareAddress(_))
    ));
}

// ============================================================================
// Properties
// ============================================================================

/// No two live slot-pool buffers ever share an address, and every one lies
/// inside exactly one region of its pool.
#[test]
fn test_slot_exclusivity_and_containment() {
    let (manager, _host) = parallax_manager();
    let sizes = [4096, 64 * KB, VPU_BUF_SIZE, HVPU_BUF_SIZE, DVPU_BUF_SIZE, JVPU_BUF_SIZE];
    let mut rng = Lcg(42);
    let mut live: Vec<BufferToken> = Vec::new();

    for _ in 0..2000 {
        if live.is_empty() || (live.len() < 32 && rng.next() % 3 != 0) {
            let size = sizes[(rng.next() % sizes.len() as u64) as usize];
            match manager.allocate(size) {
                Ok(token) => live.push(token),
                // The fallback window is finite; exhaustion is not a failure here.
                Err(Error::ResourceExhausted { .. }) => {}
                Err(e) => panic!("allocation of {size} failed: {e}"),
            }
        } else {
            let index = (rng.next() % live.len() as u64) as usize;
            let token = live.swap_remove(index);
            assert_eq!(manager.free(token).unwrap(), FreeOutcome::Released);
        }

        let mut phys: Vec<_> = live
            .iter()
            .filter(|t| matches!(t.provenance(), Provenance::SlotPool(_)))
            .map(|t| t.phys())
            .collect();
        let count = phys.len();
        phys.sort();
        phys.dedup();
        assert_eq!(phys.len(), count, "two live slots share an address");
    }

    for token in &live {
        let Provenance::SlotPool(pool) = token.provenance() else {
            continue;
        };
        let regions: Vec<_> = manager
            .regions()
            .iter()
            .filter(|r| r.contains(token.phys()))
            .collect();
        assert_eq!(regions.len(), 1);
        let kind = regions[0].kind;
        match pool {
            PoolKind::General => assert_eq!(kind, RegionKind::Vpu),
            PoolKind::Internal => assert!(matches!(
                kind,
                RegionKind::Hvpu | RegionKind::Jvpu | RegionKind::Dvpu
            )),
        }
        assert!(token.phys().add(token.size()) <= regions[0].end());
    }

    for token in live {
        manager.free(token).unwrap();
    }
    let stats = manager.stats();
    assert_eq!(stats.general_free, stats.general_total);
    assert_eq!(stats.internal_free, stats.internal_total);
    assert_eq!(stats.dynamic_records, 0);
}

/// A second free of the same buffer leaves pool state intact.
#[test]
fn test_double_free_is_harmless() {
    let (manager, host) = parallax_manager();

    let slot = manager.allocate_raw(MemDesc::request(4096)).unwrap();
    let dynamic = manager.allocate_raw(MemDesc::request(3 * MB as u32)).unwrap();
    assert_eq!(dynamic.flags, DESC_ALLOC);

    assert_eq!(manager.free_raw(slot).unwrap(), FreeOutcome::Released);
    assert_eq!(manager.free_raw(slot).unwrap(), FreeOutcome::AlreadyFree);
    assert_eq!(manager.free_raw(dynamic).unwrap(), FreeOutcome::Released);
    assert_eq!(manager.free_raw(dynamic).unwrap(), FreeOutcome::Ignored);

    assert_eq!(manager.stats().general_free, VPU_BUF_NUM);
    assert_eq!(host.carveout.stats().frees, 1);
    assert_eq!(host.carveout.stats().mismatched_frees, 0);
    assert_eq!(host.heap.stats().stray_unmaps, 0);
}

/// A free at an address inside a slot but not at its start is ignored.
#[test]
fn test_misaligned_free_ignored() {
    let (manager, _host) = parallax_manager();
    let token = manager.allocate(4096).unwrap();
    let mut wire = token.descriptor().to_mem_desc().unwrap();
    wire.phys_addr += PAGE_SIZE as u32;

    assert_eq!(manager.free_raw(wire).unwrap(), FreeOutcome::Ignored);
    assert_eq!(manager.stats().general_free, VPU_BUF_NUM - 1);
    assert_eq!(manager.free(token).unwrap(), FreeOutcome::Released);
}

/// Garbled flags are rejected rather than routed to either path.
#[test]
fn test_garbled_flags_rejected() {
    let (manager, _host) = parallax_manager();
    let wire = manager.allocate_raw(MemDesc::request(4096)).unwrap();

    for flags in [0, 0x2, 0x5, 0x7, 0x100] {
        let garbled = MemDesc { flags, ..wire };
        assert!(matches!(
            manager.free_raw(garbled),
            Err(Error::InvalidDescriptor(_))
        ));
    }
    assert_eq!(manager.stats().general_free, VPU_BUF_NUM - 1);
}

/// Allocate followed by free restores every piece of state.
#[test]
fn test_allocate_free_round_trip() {
    let (manager, host) = parallax_manager();
    let stats = manager.stats();
    let heap = host.heap.stats();
    let carveout = host.carveout.stats();

    for size in [1, VPU_BUF_SIZE, HVPU_BUF_SIZE, 3 * MB] {
        let token = manager.allocate(size).unwrap();
        manager.free(token).unwrap();

        assert_eq!(manager.stats(), stats);
        assert_eq!(host.heap.stats().live_mappings, heap.live_mappings);
        assert_eq!(host.carveout.stats().live_blocks, carveout.live_blocks);
        assert!(manager.outstanding().is_empty());
    }
}

/// With the general pool full, small requests are still served.
#[test]
fn test_fallback_when_pool_full() {
    let (manager, _host) = parallax_manager();
    let _held: Vec<_> = (0..VPU_BUF_NUM)
        .map(|_| manager.allocate_with(4096, CpuAccess::Unmapped).unwrap())
        .collect();
    assert_eq!(manager.stats().general_free, 0);

    let token = manager.allocate(4096).unwrap();
    assert_eq!(token.provenance(), Provenance::Dynamic);
    assert_eq!(token.size(), PAGE_SIZE);
    assert!(token.descriptor().cpu.is_some());
}

/// When the fallback also fails the caller sees ResourceExhausted and no
/// state changes.
#[test]
fn test_fallback_exhaustion() {
    let config = ManagerConfig::default()
        .with_fallback_window(PhysAddr(PLAT_PHYS_OFFSET).add(FALLBACK_WINDOW_OFFS), MB);
    let host = SimulatedHost::new(&config);
    let manager = BufferManager::new(config, host.host()).unwrap();
    let before = manager.stats();

    match manager.allocate(3 * MB) {
        Err(Error::ResourceExhausted { size }) => assert_eq!(size, 3 * MB),
        other => panic!("expected ResourceExhausted, got {other:?}"),
    }
    assert_eq!(manager.stats(), before);
}

/// Bulk teardown releases every dynamic buffer exactly once.
#[test]
fn test_free_all_outstanding() {
    let (manager, host) = parallax_manager();
    const N: usize = 7;

    let leaked: Vec<_> = (0..N)
        .map(|i| manager.allocate(VPU_BUF_SIZE + (i + 1) * PAGE_SIZE).unwrap())
        .collect();
    let slot = manager.allocate(4096).unwrap();
    assert_eq!(manager.stats().dynamic_records, N);

    assert_eq!(manager.free_all_outstanding(), N);
    assert_eq!(manager.stats().dynamic_records, 0);
    assert_eq!(manager.stats().dynamic_bytes, 0);
    assert_eq!(host.carveout.stats().frees, N);
    assert_eq!(host.carveout.stats().live_blocks, 0);

    assert_eq!(manager.stats().general_free, VPU_BUF_NUM - 1, "slots untouched");
    assert_eq!(manager.free_all_outstanding(), 0);

    for token in leaked {
        assert_eq!(manager.free(token).unwrap(), FreeOutcome::Ignored);
    }
    assert_eq!(manager.free(slot).unwrap(), FreeOutcome::Released);
}

/// User mappings must stay inside the buffer.
#[test]
fn test_map_bounds() {
    let (manager, host) = parallax_manager();

    for size in [4096, VPU_BUF_SIZE, 3 * MB] {
        let token = manager.allocate(size).unwrap();
        let size = token.size();
        let pages = size / PAGE_SIZE;

        for (offset_pages, len) in [
            (0, size + 1),
            (pages, 1),
            (pages - 1, PAGE_SIZE + 1),
            (usize::MAX / PAGE_SIZE, 1),
            (0, usize::MAX),
        ] {
            assert!(
                matches!(
                    manager.map_for_user_space(&token, offset_pages, len),
                    Err(Error::OutOfRangeMap { .. })
                ),
                "offset {offset_pages} pages, len {len} should be rejected"
            );
        }

        let whole = manager.map_for_user_space(&token, 0, size).unwrap();
        assert_eq!(whole.len(), size);
        assert_eq!(whole.range().phys, token.phys());
        let tail = manager.map_for_user_space(&token, pages - 1, PAGE_SIZE).unwrap();
        assert_eq!(tail.range().phys, token.phys().add(size - PAGE_SIZE));
        drop(whole);
        drop(tail);

        manager.free(token).unwrap();
    }

    let stats = host.heap.stats();
    assert_eq!(stats.user_maps, stats.user_unmaps);
}

/// Raw map requests must name a live buffer.
#[test]
fn test_map_raw_rejects_garbage() {
    let (manager, _host) = parallax_manager();
    assert!(matches!(
        manager.map_raw(&MemDesc::default(), 0, 4096),
        Err(Error::InvalidDescriptor(_))
    ));

    let wire = manager.allocate_raw(MemDesc::request(4096)).unwrap();
    let bogus = MemDesc {
        phys_addr: wire.phys_addr + 0x10_0000,
        ..wire
    };
    assert!(matches!(
        manager.map_raw(&bogus, 0, 4096),
        Err(Error::InvalidDescriptor(_))
    ));
    assert!(manager.map_raw(&wire, 0, 4096).is_ok());
}

/// Requests too large to round up to whole pages never take a slot.
#[test]
fn test_oversized_request_rejected() {
    let (manager, host) = parallax_manager();

    for size in [usize::MAX, usize::MAX - 100] {
        assert!(matches!(manager.allocate(size), Err(Error::InvalidRequest(_))));
    }
    assert!(manager.allocate_raw(MemDesc::request(u32::MAX)).is_err());
    assert!(manager.allocate_raw(MemDesc::request(0xFFFF_F001)).is_err());

    let stats = manager.stats();
    assert_eq!(stats.general_free, VPU_BUF_NUM);
    assert_eq!(stats.internal_free, stats.internal_total);
    assert_eq!(stats.dynamic_records, 0);
    assert_eq!(host.carveout.stats().live_blocks, 0);
}

/// A window whose end runs off the address space is refused, not mapped.
#[test]
fn test_window_length_overflow() {
    let (manager, host) = parallax_manager();
    assert!(matches!(
        manager.map_window(PhysAddr(DRAM_TOP), usize::MAX),
        Err(Error::InvalidRequest(_) | Error::StaleHardwareAddress(_))
    ));
    assert!(manager.map_window(vpu_base(), usize::MAX / 2).is_err());
    assert_eq!(host.heap.stats().live_mappings, 0);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Concurrent consumers never receive the same slot.
#[test]
fn test_concurrent_allocate_free() {
    let (manager, host) = parallax_manager();
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let mut rng = Lcg(t);
                let mut seen = Vec::new();
                for _ in 0..200 {
                    let size = if rng.next() % 4 == 0 { 2 * VPU_BUF_SIZE } else { 4096 };
                    let mut token = manager.allocate(size).unwrap();
                    // Stamp the buffer; a shared slot would be overwritten.
                    let stamp = (t as u8).wrapping_add(1);
                    unsafe {
                        token.as_mut_slice().unwrap()[0] = stamp;
                    }
                    thread::yield_now();
                    unsafe {
                        assert_eq!(token.as_slice().unwrap()[0], stamp);
                    }
                    seen.push(token.phys());
                    manager.free(token).unwrap();
                }
                seen.len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 200);
    }

    let stats = manager.stats();
    assert_eq!(stats.general_free, stats.general_total);
    assert_eq!(stats.dynamic_records, 0);
    assert_eq!(host.heap.stats().live_mappings, 0);
}
