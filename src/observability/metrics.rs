//! Metrics collection using metrics-rs.

use crate::descriptor::PoolKind;
use metrics::{Counter, Gauge, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const SLOT_ALLOCATIONS: &str = "parallax_dma_slot_allocations";
const DYNAMIC_ALLOCATIONS: &str = "parallax_dma_dynamic_allocations";
const DYNAMIC_BYTES: &str = "parallax_dma_dynamic_bytes";
const FALLBACKS: &str = "parallax_dma_fallbacks";
const FREES: &str = "parallax_dma_frees";
const IGNORED_FREES: &str = "parallax_dma_ignored_frees";
const ALLOC_FAILURES: &str = "parallax_dma_alloc_failures";
const SLOTS_AVAILABLE: &str = "parallax_dma_slots_available";
const DYNAMIC_RECORDS: &str = "parallax_dma_dynamic_records";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        SLOT_ALLOCATIONS,
        Unit::Count,
        "Buffers served from a slot pool"
    );
    metrics::describe_counter!(
        DYNAMIC_ALLOCATIONS,
        Unit::Count,
        "Buffers served by the dynamic fallback allocator"
    );
    metrics::describe_counter!(
        DYNAMIC_BYTES,
        Unit::Bytes,
        "Bytes handed out by the dynamic fallback allocator"
    );
    metrics::describe_counter!(
        FALLBACKS,
        Unit::Count,
        "Requests that found the slot pool exhausted"
    );
    metrics::describe_counter!(FREES, Unit::Count, "Buffers released");
    metrics::describe_counter!(
        IGNORED_FREES,
        Unit::Count,
        "Free requests that matched no live buffer"
    );
    metrics::describe_counter!(
        ALLOC_FAILURES,
        Unit::Count,
        "Allocation requests that failed"
    );
    metrics::describe_gauge!(SLOTS_AVAILABLE, Unit::Count, "Free slots per pool");
    metrics::describe_gauge!(
        DYNAMIC_RECORDS,
        Unit::Count,
        "Live dynamic allocation records"
    );
}

/// Record free slots of a pool.
#[inline]
pub fn record_slots_available(manager: u64, pool: PoolKind, available: usize) {
    gauge!(SLOTS_AVAILABLE, "manager" => manager.to_string(), "pool" => pool.as_str())
        .set(available as f64);
}

/// Metrics handles for one buffer manager, with its labels applied.
#[derive(Clone)]
pub struct ManagerMetrics {
    manager: u64,
    general_allocations: Counter,
    internal_allocations: Counter,
    dynamic_allocations: Counter,
    dynamic_bytes: Counter,
    fallbacks: Counter,
    ignored_frees: Counter,
    alloc_failures: Counter,
    dynamic_records: Gauge,
}

impl ManagerMetrics {
    /// Create the handles for manager `manager`.
    pub fn new(manager: u64) -> Self {
        let id = manager.to_string();
        Self {
            manager,
            general_allocations: counter!(SLOT_ALLOCATIONS, "manager" => id.clone(), "pool" => "general"),
            internal_allocations: counter!(SLOT_ALLOCATIONS, "manager" => id.clone(), "pool" => "internal"),
            dynamic_allocations: counter!(DYNAMIC_ALLOCATIONS, "manager" => id.clone()),
            dynamic_bytes: counter!(DYNAMIC_BYTES, "manager" => id.clone()),
            fallbacks: counter!(FALLBACKS, "manager" => id.clone()),
            ignored_frees: counter!(IGNORED_FREES, "manager" => id.clone()),
            alloc_failures: counter!(ALLOC_FAILURES, "manager" => id.clone()),
            dynamic_records: gauge!(DYNAMIC_RECORDS, "manager" => id),
        }
    }

    /// Record a slot handed out.
    #[inline]
    pub fn record_slot_allocation(&self, pool: PoolKind, available: usize) {
        match pool {
            PoolKind::General => self.general_allocations.increment(1),
            PoolKind::Internal => self.internal_allocations.increment(1),
        }
        record_slots_available(self.manager, pool, available);
    }

    /// Record a request that fell through to the dynamic allocator.
    #[inline]
    pub fn record_fallback(&self) {
        self.fallbacks.increment(1);
    }

    /// Record a dynamic buffer handed out.
    #[inline]
    pub fn record_dynamic_allocation(&self, bytes: usize, live_records: usize) {
        self.dynamic_allocations.increment(1);
        self.dynamic_bytes.increment(bytes as u64);
        self.dynamic_records.set(live_records as f64);
    }

    /// Record a released buffer; `path` is the provenance label.
    #[inline]
    pub fn record_free(&self, path: &'static str) {
        counter!(FREES, "manager" => self.manager.to_string(), "path" => path).increment(1);
    }

    /// Record a free request that matched nothing.
    #[inline]
    pub fn record_ignored_free(&self) {
        self.ignored_frees.increment(1);
    }

    /// Record a failed allocation.
    #[inline]
    pub fn record_alloc_failure(&self) {
        self.alloc_failures.increment(1);
    }

    /// Record the number of live dynamic records.
    #[inline]
    pub fn record_dynamic_records(&self, live_records: usize) {
        self.dynamic_records.set(live_records as f64);
    }

    /// Manager id used as the `manager` label.
    pub fn manager(&self) -> u64 {
        self.manager
    }
}

impl std::fmt::Debug for ManagerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerMetrics")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
