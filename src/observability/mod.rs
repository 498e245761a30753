//! Observability features: metrics and tracing.
//!
//! - **Metrics**: counters and gauges via `metrics-rs`
//! - **Tracing**: structured logging and spans via `tracing`
//!
//! ## Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `parallax_dma_slot_allocations` | Counter | manager, pool | Buffers served from a slot pool |
//! | `parallax_dma_dynamic_allocations` | Counter | manager | Buffers served by the fallback |
//! | `parallax_dma_dynamic_bytes` | Counter | manager | Bytes served by the fallback |
//! | `parallax_dma_fallbacks` | Counter | manager | Requests that found the pool exhausted |
//! | `parallax_dma_frees` | Counter | manager, path | Buffers released |
//! | `parallax_dma_ignored_frees` | Counter | manager | Frees that matched nothing |
//! | `parallax_dma_alloc_failures` | Counter | manager | Failed allocations |
//! | `parallax_dma_slots_available` | Gauge | manager, pool | Free slots |
//! | `parallax_dma_dynamic_records` | Gauge | manager | Live dynamic records |
//!
//! No recorder is installed by this crate; without one every call is a no-op.
//!
//! ## Example
//!
//! ```rust
//! use parallax_dma::observability::init_metrics;
//!
//! init_metrics();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{ManagerMetrics, init_metrics, record_slots_available};
pub use tracing_support::{
    TracingConfig, instrument_alloc, instrument_free, span_alloc, span_free, span_session,
};
