//! Tracing integration for structured logging and spans.

use crate::descriptor::PhysAddr;
use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Whether to create spans around allocation.
    pub alloc_spans: bool,
    /// Whether to create spans around free and teardown.
    pub free_spans: bool,
    /// Whether to create spans for device sessions.
    pub session_spans: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            alloc_spans: false,
            free_spans: false,
            session_spans: true,
        }
    }
}

impl TracingConfig {
    /// All spans enabled.
    pub fn all() -> Self {
        Self {
            alloc_spans: true,
            free_spans: true,
            session_spans: true,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            alloc_spans: false,
            free_spans: false,
            session_spans: false,
        }
    }
}

/// Create a span for one allocation request.
///
/// # Example
///
/// ```rust
/// use parallax_dma::observability::span_alloc;
///
/// let span = span_alloc(1, 4096);
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_alloc(manager: u64, size: usize) -> Span {
    span!(Level::DEBUG, "dma_alloc", manager, size)
}

/// Create a span for one free request.
#[inline]
pub fn span_free(manager: u64, phys: PhysAddr) -> Span {
    span!(Level::DEBUG, "dma_free", manager, phys = %phys)
}

/// Create a span for a device session.
#[inline]
pub fn span_session(manager: u64, session: u64) -> Span {
    span!(Level::INFO, "vpu_session", manager, session)
}

/// Enter an allocation span if `config` asks for one.
pub fn instrument_alloc(
    config: &TracingConfig,
    manager: u64,
    size: usize,
) -> tracing::span::EnteredSpan {
    if config.alloc_spans {
        span_alloc(manager, size).entered()
    } else {
        Span::none().entered()
    }
}

/// Enter a free span if `config` asks for one.
pub fn instrument_free(
    config: &TracingConfig,
    manager: u64,
    phys: PhysAddr,
) -> tracing::span::EnteredSpan {
    if config.free_spans {
        span_free(manager, phys).entered()
    } else {
        Span::none().entered()
    }
}
