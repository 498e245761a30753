//! Codec device sessions.
//!
//! A [`VpuDevice`] wraps one [`BufferManager`] and counts open sessions.
//! When the last session goes away the device cleans up after its
//! consumers: leftover dynamic buffers are logged and released, the shared
//! buffer is freed and any pending completion is dropped. The codec work
//! buffer lives as long as the device.

use crate::completion::CompletionSignal;
use crate::descriptor::{BufferDescriptor, BufferToken, MemDesc, PhysAddr};
use crate::error::Result;
use crate::manager::BufferManager;
use crate::memory::{FreeOutcome, UserMapping};
use crate::observability::span_session;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::Span;

#[derive(Debug, Default)]
struct DeviceState {
    open_count: usize,
    shared: Option<BufferToken>,
    work: Option<BufferToken>,
}

/// One codec device.
#[derive(Debug)]
pub struct VpuDevice {
    manager: Arc<BufferManager>,
    completion: CompletionSignal,
    state: Mutex<DeviceState>,
    next_session: AtomicU64,
}

impl VpuDevice {
    /// Create a device over `manager`.
    pub fn new(manager: Arc<BufferManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            completion: CompletionSignal::new(),
            state: Mutex::new(DeviceState::default()),
            next_session: AtomicU64::new(1),
        })
    }

    /// Open a session.
    pub fn open(self: &Arc<Self>) -> VpuSession {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let span = if self.manager.config().tracing.session_spans {
            span_session(self.manager.id(), id)
        } else {
            Span::none()
        };

        let open_count = {
            let mut state = self.state.lock().unwrap();
            state.open_count += 1;
            state.open_count
        };
        span.in_scope(|| tracing::info!(session = id, open_count, "session opened"));

        VpuSession {
            device: Arc::clone(self),
            id,
            span,
            released: false,
        }
    }

    /// The buffer manager.
    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    /// Completion signal; the interrupt path calls `signal()` on it.
    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    /// Number of open sessions.
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }

    /// Descriptor of the codec work buffer, if it exists.
    pub fn query_work_buffer(&self) -> Option<BufferDescriptor> {
        self.state
            .lock()
            .unwrap()
            .work
            .as_ref()
            .map(|t| *t.descriptor())
    }

    fn shared_memory(&self, size: usize) -> Result<BufferDescriptor> {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = &state.shared {
            return Ok(*token.descriptor());
        }
        let token = self.manager.allocate(size)?;
        let desc = *token.descriptor();
        tracing::debug!(phys = %desc.phys, size = desc.size, "shared buffer allocated");
        state.shared = Some(token);
        Ok(desc)
    }

    fn work_buffer(&self, size: usize) -> Result<BufferDescriptor> {
        let mut state = self.state.lock().unwrap();
        if let Some(token) = &state.work {
            return Ok(*token.descriptor());
        }
        let token = self.manager.allocate_persistent(size)?;
        let desc = *token.descriptor();
        tracing::debug!(phys = %desc.phys, size = desc.size, "work buffer allocated");
        state.work = Some(token);
        Ok(desc)
    }

    fn release_session(&self, session: u64) {
        // Held until teardown completes; `open` takes the same lock.
        let mut state = self.state.lock().unwrap();
        state.open_count = state.open_count.saturating_sub(1);
        if state.open_count > 0 {
            tracing::info!(session, open_count = state.open_count, "session released");
            return;
        }

        for record in self.manager.outstanding().iter().filter(|r| !r.persistent) {
            tracing::warn!(
                session,
                phys = %record.block.phys,
                cpu = %record.block.cpu,
                size = record.block.size,
                "buffer outstanding at release"
            );
        }

        self.completion.reset();
        if let Some(token) = state.shared.take() {
            if let Err(e) = self.manager.free(token) {
                tracing::error!(session, error = %e, "failed to free shared buffer");
            }
        }
        let released = self.manager.free_all_outstanding();
        tracing::info!(session, released, "last session released");
    }
}

/// An open handle on a [`VpuDevice`]; releases itself on drop.
#[derive(Debug)]
pub struct VpuSession {
    device: Arc<VpuDevice>,
    id: u64,
    span: Span,
    released: bool,
}

impl VpuSession {
    /// Session id, unique per device.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The device this session belongs to.
    pub fn device(&self) -> &Arc<VpuDevice> {
        &self.device
    }

    /// Allocate a buffer.
    pub fn allocate(&self, size: usize) -> Result<BufferToken> {
        let _enter = self.span.enter();
        self.device.manager.allocate(size)
    }

    /// Allocate from a wire request.
    pub fn allocate_raw(&self, request: MemDesc) -> Result<MemDesc> {
        let _enter = self.span.enter();
        self.device.manager.allocate_raw(request)
    }

    /// Free a buffer.
    pub fn free(&self, token: BufferToken) -> Result<FreeOutcome> {
        let _enter = self.span.enter();
        self.device.manager.free(token)
    }

    /// Free a buffer named by a wire descriptor.
    pub fn free_raw(&self, desc: MemDesc) -> Result<FreeOutcome> {
        let _enter = self.span.enter();
        self.device.manager.free_raw(desc)
    }

    /// Release every outstanding dynamic buffer. Returns how many.
    pub fn free_all(&self) -> usize {
        let _enter = self.span.enter();
        self.device.manager.free_all_outstanding()
    }

    /// Map part of a buffer into user space.
    pub fn map(&self, token: &BufferToken, offset_pages: usize, len: usize) -> Result<UserMapping> {
        let _enter = self.span.enter();
        self.device.manager.map_for_user_space(token, offset_pages, len)
    }

    /// Whether `addr` is safe to program into the codec.
    pub fn check_physical(&self, addr: PhysAddr) -> bool {
        let valid = self.device.manager.validate_physical_address(addr);
        if !valid {
            tracing::warn!(session = self.id, phys = %addr, "physical address check failed");
        }
        valid
    }

    /// Block until the codec signals completion.
    ///
    /// # Errors
    ///
    /// `Timeout` or `Interrupted`; see [`CompletionSignal::wait`].
    pub fn wait_for_completion(&self, timeout: Duration) -> Result<()> {
        self.device.completion.wait(timeout)
    }

    /// The device-wide shared buffer, allocated on first use.
    ///
    /// Later calls return the same buffer whatever `size` they pass.
    pub fn shared_memory(&self, size: usize) -> Result<BufferDescriptor> {
        let _enter = self.span.enter();
        self.device.shared_memory(size)
    }

    /// The codec work buffer, allocated on first use and kept for the life
    /// of the device.
    pub fn work_buffer(&self, size: usize) -> Result<BufferDescriptor> {
        let _enter = self.span.enter();
        self.device.work_buffer(size)
    }

    /// Descriptor of the codec work buffer, if it exists.
    pub fn query_work_buffer(&self) -> Option<BufferDescriptor> {
        self.device.query_work_buffer()
    }

    /// Close the session.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _enter = self.span.enter();
        self.device.release_session(self.id);
    }
}

impl Drop for VpuSession {
    fn drop(&mut self) {
        self.release_inner();
    }
}
