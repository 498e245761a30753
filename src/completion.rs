//! Waiting for hardware completion.
//!
//! The interrupt path calls [`CompletionSignal::signal`]; a consumer blocks
//! in [`CompletionSignal::wait`] until then, until its timeout expires, or
//! until [`CompletionSignal::interrupt`] cancels the wait. The signal is
//! independent of the buffer manager lock, so waiting never holds it.

use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SignalState {
    /// Completion arrived and has not been consumed.
    done: bool,
    /// An out-of-band interrupt is pending.
    interrupted: bool,
    /// Completions delivered since creation.
    completions: u64,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<SignalState>,
    cond: Condvar,
}

/// One-shot completion flag shared between an interrupt source and waiters.
///
/// Cloning shares the same signal.
///
/// # Example
///
/// ```rust
/// use parallax_dma::completion::CompletionSignal;
/// use std::time::Duration;
///
/// let signal = CompletionSignal::new();
/// let irq = signal.clone();
/// std::thread::spawn(move || irq.signal());
/// signal.wait(Duration::from_secs(5)).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

impl CompletionSignal {
    /// Create a signal with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the hardware operation done and wake waiters.
    pub fn signal(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.done = true;
        state.completions += 1;
        self.inner.cond.notify_all();
    }

    /// Cancel current waits with `Interrupted`.
    pub fn interrupt(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.interrupted = true;
        self.inner.cond.notify_all();
    }

    /// Drop any pending completion or interrupt.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.done = false;
        state.interrupted = false;
    }

    /// Returns true if a completion is pending.
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().unwrap().done
    }

    /// Completions delivered since creation.
    pub fn completions(&self) -> u64 {
        self.inner.state.lock().unwrap().completions
    }

    /// Block until the next completion, consuming it.
    ///
    /// # Errors
    ///
    /// - `Timeout` if nothing arrives within `timeout`; no retry is made.
    /// - `Interrupted` if [`interrupt`](Self::interrupt) is called first.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();

        loop {
            if state.interrupted {
                state.interrupted = false;
                return Err(Error::Interrupted);
            }
            if state.done {
                state.done = false;
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(?timeout, "hardware completion timed out");
                return Err(Error::Timeout(timeout));
            }
            let (s, _) = self
                .inner
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = s;
        }
    }
}
