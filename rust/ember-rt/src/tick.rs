//! Periodic tick driver.
//!
//! A [`TickDriver`] owns one background thread that, once per period:
//!
//! 1. enters the critical section,
//! 2. increments the tick counter,
//! 3. invokes the installed callback unless the driver is paused,
//! 4. leaves the critical section and waits for the next deadline.
//!
//! The counter and lifecycle state ([`TickCounter`]) live inside the shared
//! [`CriticalSection`], so `pause`, `resume` and count reads are ordered
//! against callback invocations, and a callback can pause its own driver
//! through the state it already holds.
//!
//! Deadlines are fixed-rate. Cancellation is a flag paired with a condition
//! variable, so [`TickDriver::stop`] wakes the thread immediately instead of
//! waiting out the current period.

use crate::critical::CriticalSection;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

// ---------------------------------------------------------------------------
// TickState
// ---------------------------------------------------------------------------

/// Lifecycle of a tick driver.
///
/// `Stopped → Running ⇄ Paused → Stopping → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Stopped,
    Running,
    Paused,
    Stopping,
}

impl fmt::Display for TickState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickState::Stopped => write!(f, "stopped"),
            TickState::Running => write!(f, "running"),
            TickState::Paused => write!(f, "paused"),
            TickState::Stopping => write!(f, "stopping"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("tick period must be greater than zero")]
    ZeroPeriod,
    #[error("tick driver is already {0}")]
    AlreadyRunning(TickState),
    #[error("tick driver is {0}")]
    NotRunning(TickState),
    #[error("failed to spawn tick thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("tick thread panicked")]
    ThreadPanicked,
}

impl TickError {
    /// True for failures of the underlying threading primitives.
    pub fn is_resource(&self) -> bool {
        matches!(self, TickError::Spawn(_) | TickError::ThreadPanicked)
    }
}

// ---------------------------------------------------------------------------
// TickCounter
// ---------------------------------------------------------------------------

/// Tick count and lifecycle state.
///
/// Not thread-safe by itself; it is only ever reached through a held
/// critical section.
#[derive(Debug)]
pub struct TickCounter {
    count: Cell<u64>,
    state: Cell<TickState>,
}

impl TickCounter {
    pub fn new() -> Self {
        Self {
            count: Cell::new(0),
            state: Cell::new(TickState::Stopped),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }

    pub fn state(&self) -> TickState {
        self.state.get()
    }

    pub fn is_paused(&self) -> bool {
        self.state.get() == TickState::Paused
    }

    /// Stop invoking the callback from the next tick on. The count keeps
    /// advancing. Pausing a paused driver is a no-op.
    pub fn pause(&self) -> Result<(), TickError> {
        match self.state.get() {
            TickState::Running | TickState::Paused => {
                self.state.set(TickState::Paused);
                Ok(())
            }
            other => Err(TickError::NotRunning(other)),
        }
    }

    /// Resume invoking the callback. Resuming a running driver is a no-op.
    pub fn resume(&self) -> Result<(), TickError> {
        match self.state.get() {
            TickState::Running | TickState::Paused => {
                self.state.set(TickState::Running);
                Ok(())
            }
            other => Err(TickError::NotRunning(other)),
        }
    }

    fn advance(&self) -> u64 {
        let next = self.count.get().wrapping_add(1);
        self.count.set(next);
        next
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state that carries a [`TickCounter`].
pub trait TickShared {
    fn ticks(&self) -> &TickCounter;
}

impl TickShared for TickCounter {
    fn ticks(&self) -> &TickCounter {
        self
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

struct Cancel {
    requested: Mutex<bool>,
    wake: Condvar,
}

impl Cancel {
    fn new() -> Self {
        Self {
            requested: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    fn request(&self) {
        *self.requested.lock() = true;
        self.wake.notify_all();
    }

    fn reset(&self) {
        *self.requested.lock() = false;
    }

    /// Block until `deadline` or a cancellation request.
    /// Returns `true` if cancellation was requested.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut requested = self.requested.lock();
        while !*requested {
            if self.wake.wait_until(&mut requested, deadline).timed_out() {
                break;
            }
            if !*requested {
                trace!("tick wait woke before deadline, continuing");
            }
        }
        *requested
    }
}

// ---------------------------------------------------------------------------
// TickDriver
// ---------------------------------------------------------------------------

/// Drives a callback from a dedicated thread once per period.
pub struct TickDriver<S: TickShared> {
    shared: Arc<CriticalSection<S>>,
    cancel: Arc<Cancel>,
    thread: Option<JoinHandle<()>>,
    period: Duration,
}

impl<S> TickDriver<S>
where
    S: TickShared + Send + 'static,
{
    pub fn new(shared: Arc<CriticalSection<S>>) -> Self {
        Self {
            shared,
            cancel: Arc::new(Cancel::new()),
            thread: None,
            period: Duration::ZERO,
        }
    }

    /// Reset the counter and start ticking every `period`.
    ///
    /// The callback runs on the tick thread while the critical section is
    /// held. It may re-enter the section, but it must not block for a time
    /// comparable to the period.
    pub fn start<F>(&mut self, period: Duration, callback: F) -> Result<(), TickError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(TickError::ZeroPeriod);
        }

        // Hold the section across the spawn so the first tick observes the
        // reset counter, and so a failed spawn can be rolled back unseen.
        let guard = self.shared.enter();
        let ticks = guard.ticks();
        if ticks.state() != TickState::Stopped {
            return Err(TickError::AlreadyRunning(ticks.state()));
        }
        let previous_count = ticks.count();
        ticks.count.set(0);
        ticks.state.set(TickState::Running);
        self.cancel.reset();

        let shared = Arc::clone(&self.shared);
        let cancel = Arc::clone(&self.cancel);
        let spawned = thread::Builder::new()
            .name("ember-tick".to_string())
            .spawn(move || tick_loop(shared, cancel, period, callback));

        match spawned {
            Ok(handle) => {
                drop(guard);
                self.thread = Some(handle);
                self.period = period;
                info!(?period, "tick driver started");
                Ok(())
            }
            Err(e) => {
                ticks.count.set(previous_count);
                ticks.state.set(TickState::Stopped);
                error!(error = %e, os_error = ?e.raw_os_error(), "failed to spawn tick thread");
                Err(TickError::Spawn(e))
            }
        }
    }

    pub fn pause(&self) -> Result<(), TickError> {
        self.shared.enter().ticks().pause()?;
        debug!("tick driver paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), TickError> {
        self.shared.enter().ticks().resume()?;
        debug!("tick driver resumed");
        Ok(())
    }

    /// Ticks since the last `start`.
    pub fn get_count(&self) -> u64 {
        self.shared.enter().ticks().count()
    }

    pub fn state(&self) -> TickState {
        self.shared.enter().ticks().state()
    }

    /// Period of the current (or last) run.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancel the loop and wait for the tick thread to exit.
    ///
    /// Blocks for at most the callback currently in flight. Stopping a
    /// stopped driver is a no-op.
    pub fn stop(&mut self) -> Result<(), TickError> {
        self.shutdown()
    }
}

impl<S: TickShared> TickDriver<S> {
    /// Cancel and join the tick thread, leaving the shared state `Stopped`.
    fn shutdown(&mut self) -> Result<(), TickError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };

        self.shared.enter().ticks().state.set(TickState::Stopping);
        self.cancel.request();
        let joined = handle.join();

        let count = {
            let guard = self.shared.enter();
            let ticks = guard.ticks();
            ticks.state.set(TickState::Stopped);
            ticks.count()
        };

        match joined {
            Ok(()) => {
                info!(ticks = count, "tick driver stopped");
                Ok(())
            }
            Err(_) => {
                error!(ticks = count, "tick thread panicked");
                Err(TickError::ThreadPanicked)
            }
        }
    }
}

impl<S: TickShared> Drop for TickDriver<S> {
    fn drop(&mut self) {
        // Panics are already logged by shutdown.
        let _ = self.shutdown();
    }
}

impl<S: TickShared> fmt::Debug for TickDriver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickDriver")
            .field("period", &self.period)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn tick_loop<S, F>(
    shared: Arc<CriticalSection<S>>,
    cancel: Arc<Cancel>,
    period: Duration,
    mut callback: F,
) where
    S: TickShared,
    F: FnMut(),
{
    let mut deadline = Instant::now() + period;
    loop {
        {
            let guard = shared.enter();
            let ticks = guard.ticks();
            let count = ticks.advance();
            if ticks.state() == TickState::Running {
                trace!(count, "tick");
                callback();
            }
        }

        if cancel.wait_until(deadline) {
            return;
        }

        deadline += period;
        let now = Instant::now();
        if deadline <= now {
            debug!(behind = ?(now - deadline), "tick loop overran its period, re-anchoring");
            deadline = now + period;
        }
    }
}
