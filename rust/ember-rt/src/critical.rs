//! The runtime's single reentrant critical section.
//!
//! Every piece of shared runtime state (tick counters, the pcode repository)
//! lives inside one [`CriticalSection`]. None of that state is thread-safe on
//! its own; it relies on `Cell`/`RefCell` and is only reachable through a
//! [`CriticalGuard`]. The lock is recursive, so a tick callback already
//! running inside the section may call back into runtime operations that
//! enter it again.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// RAII token for a held critical section. Dropping it exits the section.
pub type CriticalGuard<'a, T> = ReentrantMutexGuard<'a, T>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {0:?} waiting for the critical section")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// CriticalSection
// ---------------------------------------------------------------------------

/// A process-wide recursive lock guarding a piece of shared state.
///
/// Construction cannot fail and destruction happens on drop. Share it with
/// `Arc`; the last owner going away guarantees no thread holds it.
pub struct CriticalSection<T> {
    lock: ReentrantMutex<T>,
}

impl<T> CriticalSection<T> {
    pub fn new(state: T) -> Self {
        Self {
            lock: ReentrantMutex::new(state),
        }
    }

    /// Enter the section, blocking until it is available.
    ///
    /// A thread that already holds the section re-enters immediately.
    pub fn enter(&self) -> CriticalGuard<'_, T> {
        self.lock.lock()
    }

    /// Enter the section, giving up after `timeout`.
    ///
    /// On failure the lock state is unchanged.
    pub fn try_enter_for(&self, timeout: Duration) -> Result<CriticalGuard<'_, T>, LockError> {
        self.lock.try_lock_for(timeout).ok_or_else(|| {
            warn!(?timeout, "critical section acquisition timed out");
            LockError::Timeout(timeout)
        })
    }

    /// Run `f` inside the section.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.enter();
        f(&guard)
    }

    /// Whether any thread currently holds the section.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Whether the calling thread holds the section.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.lock.is_owned_by_current_thread()
    }
}

impl<T: Default> Default for CriticalSection<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for CriticalSection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriticalSection")
            .field("locked", &self.is_locked())
            .finish()
    }
}
