//! The runtime context: one critical section shared by the pcode repository
//! and the tick driver.
//!
//! A [`Runtime`] is constructed and torn down explicitly by its owner. Every
//! repository access made through it enters the critical section, so a
//! compaction triggered from a caller thread can never interleave with a step
//! executing on the tick thread.

use crate::config::RuntimeConfig;
use crate::critical::CriticalSection;
use crate::error::RuntimeError;
use crate::pcode::{PcodeHandle, PcodeRepository};
use crate::store::{BlobId, PcodeStore};
use crate::tick::{TickCounter, TickDriver, TickShared, TickState};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// ---------------------------------------------------------------------------
// RuntimeState
// ---------------------------------------------------------------------------

/// Everything guarded by the runtime's critical section.
pub struct RuntimeState {
    pub ticks: TickCounter,
    repository: RefCell<PcodeRepository>,
}

impl RuntimeState {
    pub fn new(repository: PcodeRepository) -> Self {
        Self {
            ticks: TickCounter::new(),
            repository: RefCell::new(repository),
        }
    }

    /// Shared view of the repository.
    ///
    /// Fails with [`RuntimeError::RepositoryBusy`] if this thread already
    /// holds a mutable view further up the stack.
    pub fn repository(&self) -> Result<Ref<'_, PcodeRepository>, RuntimeError> {
        self.repository
            .try_borrow()
            .map_err(|_| RuntimeError::RepositoryBusy)
    }

    /// Exclusive view of the repository.
    ///
    /// Fails with [`RuntimeError::RepositoryBusy`] if any other view is
    /// alive on this thread (e.g. a step callback that re-entered the
    /// runtime while reading a program).
    pub fn repository_mut(&self) -> Result<RefMut<'_, PcodeRepository>, RuntimeError> {
        self.repository
            .try_borrow_mut()
            .map_err(|_| RuntimeError::RepositoryBusy)
    }
}

impl TickShared for RuntimeState {
    fn ticks(&self) -> &TickCounter {
        &self.ticks
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct Runtime {
    config: RuntimeConfig,
    shared: Arc<CriticalSection<RuntimeState>>,
    driver: TickDriver<RuntimeState>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let repository = PcodeRepository::new(&config.repository);
        let shared = Arc::new(CriticalSection::new(RuntimeState::new(repository)));
        let driver = TickDriver::new(Arc::clone(&shared));
        info!(
            max_blocks = config.repository.max_blocks,
            arena_bytes = config.repository.arena_bytes,
            "runtime initialised"
        );
        Ok(Self {
            config,
            shared,
            driver,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The critical section guarding all runtime state. Hold it to make
    /// several operations atomic with respect to the tick thread.
    pub fn critical(&self) -> &Arc<CriticalSection<RuntimeState>> {
        &self.shared
    }

    // -- repository ---------------------------------------------------------

    /// Copy a compiled program into the repository.
    pub fn load(&self, pcode: &[u8]) -> Result<PcodeHandle, RuntimeError> {
        let state = self.shared.enter();
        let handle = state.repository_mut()?.add(pcode)?;
        Ok(handle)
    }

    /// Remove a program, compacting the programs stored after it.
    pub fn unload(&self, handle: PcodeHandle) -> Result<(), RuntimeError> {
        let state = self.shared.enter();
        state.repository_mut()?.remove(handle)?;
        Ok(())
    }

    /// Run `f` over the current bytes of a program without copying them.
    pub fn with_program<R>(
        &self,
        handle: PcodeHandle,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, RuntimeError> {
        let state = self.shared.enter();
        let repository = state.repository()?;
        let bytes = repository.retrieve(handle)?;
        Ok(f(bytes))
    }

    /// Copy of a program's current bytes.
    pub fn program(&self, handle: PcodeHandle) -> Result<Vec<u8>, RuntimeError> {
        self.with_program(handle, <[u8]>::to_vec)
    }

    /// Handles of all loaded programs, in slot order.
    pub fn loaded(&self) -> Result<Vec<PcodeHandle>, RuntimeError> {
        let state = self.shared.enter();
        let handles: Vec<PcodeHandle> = state.repository()?.handles().collect();
        Ok(handles)
    }

    /// Fetch a blob from `store` and load it.
    pub fn load_from_store(
        &self,
        store: &dyn PcodeStore,
        id: BlobId,
    ) -> Result<PcodeHandle, RuntimeError> {
        let pcode = store.retrieve(id)?;
        self.load(&pcode)
    }

    /// Persist a loaded program. The bytes are copied out first so the
    /// critical section is not held during I/O.
    pub fn save_to_store(
        &self,
        store: &dyn PcodeStore,
        handle: PcodeHandle,
    ) -> Result<BlobId, RuntimeError> {
        let pcode = self.program(handle)?;
        Ok(store.persist(&pcode)?)
    }

    // -- ticking ------------------------------------------------------------

    /// Start the tick driver. `step` runs once per unpaused tick with the
    /// critical section held and receives the guarded state.
    pub fn start<F>(&mut self, period: Duration, mut step: F) -> Result<(), RuntimeError>
    where
        F: FnMut(&RuntimeState) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.driver.start(period, move || {
            // Already held by the tick loop; this re-enters.
            let state = shared.enter();
            step(&state);
        })?;
        Ok(())
    }

    /// Start with the configured tick period.
    pub fn start_default<F>(&mut self, step: F) -> Result<(), RuntimeError>
    where
        F: FnMut(&RuntimeState) + Send + 'static,
    {
        let period = self.config.tick.period();
        self.start(period, step)
    }

    pub fn pause(&self) -> Result<(), RuntimeError> {
        Ok(self.driver.pause()?)
    }

    pub fn resume(&self) -> Result<(), RuntimeError> {
        Ok(self.driver.resume()?)
    }

    pub fn tick_count(&self) -> u64 {
        self.driver.get_count()
    }

    pub fn tick_state(&self) -> TickState {
        self.driver.state()
    }

    pub fn stop(&mut self) -> Result<(), RuntimeError> {
        Ok(self.driver.stop()?)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("driver", &self.driver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcode::RepositoryError;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.repository.max_blocks = 0;
        assert!(matches!(Runtime::new(cfg), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn load_program_unload() {
        let rt = runtime();
        let h = rt.load(b"\x01\x02\x03").unwrap();
        assert_eq!(rt.program(h).unwrap(), vec![1, 2, 3]);
        assert_eq!(rt.loaded().unwrap(), vec![h]);
        rt.unload(h).unwrap();
        assert!(matches!(
            rt.program(h),
            Err(RuntimeError::Repository(RepositoryError::InvalidHandle(_)))
        ));
    }

    #[test]
    fn nested_mutable_borrow_reports_busy() {
        let rt = runtime();
        let h = rt.load(b"abc").unwrap();
        let result = rt.with_program(h, |_| rt.load(b"nested"));
        assert!(matches!(result, Ok(Err(RuntimeError::RepositoryBusy))));
    }

    #[test]
    fn capacity_errors_are_classified() {
        let mut cfg = RuntimeConfig::default();
        cfg.repository.arena_bytes = 4;
        let rt = Runtime::new(cfg).unwrap();
        let err = rt.load(b"too long").unwrap_err();
        assert!(err.is_capacity());
        assert!(!err.is_resource());
    }
}
