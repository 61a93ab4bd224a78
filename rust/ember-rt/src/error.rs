//! Top-level error type for operations that span several runtime subsystems.

use crate::config::ConfigError;
use crate::critical::LockError;
use crate::pcode::RepositoryError;
use crate::store::StoreError;
use crate::tick::TickError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Tick(#[from] TickError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The repository is already borrowed further up this thread's stack,
    /// typically by a step callback that re-entered the runtime.
    #[error("pcode repository is busy (already borrowed by the current thread)")]
    RepositoryBusy,
}

impl RuntimeError {
    /// True for failures caused by an exhausted slot table or arena.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            RuntimeError::Repository(RepositoryError::TableFull { .. })
                | RuntimeError::Repository(RepositoryError::ArenaFull { .. })
        )
    }

    /// True for failures of an underlying OS or threading primitive.
    pub fn is_resource(&self) -> bool {
        match self {
            RuntimeError::Lock(_) => true,
            RuntimeError::Tick(e) => e.is_resource(),
            RuntimeError::Store(StoreError::Io(_)) => true,
            _ => false,
        }
    }
}
