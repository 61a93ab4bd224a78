//! Runtime sizing and timing configuration.
//!
//! Every field has a default suited to a small device, so an empty table
//! (or no config file at all) yields a usable runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("repository.max_blocks must be greater than zero")]
    ZeroBlocks,
    #[error("repository.arena_bytes must be greater than zero")]
    ZeroArena,
    #[error("tick.period_ms must be greater than zero")]
    ZeroPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub tick: TickConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Number of slots in the block table.
    pub max_blocks: usize,
    /// Size of the backing arena.
    pub arena_bytes: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_blocks: 32,
            arena_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub period_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { period_ms: 100 }
    }
}

impl TickConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.max_blocks == 0 {
            return Err(ConfigError::ZeroBlocks);
        }
        if self.repository.arena_bytes == 0 {
            return Err(ConfigError::ZeroArena);
        }
        if self.tick.period_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }
}
