//! Configuration file parsing for `ember.toml`.
//!
//! Searches the current directory then its ancestors. A missing file means
//! defaults; a file that exists but does not parse is an error.

use crate::error::CliError;
use ember_rt::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "ember.toml";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct EmberConfig {
    #[serde(flatten)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogSection {
    /// `tracing` filter directive, overridden by `EMBER_LOG`.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreSection {
    pub dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".ember/store"),
        }
    }
}

impl EmberConfig {
    /// Load `explicit` if given, otherwise the nearest `ember.toml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CliError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match Self::find()? {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| CliError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn find() -> Result<Option<PathBuf>, CliError> {
        let mut dir = std::env::current_dir().map_err(|source| CliError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                return Ok(Some(candidate));
            }
            if !dir.pop() {
                return Ok(None);
            }
        }
    }

    pub fn default_template() -> &'static str {
        r#"# Ember runtime configuration

[repository]
# Slots in the pcode table.
max_blocks = 32
# Bytes in the pcode arena.
arena_bytes = 16384

[tick]
period_ms = 100

[log]
# tracing filter; EMBER_LOG overrides it.
level = "info"

[store]
dir = ".ember/store"
"#
    }
}
