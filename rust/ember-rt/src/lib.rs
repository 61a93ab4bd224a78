//! Ember RT: execution substrate for the Ember automation language.
//!
//! Hosts compiled pcode in a compacting, fixed-capacity repository and drives
//! execution from a periodic tick thread. Both share one reentrant critical
//! section owned by an explicitly constructed [`Runtime`].
#![warn(clippy::all)]

pub mod config;
pub mod critical;
pub mod error;
pub mod exec;
pub mod pcode;
pub mod runtime;
pub mod store;
pub mod tick;

pub use config::RuntimeConfig;
pub use critical::{CriticalGuard, CriticalSection};
pub use error::RuntimeError;
pub use pcode::{PcodeBlock, PcodeHandle, PcodeRepository};
pub use runtime::{Runtime, RuntimeState};
pub use tick::{TickCounter, TickDriver, TickState};
