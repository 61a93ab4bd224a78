//! Compacting pcode repository.
//!
//! Compiled programs are stored as variable-length byte blocks inside one
//! fixed-size arena. The arena is always packed: valid blocks cover
//! `0..used_bytes()` with no gaps. New blocks are appended at the
//! high-water mark; removing a block slides every later byte down to close
//! the hole and patches the offsets of the blocks that moved.
//!
//! Callers never see raw offsets. A [`PcodeHandle`] names a slot in the
//! block table and is resolved to its current offset on every access, so
//! compaction is invisible to handle holders.
//!
//! # Slot reuse
//!
//! A freed slot is reused before the table grows, lowest index first. Freed
//! indices are kept in an ordered set, so removing the block in slot 0 and
//! then adding a new block always hands back slot 0 again.
//!
//! The repository has no lock of its own. The runtime keeps it inside the
//! critical section together with the tick state.

use crate::config::RepositoryConfig;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// PcodeHandle
// ---------------------------------------------------------------------------

/// Stable, opaque reference to a block in a [`PcodeRepository`].
///
/// The handle identifies a table slot. It stays the same while the block's
/// bytes move during compaction, and it becomes invalid once the block is
/// removed (until a later `add` reuses the slot).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PcodeHandle(u32);

impl PcodeHandle {
    /// Rebuild a handle from its raw value (e.g. one printed by the CLI).
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PcodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PcodeHandle({})", self.0)
    }
}

impl fmt::Display for PcodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pcode:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PcodeBlock
// ---------------------------------------------------------------------------

/// Metadata for one table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcodeBlock {
    pub valid: bool,
    /// Arena-relative start of the block's bytes.
    pub offset: usize,
    pub size: usize,
}

impl PcodeBlock {
    const EMPTY: PcodeBlock = PcodeBlock {
        valid: false,
        offset: 0,
        size: 0,
    };

    fn end(&self) -> usize {
        self.offset + self.size
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("pcode table is full ({capacity} slots)")]
    TableFull { capacity: usize },
    #[error("pcode arena is full: {requested} bytes requested, {available} available")]
    ArenaFull { requested: usize, available: usize },
    #[error("invalid pcode handle {0}")]
    InvalidHandle(PcodeHandle),
}

// ---------------------------------------------------------------------------
// PcodeRepository
// ---------------------------------------------------------------------------

/// Fixed-capacity table of pcode blocks over a packed byte arena.
pub struct PcodeRepository {
    /// Block table. Grows up to `max_blocks`, never shrinks.
    slots: Vec<PcodeBlock>,
    /// Load serial of each slot's current block, parallel to `slots`.
    serials: Vec<u64>,
    /// Number of successful adds since construction.
    loads: u64,
    /// Indices of invalid slots, ready for reuse.
    free: BTreeSet<usize>,
    /// Backing store for every valid block.
    arena: Box<[u8]>,
    /// End of the last valid block.
    high_water: usize,
    max_blocks: usize,
}

impl PcodeRepository {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self::with_capacity(config.max_blocks, config.arena_bytes)
    }

    /// # Panics
    /// Panics if `max_blocks` is 0.
    pub fn with_capacity(max_blocks: usize, arena_bytes: usize) -> Self {
        assert!(max_blocks > 0, "max_blocks must be > 0");
        Self {
            slots: Vec::with_capacity(max_blocks),
            serials: Vec::with_capacity(max_blocks),
            loads: 0,
            free: BTreeSet::new(),
            arena: vec![0u8; arena_bytes].into_boxed_slice(),
            high_water: 0,
            max_blocks,
        }
    }

    /// Drop every block and rewind the arena. Capacities are kept.
    pub fn init(&mut self) {
        self.slots.clear();
        self.serials.clear();
        self.free.clear();
        self.arena.fill(0);
        self.high_water = 0;
    }

    /// Copy `data` into the arena and return a handle for it.
    ///
    /// On any error the repository is left untouched.
    pub fn add(&mut self, data: &[u8]) -> Result<PcodeHandle, RepositoryError> {
        let index = match self.free.first() {
            Some(&index) => index,
            None if self.slots.len() < self.max_blocks => self.slots.len(),
            None => {
                warn!(capacity = self.max_blocks, "pcode table full");
                return Err(RepositoryError::TableFull {
                    capacity: self.max_blocks,
                });
            }
        };

        let size = data.len();
        let available = self.free_bytes();
        if size > available {
            warn!(requested = size, available, "pcode arena full");
            return Err(RepositoryError::ArenaFull {
                requested: size,
                available,
            });
        }

        let offset = self.high_water;
        self.arena[offset..offset + size].copy_from_slice(data);
        let block = PcodeBlock {
            valid: true,
            offset,
            size,
        };
        self.loads += 1;
        if index == self.slots.len() {
            self.slots.push(block);
            self.serials.push(self.loads);
        } else {
            self.free.remove(&index);
            self.slots[index] = block;
            self.serials[index] = self.loads;
        }
        self.high_water += size;

        let handle = PcodeHandle(index as u32);
        debug!(%handle, offset, size, "pcode block added");
        debug_assert!(self.is_packed());
        Ok(handle)
    }

    /// Remove a block and compact the arena over the hole it leaves.
    pub fn remove(&mut self, handle: PcodeHandle) -> Result<(), RepositoryError> {
        let block = self.block(handle)?;
        let end = block.end();

        self.arena.copy_within(end..self.high_water, block.offset);
        for slot in self.slots.iter_mut() {
            if slot.valid && slot.offset >= end {
                slot.offset -= block.size;
            }
        }
        self.high_water -= block.size;
        self.arena[self.high_water..self.high_water + block.size].fill(0);

        self.slots[handle.index()] = PcodeBlock::EMPTY;
        self.free.insert(handle.index());

        debug!(%handle, size = block.size, "pcode block removed");
        debug_assert!(self.is_packed());
        Ok(())
    }

    /// Current bytes of the block named by `handle`.
    pub fn retrieve(&self, handle: PcodeHandle) -> Result<&[u8], RepositoryError> {
        let block = self.block(handle)?;
        Ok(&self.arena[block.offset..block.end()])
    }

    /// Current metadata of the block named by `handle`.
    pub fn block(&self, handle: PcodeHandle) -> Result<PcodeBlock, RepositoryError> {
        match self.slots.get(handle.index()) {
            Some(block) if block.valid => Ok(*block),
            _ => {
                warn!(%handle, "invalid pcode handle");
                Err(RepositoryError::InvalidHandle(handle))
            }
        }
    }

    /// Serial of the add that filled `handle`'s slot, unique for the life
    /// of the repository. Differs from a remembered value once the slot has
    /// been removed and reused.
    pub fn serial(&self, handle: PcodeHandle) -> Option<u64> {
        if self.contains(handle) {
            self.serials.get(handle.index()).copied()
        } else {
            None
        }
    }

    pub fn contains(&self, handle: PcodeHandle) -> bool {
        matches!(self.slots.get(handle.index()), Some(block) if block.valid)
    }

    /// Valid handles in ascending slot order.
    pub fn handles(&self) -> impl Iterator<Item = PcodeHandle> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, block)| block.valid)
            .map(|(index, _)| PcodeHandle(index as u32))
    }

    /// Number of valid blocks.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of blocks the table can hold.
    pub fn capacity(&self) -> usize {
        self.max_blocks
    }

    /// Size of the backing arena in bytes.
    pub fn arena_bytes(&self) -> usize {
        self.arena.len()
    }

    /// Bytes occupied by valid blocks (the high-water mark).
    pub fn used_bytes(&self) -> usize {
        self.high_water
    }

    pub fn free_bytes(&self) -> usize {
        self.arena.len() - self.high_water
    }

    /// Check that valid blocks tile `0..used_bytes()` exactly.
    pub fn is_packed(&self) -> bool {
        let mut blocks: Vec<PcodeBlock> =
            self.slots.iter().filter(|b| b.valid).copied().collect();
        blocks.sort_by_key(|b| (b.offset, b.size));

        let mut cursor = 0;
        for block in blocks {
            if block.offset != cursor {
                return false;
            }
            cursor = block.end();
        }
        cursor == self.high_water && self.high_water <= self.arena.len()
    }
}

impl fmt::Debug for PcodeRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcodeRepository")
            .field("blocks", &self.len())
            .field("capacity", &self.max_blocks)
            .field("used_bytes", &self.high_water)
            .field("arena_bytes", &self.arena.len())
            .finish()
    }
}
