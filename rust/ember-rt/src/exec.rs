//! Minimal program cursor used to drive loaded pcode from the tick thread.
//!
//! The cursor does not interpret instructions. Each step fetches the next
//! byte of the current program and reports it; when a program is exhausted
//! the cursor moves on to the next loaded program in slot order, wrapping
//! around. The handle is re-resolved on every step, so programs that move
//! during compaction keep running from the same position and programs that
//! are unloaded are simply skipped. A slot refilled by a new program starts
//! that program from its first byte.

use crate::error::RuntimeError;
use crate::pcode::{PcodeHandle, PcodeRepository};
use crate::runtime::RuntimeState;

/// Outcome of one [`ProgramCursor::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One instruction byte was fetched.
    Executed {
        handle: PcodeHandle,
        offset: usize,
        opcode: u8,
    },
    /// No loaded program has any bytes.
    Idle,
}

#[derive(Debug, Default, Clone)]
pub struct ProgramCursor {
    current: Option<PcodeHandle>,
    /// Load serial of `current`, to notice a slot refilled by another program.
    serial: u64,
    pc: usize,
    steps: u64,
    completed: u64,
}

impl ProgramCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program the cursor is positioned in, if any.
    pub fn current(&self) -> Option<PcodeHandle> {
        self.current
    }

    /// Total instruction bytes fetched.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Number of times a program was run to its last byte.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Fetch the next instruction byte.
    pub fn step(&mut self, repository: &PcodeRepository) -> Step {
        if let Some(handle) = self
            .current
            .filter(|&h| repository.serial(h) == Some(self.serial))
        {
            if let Ok(bytes) = repository.retrieve(handle) {
                if self.pc < bytes.len() {
                    return self.fetch(handle, bytes);
                }
            }
        }

        // Current program finished or gone: try the others in ring order,
        // ending with the current one so a lone program restarts.
        let after = self.current;
        let ring = repository
            .handles()
            .filter(move |&h| !after.is_some_and(|cur| h <= cur))
            .chain(
                repository
                    .handles()
                    .filter(move |&h| after.is_some_and(|cur| h <= cur)),
            );
        for handle in ring {
            if let Ok(bytes) = repository.retrieve(handle) {
                if !bytes.is_empty() {
                    self.current = Some(handle);
                    self.serial = repository.serial(handle).unwrap_or_default();
                    self.pc = 0;
                    return self.fetch(handle, bytes);
                }
            }
        }

        self.current = None;
        self.pc = 0;
        Step::Idle
    }

    /// Step against the repository held in the runtime state.
    pub fn step_state(&mut self, state: &RuntimeState) -> Result<Step, RuntimeError> {
        let repository = state.repository()?;
        Ok(self.step(&repository))
    }

    fn fetch(&mut self, handle: PcodeHandle, bytes: &[u8]) -> Step {
        let offset = self.pc;
        let opcode = bytes[offset];
        self.pc += 1;
        self.steps += 1;
        if self.pc == bytes.len() {
            self.completed += 1;
        }
        Step::Executed {
            handle,
            offset,
            opcode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opcodes(cursor: &mut ProgramCursor, repo: &PcodeRepository, n: usize) -> Vec<u8> {
        (0..n)
            .map(|_| match cursor.step(repo) {
                Step::Executed { opcode, .. } => opcode,
                Step::Idle => panic!("unexpected idle"),
            })
            .collect()
    }

    #[test]
    fn empty_repository_is_idle() {
        let repo = PcodeRepository::with_capacity(4, 64);
        let mut cursor = ProgramCursor::new();
        assert_eq!(cursor.step(&repo), Step::Idle);
        assert_eq!(cursor.steps(), 0);
    }

    #[test]
    fn walks_programs_round_robin() {
        let mut repo = PcodeRepository::with_capacity(4, 64);
        repo.add(&[1, 2]).unwrap();
        repo.add(&[]).unwrap();
        repo.add(&[3]).unwrap();

        let mut cursor = ProgramCursor::new();
        assert_eq!(opcodes(&mut cursor, &repo, 7), vec![1, 2, 3, 1, 2, 3, 1]);
        assert_eq!(cursor.completed(), 4);
    }

    #[test]
    fn follows_program_across_compaction() {
        let mut repo = PcodeRepository::with_capacity(4, 64);
        let a = repo.add(&[9, 9, 9]).unwrap();
        let b = repo.add(&[10, 11, 12]).unwrap();

        let mut cursor = ProgramCursor::new();
        assert_eq!(opcodes(&mut cursor, &repo, 4), vec![9, 9, 9, 10]);
        assert_eq!(cursor.current(), Some(b));

        // Moving b down to offset 0 does not disturb the cursor.
        repo.remove(a).unwrap();
        match cursor.step(&repo) {
            Step::Executed { handle, offset, opcode } => {
                assert_eq!(handle, b);
                assert_eq!(offset, 1);
                assert_eq!(opcode, 11);
            }
            Step::Idle => panic!("unexpected idle"),
        }
    }

    #[test]
    fn skips_unloaded_program() {
        let mut repo = PcodeRepository::with_capacity(4, 64);
        let a = repo.add(&[1, 1, 1]).unwrap();
        repo.add(&[2]).unwrap();

        let mut cursor = ProgramCursor::new();
        cursor.step(&repo);
        repo.remove(a).unwrap();
        assert_eq!(opcodes(&mut cursor, &repo, 2), vec![2, 2]);
    }

    #[test]
    fn reused_slot_restarts_from_first_byte() {
        let mut repo = PcodeRepository::with_capacity(4, 64);
        let a = repo.add(&[1, 2, 3, 4]).unwrap();

        let mut cursor = ProgramCursor::new();
        assert_eq!(opcodes(&mut cursor, &repo, 2), vec![1, 2]);

        repo.remove(a).unwrap();
        let b = repo.add(&[7, 8, 9, 10]).unwrap();
        assert_eq!(b, a);
        assert_eq!(
            cursor.step(&repo),
            Step::Executed {
                handle: b,
                offset: 0,
                opcode: 7
            }
        );
    }
}
