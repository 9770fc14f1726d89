//! Duck Machine register file.
//!
//! 16 word-sized registers:
//! - r0 is hard-wired to zero; writes to it are discarded
//! - r15 is the program counter
//! - r1..r14 are general purpose

use crate::cpu::Word;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of registers in the file.
pub const NUM_REGISTERS: usize = 16;

/// Index of the zero register.
pub const ZERO: usize = 0;

/// Index of the program counter.
pub const PC: usize = 15;

/// The register file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    regs: [Word; NUM_REGISTERS],
}

impl Registers {
    /// Create a register file with every register zeroed.
    pub fn new() -> Self {
        Self {
            regs: [0; NUM_REGISTERS],
        }
    }

    /// Read a register. r0 always reads as 0.
    ///
    /// # Panics
    /// Panics if `index` is not in 0-15.
    #[inline]
    pub fn get(&self, index: usize) -> Word {
        assert!(
            index < NUM_REGISTERS,
            "register index {} out of range (0-{})",
            index,
            NUM_REGISTERS - 1
        );
        if index == ZERO {
            0
        } else {
            self.regs[index]
        }
    }

    /// Write a register. Writes to r0 are ignored.
    ///
    /// # Panics
    /// Panics if `index` is not in 0-15.
    #[inline]
    pub fn put(&mut self, index: usize, value: Word) {
        assert!(
            index < NUM_REGISTERS,
            "register index {} out of range (0-{})",
            index,
            NUM_REGISTERS - 1
        );
        if index != ZERO {
            self.regs[index] = value;
        }
    }

    /// Current program counter (r15).
    #[inline]
    pub fn pc(&self) -> Word {
        self.regs[PC]
    }

    /// Set the program counter.
    #[inline]
    pub fn set_pc(&mut self, addr: Word) {
        self.regs[PC] = addr;
    }

    /// Move the program counter to the next word.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> Word {
        let old = self.regs[PC];
        self.regs[PC] = old.wrapping_add(1);
        old
    }

    /// All register values, r0 first.
    pub fn values(&self) -> [Word; NUM_REGISTERS] {
        let mut values = self.regs;
        values[ZERO] = 0;
        values
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_map();
        for (i, value) in self.values().iter().enumerate() {
            list.entry(&format_args!("r{}", i), value);
        }
        list.finish()
    }
}
