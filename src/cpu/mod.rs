//! CPU emulation for the Duck Machine.
//!
//! This module implements the complete Duck Machine architecture:
//! - 16 word registers, r0 hard-wired to zero and r15 the program counter
//! - M/Z/P/V condition flags with per-instruction predicates
//! - 8-instruction set with a three-register, offset-addressed format
//! - memory reached through the [`Memory`] trait

pub mod alu;
pub mod decode;
pub mod execute;
pub mod flags;
pub mod memory;
pub mod registers;

/// A machine word: the contents of a register or memory cell.
pub type Word = i32;

pub use decode::{decode, encode, EncodeError, Instruction, OpCode};
pub use execute::{Cpu, CpuError, CpuListener, CpuSnapshot, CpuState, CpuStep};
pub use flags::CondFlag;
pub use memory::{MainMemory, MappedMemory, Memory, MemoryError};
pub use registers::Registers;
