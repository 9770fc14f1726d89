//! # Duck Machine
//!
//! An emulator for the Duck Machine, a small 32-bit teaching computer with
//! sixteen registers, predicated instructions and word-addressed memory.
//!
//! The CPU core knows nothing about how programs are produced or shown:
//! it is handed a [`Memory`] and run from a start address. The `asm`
//! module provides the front-end pieces around it: object files and a
//! disassembler.

pub mod bits;
pub mod cpu;
pub mod asm;

// Re-export commonly used types
pub use cpu::{
    decode, encode, CondFlag, Cpu, CpuError, CpuListener, CpuSnapshot, CpuState, CpuStep,
    Instruction, MainMemory, MappedMemory, Memory, MemoryError, OpCode, Registers, Word,
};
pub use asm::{disassemble, load_object, parse_object, save_object, ObjectError, ObjectFile};
