//! Front-end helpers for Duck Machine programs.
//!
//! This module provides:
//! - The object file format produced by the assembler
//! - A disassembler (words → readable text)

pub mod disasm;
pub mod object;

pub use disasm::{disassemble, disassemble_word};
pub use object::{load_object, parse_object, save_object, ObjectError, ObjectFile};
