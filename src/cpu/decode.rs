//! Instruction decoder for the Duck Machine.
//!
//! Every instruction is a single 32-bit word. Fields, from the most
//! significant bit down:
//!
//! ```text
//!  31  30..26  25..22   21..18   17..14  13..10   9..0
//! +---+-------+-------+--------+-------+-------+--------+
//! | - |  op   | cond  | target | src1  | src2  | offset |
//! +---+-------+-------+--------+-------+-------+--------+
//! ```
//!
//! Bit 31 is reserved and ignored. The offset is a 10-bit two's-complement
//! value. Decoding never fails: every word is a legal machine word.

use crate::bits::BitField;
use crate::cpu::flags::CondFlag;
use crate::cpu::registers::NUM_REGISTERS;
use crate::cpu::Word;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const RESERVED: BitField = BitField::new(31, 31);
const OP: BitField = BitField::new(26, 30);
const COND: BitField = BitField::new(22, 25);
const REG_TARGET: BitField = BitField::new(18, 21);
const REG_SRC1: BitField = BitField::new(14, 17);
const REG_SRC2: BitField = BitField::new(10, 13);
const OFFSET: BitField = BitField::new(0, 9);

/// Smallest offset an instruction can carry.
pub const OFFSET_MIN: Word = OFFSET.signed_min();
/// Largest offset an instruction can carry.
pub const OFFSET_MAX: Word = OFFSET.signed_max();

/// Operation selected by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// Stop the machine.
    Halt,
    /// `target := mem[src1 + src2 + offset]`
    Load,
    /// `mem[src1 + src2 + offset] := target`
    Store,
    /// `target := src1 + (src2 + offset)`
    Add,
    /// `target := src1 - (src2 + offset)`
    Sub,
    /// `target := src1 * (src2 + offset)`
    Mul,
    /// `target := src1 / (src2 + offset)`, rounding toward negative infinity
    Div,
    /// Do nothing except advance the program counter.
    Nop,
}

impl OpCode {
    pub const ALL: [OpCode; 8] = [
        OpCode::Halt,
        OpCode::Load,
        OpCode::Store,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Nop,
    ];

    /// Map an op field value to an opcode.
    /// Unassigned values decode as [`OpCode::Halt`].
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => OpCode::Load,
            2 => OpCode::Store,
            3 => OpCode::Add,
            4 => OpCode::Sub,
            5 => OpCode::Mul,
            6 => OpCode::Div,
            7 => OpCode::Nop,
            _ => OpCode::Halt,
        }
    }

    /// Value stored in the op field.
    pub fn bits(self) -> u32 {
        match self {
            OpCode::Halt => 0,
            OpCode::Load => 1,
            OpCode::Store => 2,
            OpCode::Add => 3,
            OpCode::Sub => 4,
            OpCode::Mul => 5,
            OpCode::Div => 6,
            OpCode::Nop => 7,
        }
    }

    /// Assembly mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Halt => "HALT",
            OpCode::Load => "LOAD",
            OpCode::Store => "STORE",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Nop => "NOP",
        }
    }
}

/// A decoded Duck Machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    /// Predicate: the instruction takes effect only if this mask shares a
    /// bit with the CPU's current condition.
    pub cond: CondFlag,
    pub reg_target: u8,
    pub reg_src1: u8,
    pub reg_src2: u8,
    pub offset: Word,
}

impl Instruction {
    /// Build an instruction, checking that every field fits its slot.
    pub fn new(
        op: OpCode,
        cond: CondFlag,
        reg_target: u8,
        reg_src1: u8,
        reg_src2: u8,
        offset: Word,
    ) -> Result<Self, EncodeError> {
        for reg in [reg_target, reg_src1, reg_src2] {
            if reg as usize >= NUM_REGISTERS {
                return Err(EncodeError::InvalidRegister(reg));
            }
        }
        if !(OFFSET_MIN..=OFFSET_MAX).contains(&offset) {
            return Err(EncodeError::OffsetOutOfRange(offset));
        }
        Ok(Self {
            op,
            cond,
            reg_target,
            reg_src1,
            reg_src2,
            offset,
        })
    }

    /// The canonical halt instruction (`HALT r0,r0,r0[0]`).
    pub fn halt() -> Self {
        Self {
            op: OpCode::Halt,
            cond: CondFlag::ALWAYS,
            reg_target: 0,
            reg_src1: 0,
            reg_src2: 0,
            offset: 0,
        }
    }
}

impl fmt::Display for Instruction {
    /// Duck Machine assembly notation, e.g. `ADD/P  r1,r0,r0[5]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = if self.cond == CondFlag::ALWAYS {
            self.op.mnemonic().to_string()
        } else {
            format!("{}/{}", self.op.mnemonic(), self.cond)
        };
        write!(
            f,
            "{:<6} r{},r{},r{}[{}]",
            head, self.reg_target, self.reg_src1, self.reg_src2, self.offset
        )
    }
}

/// Decode a 32-bit instruction word.
pub fn decode(word: Word) -> Instruction {
    let bits = word as u32;
    Instruction {
        op: OpCode::from_bits(OP.extract(bits)),
        cond: CondFlag::from_bits(COND.extract(bits)),
        reg_target: REG_TARGET.extract(bits) as u8,
        reg_src1: REG_SRC1.extract(bits) as u8,
        reg_src2: REG_SRC2.extract(bits) as u8,
        offset: OFFSET.extract_signed(bits),
    }
}

/// Encode an instruction back to a word. The reserved bit is always 0.
///
/// Exact inverse of [`decode`] for instructions whose fields are in range;
/// register indices and offsets that don't fit are truncated to their
/// field width.
pub fn encode(instr: &Instruction) -> Word {
    let mut bits = RESERVED.insert(0, 0);
    bits = OP.insert(instr.op.bits(), bits);
    bits = COND.insert(instr.cond.bits(), bits);
    bits = REG_TARGET.insert(instr.reg_target as u32, bits);
    bits = REG_SRC1.insert(instr.reg_src1 as u32, bits);
    bits = REG_SRC2.insert(instr.reg_src2 as u32, bits);
    bits = OFFSET.insert(instr.offset as u32, bits);
    bits as Word
}

/// Errors that can occur when building an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("invalid register r{0} (expected r0-r15)")]
    InvalidRegister(u8),

    #[error("offset {0} out of range (-512 to 511)")]
    OffsetOutOfRange(Word),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_zero_is_halt() {
        let instr = decode(0);
        assert_eq!(instr.op, OpCode::Halt);
        assert_eq!(instr.cond, CondFlag::NEVER);
    }

    #[test]
    fn test_opcode_bits_roundtrip() {
        for op in OpCode::ALL {
            assert_eq!(OpCode::from_bits(op.bits()), op);
        }
    }

    #[test]
    fn test_unknown_opcode_decodes_as_halt() {
        for bits in 8..32 {
            assert_eq!(OpCode::from_bits(bits), OpCode::Halt);
        }
        let word = OP.insert(0b11111, 0) as Word;
        assert_eq!(decode(word).op, OpCode::Halt);
    }

    #[test]
    fn test_field_positions() {
        let instr = Instruction::new(OpCode::Add, CondFlag::P, 1, 2, 3, -1).unwrap();
        let word = encode(&instr) as u32;
        assert_eq!(word >> 26, 3);
        assert_eq!((word >> 22) & 0xF, 4);
        assert_eq!((word >> 18) & 0xF, 1);
        assert_eq!((word >> 14) & 0xF, 2);
        assert_eq!((word >> 10) & 0xF, 3);
        assert_eq!(word & 0x3FF, 0x3FF);
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let test_cases = [
            Instruction::halt(),
            Instruction::new(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 5).unwrap(),
            Instruction::new(OpCode::Store, CondFlag::Z | CondFlag::P, 15, 14, 13, -512).unwrap(),
            Instruction::new(OpCode::Div, CondFlag::V, 7, 8, 9, 511).unwrap(),
            Instruction::new(OpCode::Nop, CondFlag::NEVER, 0, 0, 0, 0).unwrap(),
        ];

        for instr in test_cases {
            assert_eq!(decode(encode(&instr)), instr);
        }
    }

    #[test]
    fn test_reserved_bit_ignored() {
        let instr = Instruction::new(OpCode::Sub, CondFlag::M, 4, 5, 6, -7).unwrap();
        let word = encode(&instr);
        let with_reserved = (word as u32 | 0x8000_0000) as Word;
        assert_eq!(decode(with_reserved), instr);
    }

    #[test]
    fn test_new_rejects_bad_fields() {
        assert_eq!(
            Instruction::new(OpCode::Add, CondFlag::ALWAYS, 16, 0, 0, 0),
            Err(EncodeError::InvalidRegister(16))
        );
        assert_eq!(
            Instruction::new(OpCode::Add, CondFlag::ALWAYS, 0, 0, 0, 512),
            Err(EncodeError::OffsetOutOfRange(512))
        );
        assert!(Instruction::new(OpCode::Add, CondFlag::ALWAYS, 0, 0, 0, -513).is_err());
    }

    #[test]
    fn test_display() {
        let add = Instruction::new(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 5).unwrap();
        assert_eq!(add.to_string(), "ADD    r1,r0,r0[5]");

        let load = Instruction::new(OpCode::Load, CondFlag::Z | CondFlag::P, 2, 0, 15, -3).unwrap();
        assert_eq!(load.to_string(), "LOAD/ZP r2,r0,r15[-3]");
    }
}
