//! Arithmetic/logic unit.
//!
//! A pure combinational unit: it picks one operation by opcode, applies it
//! to two operands, and classifies the result. Operands are full width so
//! `reg[src2] + offset` reaches the ALU unwrapped. Faults never escape;
//! they come back as a zero result with the V flag set.

use crate::cpu::decode::OpCode;
use crate::cpu::flags::CondFlag;
use crate::cpu::Word;

/// Apply `op` to `(left, right)`.
///
/// Load and store use the ALU for address calculation (`left + right`);
/// halt and no-op produce 0. Any result outside the word range is a fault.
pub fn execute(op: OpCode, left: i64, right: i64) -> (Word, CondFlag) {
    let result = match op {
        OpCode::Add | OpCode::Load | OpCode::Store => left.checked_add(right),
        OpCode::Sub => left.checked_sub(right),
        OpCode::Mul => left.checked_mul(right),
        OpCode::Div => floor_div(left, right),
        OpCode::Halt | OpCode::Nop => Some(0),
    };

    match result.and_then(|value| Word::try_from(value).ok()) {
        Some(value) => (value, CondFlag::from_sign(value)),
        None => (0, CondFlag::V),
    }
}

/// Integer division rounding toward negative infinity.
/// `None` on division by zero.
fn floor_div(left: i64, right: i64) -> Option<i64> {
    let quotient = left.checked_div(right)?;
    if left % right != 0 && (left < 0) != (right < 0) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}
