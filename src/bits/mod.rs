//! Bit-level primitives for the Duck Machine word format.
//!
//! Every shift and mask in the crate goes through [`BitField`], so the
//! instruction codec only has to name field positions.

mod field;

pub use field::BitField;
