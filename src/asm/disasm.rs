//! Disassembler for Duck Machine programs.
//!
//! Converts instruction words back to readable assembly.

use crate::cpu::decode::decode;
use crate::cpu::Word;

/// Disassemble a single instruction word to text.
pub fn disassemble_word(word: Word) -> String {
    decode(word).to_string()
}

/// Disassemble a slice of words loaded from address 0.
pub fn disassemble(words: &[Word]) -> String {
    let mut output = String::new();
    output.push_str("# Duck Machine Disassembly\n");
    output.push_str("# ------------------------\n\n");

    for (addr, &word) in words.iter().enumerate() {
        let line = disassemble_word(word);
        output.push_str(&format!("{:04}: {:<24} # {}\n", addr, line, word));
    }

    output
}
