//! Object file format for Duck Machine programs.
//!
//! An object file is plain text:
//! - One instruction or data word per line, in decimal
//! - `#` starts a comment that runs to the end of the line
//! - Blank lines are ignored
//!
//! Words are loaded at consecutive addresses in file order.

use crate::cpu::Word;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// A loaded object file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFile {
    /// The program words.
    pub words: Vec<Word>,
    /// Source line number (1-based) each word came from.
    pub lines: Vec<usize>,
}

impl ObjectFile {
    /// Create a new empty object file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a word.
    pub fn push(&mut self, word: Word, line: usize) {
        self.words.push(word);
        self.lines.push(line);
    }

    /// Get the number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Parse object file text.
pub fn parse_object(text: &str) -> Result<ObjectFile, ObjectError> {
    let mut object = ObjectFile::new();

    for (line_num, line) in text.lines().enumerate() {
        let code = match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let code = code.trim();

        if code.is_empty() {
            continue;
        }

        let word = code.parse::<Word>().map_err(|e| ObjectError::ParseError {
            line: line_num + 1,
            message: format!("{:?}: {}", code, e),
        })?;

        object.push(word, line_num + 1);
    }

    Ok(object)
}

/// Load an object file from disk.
pub fn load_object<P: AsRef<Path>>(path: P) -> Result<ObjectFile, ObjectError> {
    let text = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ObjectError::IoError(e.to_string()))?;
    parse_object(&text)
}

/// Save words to disk as an object file, one per line with its address.
pub fn save_object<P: AsRef<Path>>(path: P, words: &[Word]) -> Result<(), ObjectError> {
    let mut file = std::fs::File::create(path.as_ref())
        .map_err(|e| ObjectError::IoError(e.to_string()))?;
    write_object(&mut file, words).map_err(|e| ObjectError::IoError(e.to_string()))
}

fn write_object<W: Write>(out: &mut W, words: &[Word]) -> std::io::Result<()> {
    writeln!(out, "# Duck Machine object file")?;
    writeln!(out, "# {} words", words.len())?;

    for (addr, word) in words.iter().enumerate() {
        writeln!(out, "{} # {:04}", word, addr)?;
    }

    Ok(())
}

/// Errors that can occur during object file operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
}
