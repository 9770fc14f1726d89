//! Duck Machine memory subsystem.
//!
//! The CPU does not own a particular memory: it talks to whatever
//! implements [`Memory`]. Two implementations are provided:
//! - [`MainMemory`], a flat bounds-checked array of words
//! - [`MappedMemory`], which routes selected addresses to I/O callbacks

use crate::cpu::Word;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default number of words in a [`MainMemory`].
pub const DEFAULT_MEMORY_SIZE: usize = 1024;

/// Conventional address for reading a word from the console.
pub const INPUT_ADDR: Word = 510;

/// Conventional address for writing a word to the console.
pub const OUTPUT_ADDR: Word = 511;

/// A word-addressed store the CPU is connected to.
///
/// Reads take `&mut self` because a memory-mapped device may consume input.
pub trait Memory {
    /// Read the word at `addr`.
    fn get(&mut self, addr: Word) -> Result<Word, MemoryError>;

    /// Write `value` at `addr`.
    fn put(&mut self, addr: Word, value: Word) -> Result<(), MemoryError>;
}

impl<M: Memory + ?Sized> Memory for &mut M {
    fn get(&mut self, addr: Word) -> Result<Word, MemoryError> {
        (**self).get(addr)
    }

    fn put(&mut self, addr: Word, value: Word) -> Result<(), MemoryError> {
        (**self).put(addr, value)
    }
}

/// Flat memory of zero-initialized words at addresses `0..size`.
#[derive(Clone, PartialEq, Eq)]
pub struct MainMemory {
    cells: Vec<Word>,
}

impl MainMemory {
    /// Create a memory of `size` zeroed words.
    pub fn new(size: usize) -> Self {
        Self {
            cells: vec![0; size],
        }
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the memory has no cells at all.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Convert an address to a cell index.
    fn index(&self, addr: Word) -> Result<usize, MemoryError> {
        usize::try_from(addr)
            .ok()
            .filter(|&index| index < self.cells.len())
            .ok_or(MemoryError::SegmentationFault(addr))
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Copy a program into memory starting at `start_addr`.
    pub fn load_program(&mut self, start_addr: usize, program: &[Word]) -> Result<(), MemoryError> {
        let available = self.cells.len().saturating_sub(start_addr);
        if start_addr > self.cells.len() || program.len() > available {
            return Err(MemoryError::ProgramTooLarge {
                size: program.len(),
                available,
            });
        }

        self.cells[start_addr..start_addr + program.len()].copy_from_slice(program);
        Ok(())
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, Word)> {
        let end = start.saturating_add(count).min(self.cells.len());
        (start.min(end)..end).map(|i| (i, self.cells[i])).collect()
    }
}

impl Default for MainMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

impl Memory for MainMemory {
    fn get(&mut self, addr: Word) -> Result<Word, MemoryError> {
        let index = self.index(addr)?;
        Ok(self.cells[index])
    }

    fn put(&mut self, addr: Word, value: Word) -> Result<(), MemoryError> {
        let index = self.index(addr)?;
        self.cells[index] = value;
        Ok(())
    }
}

impl fmt::Debug for MainMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only count non-zero cells
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("MainMemory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &self.cells.len())
            .finish()
    }
}

type InputFn = Box<dyn FnMut() -> Result<Word, MemoryError> + Send>;
type OutputFn = Box<dyn FnMut(Word) -> Result<(), MemoryError> + Send>;

/// Memory with some addresses routed to device callbacks.
///
/// Reads from an input-mapped address call its callback instead of touching
/// the backing memory; writes to an output-mapped address likewise. All
/// other accesses go to the wrapped memory.
pub struct MappedMemory<M> {
    inner: M,
    inputs: HashMap<Word, InputFn>,
    outputs: HashMap<Word, OutputFn>,
}

impl<M: Memory> MappedMemory<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// Route reads of `addr` to `device`.
    pub fn map_input<F>(&mut self, addr: Word, device: F)
    where
        F: FnMut() -> Result<Word, MemoryError> + Send + 'static,
    {
        self.inputs.insert(addr, Box::new(device));
    }

    /// Route writes to `addr` to `device`.
    pub fn map_output<F>(&mut self, addr: Word, device: F)
    where
        F: FnMut(Word) -> Result<(), MemoryError> + Send + 'static,
    {
        self.outputs.insert(addr, Box::new(device));
    }

    /// The backing memory.
    pub fn inner(&self) -> &M {
        &self.inner
    }

    /// Mutable access to the backing memory.
    pub fn inner_mut(&mut self) -> &mut M {
        &mut self.inner
    }

    /// Drop the device mappings and return the backing memory.
    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Memory> Memory for MappedMemory<M> {
    fn get(&mut self, addr: Word) -> Result<Word, MemoryError> {
        match self.inputs.get_mut(&addr) {
            Some(device) => device(),
            None => self.inner.get(addr),
        }
    }

    fn put(&mut self, addr: Word, value: Word) -> Result<(), MemoryError> {
        match self.outputs.get_mut(&addr) {
            Some(device) => device(value),
            None => self.inner.put(addr, value),
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for MappedMemory<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inputs: Vec<_> = self.inputs.keys().collect();
        let mut outputs: Vec<_> = self.outputs.keys().collect();
        inputs.sort();
        outputs.sort();

        f.debug_struct("MappedMemory")
            .field("inner", &self.inner)
            .field("inputs", &inputs)
            .field("outputs", &outputs)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// Address is outside valid memory range.
    #[error("segmentation fault: address {0} is outside memory")]
    SegmentationFault(Word),

    /// Load/store address computed outside the word range.
    #[error("segmentation fault: address {0} is not a valid word")]
    AddressOverflow(i64),

    /// Program is too large to fit in memory.
    #[error("program size {size} exceeds available space {available}")]
    ProgramTooLarge { size: usize, available: usize },

    /// A memory-mapped device failed.
    #[error("device error at address {addr}: {message}")]
    Device { addr: Word, message: String },
}
