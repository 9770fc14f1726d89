//! CPU execution engine for the Duck Machine.
//!
//! Implements the fetch-decode-execute cycle. Every instruction is
//! predicated: it only takes effect when its condition mask overlaps the
//! flags left by the last arithmetic instruction. There are no branch
//! instructions; control flow is any write to r15.

use crate::cpu::alu;
use crate::cpu::decode::{self, Instruction, OpCode};
use crate::cpu::flags::CondFlag;
use crate::cpu::memory::{Memory, MemoryError};
use crate::cpu::{Registers, Word};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, Write};
use thiserror::Error;

pub(crate) const LOG_TARGET: &str = "duck_machine::cpu";

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU will keep executing when run.
    Ready,
    /// CPU has executed a HALT.
    Halted,
}

/// Published to listeners once per cycle, after decode and before execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuStep {
    /// Address the instruction was fetched from.
    pub pc_addr: Word,
    /// Raw instruction word.
    pub instr_word: Word,
    /// Decoded instruction.
    pub instr: Instruction,
}

/// Observer of CPU cycles, e.g. a tracer or a display.
///
/// Listeners only see the event, never the CPU, so they cannot change
/// how the cycle executes.
pub trait CpuListener {
    fn on_step(&mut self, event: &CpuStep);
}

impl<F: FnMut(&CpuStep)> CpuListener for F {
    fn on_step(&mut self, event: &CpuStep) {
        self(event)
    }
}

/// Serializable copy of the CPU's architectural state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub registers: Registers,
    pub condition: CondFlag,
    pub state: CpuState,
    pub cycles: u64,
}

/// The Duck Machine CPU, connected to a memory `M`.
pub struct Cpu<M> {
    /// CPU registers.
    pub regs: Registers,
    /// Condition flags from the last arithmetic instruction.
    pub condition: CondFlag,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count (for profiling).
    pub cycles: u64,
    memory: M,
    listeners: Vec<Box<dyn CpuListener + Send>>,
}

impl<M: Memory> Cpu<M> {
    /// Connect a new CPU to `memory`. Registers start zeroed and the
    /// condition flags start as ALWAYS.
    pub fn new(memory: M) -> Self {
        Self {
            regs: Registers::new(),
            condition: CondFlag::ALWAYS,
            state: CpuState::Ready,
            cycles: 0,
            memory,
            listeners: Vec::new(),
        }
    }

    /// The connected memory.
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Mutable access to the connected memory.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Disconnect and return the memory.
    pub fn into_memory(self) -> M {
        self.memory
    }

    /// Register a listener to be called on every cycle.
    pub fn add_listener<L: CpuListener + Send + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    /// Execute a single fetch/decode/execute cycle.
    ///
    /// Returns the instruction that was fetched, whether or not its
    /// predicate let it take effect.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        // Fetch
        let instr_addr = self.regs.pc();
        let instr_word = self.memory.get(instr_addr)?;

        // Decode
        let instr = decode::decode(instr_word);
        tracing::trace!(target: LOG_TARGET, pc = instr_addr, word = instr_word, %instr, "fetch");
        self.notify(&CpuStep {
            pc_addr: instr_addr,
            instr_word,
            instr,
        });

        // Execute
        if (self.condition & instr.cond).is_never() {
            self.regs.advance_pc();
            self.cycles += 1;
            return Ok(instr);
        }

        let left = i64::from(self.regs.get(instr.reg_src1 as usize));
        let right = i64::from(self.regs.get(instr.reg_src2 as usize)) + i64::from(instr.offset);
        let (result, flag) = alu::execute(instr.op, left, right);

        // Advance before commit so a write to r15 wins. A faulting commit
        // still counts as a cycle.
        self.regs.advance_pc();
        self.cycles += 1;
        if flag == CondFlag::V && matches!(instr.op, OpCode::Load | OpCode::Store) {
            return Err(MemoryError::AddressOverflow(left + right).into());
        }
        self.commit(&instr, result, flag)?;
        Ok(instr)
    }

    /// Apply the ALU result of an instruction whose predicate held.
    fn commit(&mut self, instr: &Instruction, result: Word, flag: CondFlag) -> Result<(), CpuError> {
        let target = instr.reg_target as usize;
        match instr.op {
            OpCode::Store => {
                let value = self.regs.get(target);
                self.memory.put(result, value)?;
            }
            OpCode::Load => {
                let value = self.memory.get(result)?;
                self.regs.put(target, value);
            }
            OpCode::Halt => {
                self.state = CpuState::Halted;
                tracing::debug!(target: LOG_TARGET, pc = self.regs.pc(), cycles = self.cycles, "halt");
            }
            OpCode::Nop => {}
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                self.regs.put(target, result);
                self.condition = flag;
            }
        }
        Ok(())
    }

    fn notify(&mut self, event: &CpuStep) {
        for listener in self.listeners.iter_mut() {
            listener.on_step(event);
        }
    }

    /// Run from `from_addr` until a HALT executes.
    ///
    /// With `single_step`, prompts on stdout and waits for a line on stdin
    /// before every cycle. Returns the number of cycles executed.
    pub fn run(&mut self, from_addr: Word, single_step: bool) -> Result<u64, CpuError> {
        if single_step {
            self.run_with_pause(from_addr, prompt_for_step)
        } else {
            self.run_with_pause(from_addr, |_| Ok(()))
        }
    }

    /// Run from `from_addr` until a HALT executes, calling `pause` with the
    /// cycle number before every cycle. An error from `pause` stops the run.
    pub fn run_with_pause<F>(&mut self, from_addr: Word, mut pause: F) -> Result<u64, CpuError>
    where
        F: FnMut(u64) -> io::Result<()>,
    {
        self.reset_to(from_addr);

        let mut step_count = 0u64;
        while self.state == CpuState::Ready {
            pause(step_count).map_err(|e| CpuError::Paused(e.to_string()))?;
            self.step()?;
            step_count += 1;
        }

        tracing::debug!(target: LOG_TARGET, cycles = step_count, "run finished");
        Ok(step_count)
    }

    /// Run from `from_addr` for at most `max_cycles` cycles.
    ///
    /// Stops early on HALT; check [`Cpu::is_halted`] to tell the two apart.
    pub fn run_limited(&mut self, from_addr: Word, max_cycles: u64) -> Result<u64, CpuError> {
        self.reset_to(from_addr);

        let mut step_count = 0u64;
        while self.state == CpuState::Ready && step_count < max_cycles {
            self.step()?;
            step_count += 1;
        }

        if self.state == CpuState::Ready {
            tracing::debug!(target: LOG_TARGET, cycles = step_count, "cycle limit reached");
        }
        Ok(step_count)
    }

    /// Clear the halted state and point the program counter at `from_addr`.
    /// Other registers keep their values.
    fn reset_to(&mut self, from_addr: Word) {
        self.state = CpuState::Ready;
        self.regs.set_pc(from_addr);
        tracing::debug!(target: LOG_TARGET, pc = from_addr, "run");
    }

    /// Copy out the architectural state.
    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            registers: self.regs.clone(),
            condition: self.condition,
            state: self.state,
            cycles: self.cycles,
        }
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }
}

fn prompt_for_step(step: u64) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "Step {}; press enter", step)?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

impl<M: fmt::Debug> fmt::Debug for Cpu<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("condition", &self.condition)
            .field("regs", &self.regs)
            .field("memory", &self.memory)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("single-step pause failed: {0}")]
    Paused(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::memory::MainMemory;
    use crate::cpu::registers::PC;
    use std::sync::{Arc, Mutex};

    fn instr(op: OpCode, cond: CondFlag, target: u8, src1: u8, src2: u8, offset: Word) -> Word {
        encode(&Instruction::new(op, cond, target, src1, src2, offset).unwrap())
    }

    fn make_cpu(program: &[Word]) -> Cpu<MainMemory> {
        let mut mem = MainMemory::new(256);
        mem.load_program(0, program).unwrap();
        Cpu::new(mem)
    }

    #[test]
    fn test_cpu_halt() {
        let mut cpu = make_cpu(&[encode(&Instruction::halt())]);

        let executed = cpu.run(0, false).unwrap();

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc(), 1);
    }

    #[test]
    fn test_cpu_nop_then_halt() {
        let nop = instr(OpCode::Nop, CondFlag::ALWAYS, 3, 0, 0, 9);
        let mut cpu = make_cpu(&[nop, nop, nop, encode(&Instruction::halt())]);

        let executed = cpu.run(0, false).unwrap();

        assert_eq!(executed, 4);
        assert_eq!(cpu.regs.get(3), 0);
        assert_eq!(cpu.condition, CondFlag::ALWAYS);
    }

    #[test]
    fn test_arithmetic_sets_flags() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 10),
            instr(OpCode::Sub, CondFlag::ALWAYS, 2, 0, 1, 0),
            encode(&Instruction::halt()),
        ]);

        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.get(1), 10);
        assert_eq!(cpu.regs.get(2), -10);
        assert_eq!(cpu.condition, CondFlag::M);
    }

    #[test]
    fn test_mul_and_div() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 6),
            instr(OpCode::Mul, CondFlag::ALWAYS, 2, 1, 0, -7),
            instr(OpCode::Div, CondFlag::ALWAYS, 3, 2, 0, 4),
            encode(&Instruction::halt()),
        ]);

        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.get(2), -42);
        assert_eq!(cpu.regs.get(3), -11);
        assert_eq!(cpu.condition, CondFlag::M);
    }

    #[test]
    fn test_divide_by_zero_still_writes_target() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 9),
            instr(OpCode::Div, CondFlag::ALWAYS, 1, 1, 0, 0),
            encode(&Instruction::halt()),
        ]);

        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.get(1), 0);
        assert_eq!(cpu.condition, CondFlag::V);
    }

    #[test]
    fn test_wide_operand_overflow_still_writes_target() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 2, 1),
            encode(&Instruction::halt()),
        ]);
        cpu.regs.put(1, 5);
        cpu.regs.put(2, Word::MAX);

        cpu.run_limited(0, 10).unwrap();

        assert_eq!(cpu.regs.get(1), 0);
        assert_eq!(cpu.condition, CondFlag::V);
    }

    #[test]
    fn test_wide_operand_with_result_in_range() {
        // r2 + offset exceeds a word, r1 - (r2 + offset) does not
        let mut cpu = make_cpu(&[
            instr(OpCode::Sub, CondFlag::ALWAYS, 3, 1, 2, 1),
            encode(&Instruction::halt()),
        ]);
        cpu.regs.put(1, Word::MAX);
        cpu.regs.put(2, Word::MAX);

        cpu.run_limited(0, 10).unwrap();

        assert_eq!(cpu.regs.get(3), -1);
        assert_eq!(cpu.condition, CondFlag::M);
    }

    #[test]
    fn test_store_address_overflow_faults() {
        let store = instr(OpCode::Store, CondFlag::ALWAYS, 3, 1, 2, 0);
        let mut cpu = make_cpu(&[store]);
        cpu.regs.put(1, Word::MAX);
        cpu.regs.put(2, 1);
        cpu.regs.put(3, 777);

        let err = cpu.step().unwrap_err();

        let addr = i64::from(Word::MAX) + 1;
        assert_eq!(err, CpuError::Memory(MemoryError::AddressOverflow(addr)));
        assert_eq!(cpu.memory_mut().get(0).unwrap(), store);
        assert_eq!(cpu.condition, CondFlag::ALWAYS);
    }

    #[test]
    fn test_load_address_overflow_faults() {
        let mut cpu = make_cpu(&[instr(OpCode::Load, CondFlag::ALWAYS, 3, 1, 0, -1)]);
        cpu.regs.put(1, Word::MIN);
        cpu.regs.put(3, 42);

        let err = cpu.step().unwrap_err();

        let addr = i64::from(Word::MIN) - 1;
        assert_eq!(err, CpuError::Memory(MemoryError::AddressOverflow(addr)));
        assert_eq!(cpu.regs.get(3), 42);
    }

    #[test]
    fn test_faulting_cycle_is_counted() {
        let mut cpu = make_cpu(&[instr(OpCode::Store, CondFlag::ALWAYS, 1, 0, 0, -1)]);

        cpu.step().unwrap_err();

        let snap = cpu.snapshot();
        assert_eq!(snap.registers.pc(), 1);
        assert_eq!(snap.cycles, 1);
    }

    #[test]
    fn test_configured_cpu_moves_to_thread() {
        let seen = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&seen);

        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 4),
            encode(&Instruction::halt()),
        ]);
        cpu.add_listener(move |_: &CpuStep| *sink.lock().unwrap() += 1);

        let cpu = std::thread::spawn(move || {
            cpu.run(0, false).unwrap();
            cpu
        })
        .join()
        .unwrap();

        assert_eq!(cpu.regs.get(1), 4);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_load_store_do_not_touch_flags() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Sub, CondFlag::ALWAYS, 1, 0, 0, 3),
            instr(OpCode::Store, CondFlag::ALWAYS, 1, 0, 0, 100),
            instr(OpCode::Load, CondFlag::ALWAYS, 2, 0, 0, 100),
            encode(&Instruction::halt()),
        ]);

        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.get(2), -3);
        assert_eq!(cpu.memory_mut().get(100).unwrap(), -3);
        assert_eq!(cpu.condition, CondFlag::M);
    }

    #[test]
    fn test_predicate_skips_instruction() {
        let mut cpu = make_cpu(&[
            // r1 := 0, condition := Z
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 0),
            // Skipped: condition is Z
            instr(OpCode::Add, CondFlag::P, 2, 0, 0, 7),
            // Taken
            instr(OpCode::Add, CondFlag::Z | CondFlag::P, 3, 0, 0, 8),
            encode(&Instruction::halt()),
        ]);

        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.get(2), 0);
        assert_eq!(cpu.regs.get(3), 8);
    }

    #[test]
    fn test_write_to_pc_branches() {
        let mut cpu = make_cpu(&[
            // Jump to address 3
            instr(OpCode::Add, CondFlag::ALWAYS, PC as u8, 0, 0, 3),
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 1),
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 2),
            encode(&Instruction::halt()),
        ]);

        let executed = cpu.run(0, false).unwrap();

        assert_eq!(executed, 2);
        assert_eq!(cpu.regs.get(1), 0);
    }

    #[test]
    fn test_pc_relative_loop() {
        // Count r1 down from 3 to 0, incrementing r2 each pass
        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 1, 0, 0, 3),
            instr(OpCode::Add, CondFlag::ALWAYS, 2, 2, 0, 1),
            instr(OpCode::Sub, CondFlag::ALWAYS, 1, 1, 0, 1),
            // Back to address 1 while r1 > 0; r15 reads as 3 here
            instr(OpCode::Sub, CondFlag::P, PC as u8, PC as u8, 0, 2),
            encode(&Instruction::halt()),
        ]);

        cpu.run_limited(0, 100).unwrap();

        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.get(1), 0);
        assert_eq!(cpu.regs.get(2), 3);
    }

    #[test]
    fn test_load_into_pc() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Load, CondFlag::ALWAYS, PC as u8, 0, 0, 10),
            encode(&Instruction::halt()),
            encode(&Instruction::halt()),
        ]);
        cpu.memory_mut().put(10, 2).unwrap();

        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.pc(), 3);
    }

    #[test]
    fn test_listeners_see_every_fetch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let add = instr(OpCode::Add, CondFlag::NEVER, 1, 0, 0, 1);
        let mut cpu = make_cpu(&[add, encode(&Instruction::halt())]);
        cpu.add_listener(move |event: &CpuStep| sink.lock().unwrap().push(*event));

        cpu.run(0, false).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].pc_addr, 0);
        assert_eq!(seen[0].instr_word, add);
        assert_eq!(seen[0].instr, decode::decode(add));
        assert_eq!(seen[1].pc_addr, 1);
        assert_eq!(seen[1].instr, Instruction::halt());
    }

    #[test]
    fn test_fetch_fault_propagates() {
        let mut cpu = Cpu::new(MainMemory::new(2));

        let err = cpu.run_limited(0, 10).unwrap_err();

        assert_eq!(err, CpuError::Memory(MemoryError::SegmentationFault(2)));
    }

    #[test]
    fn test_store_fault_propagates() {
        let mut cpu = make_cpu(&[instr(OpCode::Store, CondFlag::ALWAYS, 1, 0, 0, -1)]);

        let err = cpu.step().unwrap_err();

        assert_eq!(err, CpuError::Memory(MemoryError::SegmentationFault(-1)));
    }

    #[test]
    fn test_run_limited_stops() {
        // Zero words decode as HALT/NEVER and fall through forever
        let mut cpu = make_cpu(&[]);

        let executed = cpu.run_limited(0, 50).unwrap();

        assert_eq!(executed, 50);
        assert!(!cpu.is_halted());
        assert_eq!(cpu.regs.pc(), 50);
    }

    #[test]
    fn test_run_keeps_registers() {
        let mut cpu = make_cpu(&[encode(&Instruction::halt())]);
        cpu.regs.put(4, 99);

        cpu.run(0, false).unwrap();
        cpu.run(0, false).unwrap();

        assert_eq!(cpu.regs.get(4), 99);
        assert_eq!(cpu.cycles, 2);
    }

    #[test]
    fn test_pause_called_each_cycle() {
        let nop = instr(OpCode::Nop, CondFlag::ALWAYS, 0, 0, 0, 0);
        let mut cpu = make_cpu(&[nop, nop, encode(&Instruction::halt())]);

        let mut pauses = Vec::new();
        cpu.run_with_pause(0, |n| {
            pauses.push(n);
            Ok(())
        })
        .unwrap();

        assert_eq!(pauses, vec![0, 1, 2]);
    }

    #[test]
    fn test_pause_error_stops_run() {
        let mut cpu = make_cpu(&[encode(&Instruction::halt())]);

        let err = cpu
            .run_with_pause(0, |_| Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed")))
            .unwrap_err();

        assert!(matches!(err, CpuError::Paused(_)));
        assert_eq!(cpu.cycles, 0);
    }

    #[test]
    fn test_snapshot() {
        let mut cpu = make_cpu(&[
            instr(OpCode::Add, CondFlag::ALWAYS, 5, 0, 0, 12),
            encode(&Instruction::halt()),
        ]);
        cpu.run(0, false).unwrap();

        let snap = cpu.snapshot();
        assert_eq!(snap.registers.get(5), 12);
        assert_eq!(snap.condition, CondFlag::P);
        assert_eq!(snap.state, CpuState::Halted);
        assert_eq!(snap.cycles, 2);
    }
}
