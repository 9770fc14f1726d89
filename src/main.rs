//! Duck Machine - CLI Entry Point
//!
//! Commands:
//! - `duck-machine run <program.obj>` - Load an object file and run it
//! - `duck-machine disasm <program.obj>` - Disassemble an object file

use clap::{Parser, Subcommand};
use duckmachine::cpu::memory::{INPUT_ADDR, OUTPUT_ADDR};
use duckmachine::{CondFlag, Cpu, CpuStep, MainMemory, MappedMemory, MemoryError, Word};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "duck-machine")]
#[command(version)]
#[command(about = "An emulator for the Duck Machine teaching computer")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the object file to execute
        program: String,
        /// Address to start execution at
        #[arg(short, long, default_value = "0")]
        start: Word,
        /// Maximum number of cycles to run
        #[arg(short, long, default_value = "1000000")]
        max_cycles: u64,
        /// Number of words of main memory
        #[arg(long, default_value = "1024")]
        memory_size: usize,
        /// Print each instruction as it is fetched
        #[arg(short, long)]
        trace: bool,
        /// Wait for enter before each cycle (ignores --max-cycles)
        #[arg(long)]
        step: bool,
        /// Print the final CPU state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disassemble an object file to readable text
    Disasm {
        /// Path to the object file
        program: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            program,
            start,
            max_cycles,
            memory_size,
            trace,
            step,
            json,
        } => {
            let options = RunOptions {
                start,
                max_cycles,
                memory_size,
                trace,
                step,
                json,
            };
            run_program(&program, &options);
        }
        Commands::Disasm { program } => {
            disassemble_file(&program);
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

struct RunOptions {
    start: Word,
    max_cycles: u64,
    memory_size: usize,
    trace: bool,
    step: bool,
    json: bool,
}

fn run_program(path: &str, options: &RunOptions) {
    use duckmachine::asm::disasm::disassemble_word;
    use duckmachine::load_object;

    let object = match load_object(path) {
        Ok(object) => object,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            std::process::exit(1);
        }
    };
    tracing::info!(path, words = object.len(), "loaded object file");

    if object.is_empty() {
        eprintln!("No instructions to execute");
        std::process::exit(1);
    }

    let mut main_memory = MainMemory::new(options.memory_size);
    if let Err(e) = main_memory.load_program(0, &object.words) {
        eprintln!("Failed to load program: {}", e);
        std::process::exit(1);
    }

    let mut memory = MappedMemory::new(main_memory);
    memory.map_input(INPUT_ADDR, read_console_word);
    memory.map_output(OUTPUT_ADDR, |value| {
        println!("Quack!: {}", value);
        Ok(())
    });

    let mut cpu = Cpu::new(memory);
    if options.trace {
        cpu.add_listener(|event: &CpuStep| {
            println!(
                "{:04}: {:<24} # {}",
                event.pc_addr,
                disassemble_word(event.instr_word),
                event.instr_word
            );
        });
    }

    let result = if options.step {
        cpu.run(options.start, true)
    } else {
        cpu.run_limited(options.start, options.max_cycles)
    };

    if let Err(e) = result {
        eprintln!("CPU error at PC={}: {}", cpu.regs.pc(), e);
        std::process::exit(1);
    }

    if options.json {
        match serde_json::to_string_pretty(&cpu.snapshot()) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Failed to serialize CPU state: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print_state(&cpu.snapshot());
    }

    if !cpu.is_halted() {
        eprintln!();
        eprintln!(
            "Reached max cycles limit ({}). Use --max-cycles to increase.",
            options.max_cycles
        );
        std::process::exit(2);
    }
}

fn print_state(snapshot: &duckmachine::CpuSnapshot) {
    println!();
    println!("━━━ Result ━━━");
    println!("Cycles: {}", snapshot.cycles);
    println!("State: {:?}", snapshot.state);
    println!("Condition: {}", snapshot.condition);
    for (i, value) in snapshot.registers.values().iter().enumerate() {
        let name = if i == 15 { "r15 (pc)".to_string() } else { format!("r{}", i) };
        println!("{:<9} {}", name, value);
    }
    if snapshot.condition == CondFlag::V {
        println!("Last arithmetic instruction overflowed");
    }
}

/// Input device for the console address: prompt and read one integer.
fn read_console_word() -> Result<Word, MemoryError> {
    let device_error = |message: String| MemoryError::Device {
        addr: INPUT_ADDR,
        message,
    };

    print!("Quack! Gimme an int! ");
    io::stdout().flush().map_err(|e| device_error(e.to_string()))?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| device_error(e.to_string()))?;

    line.trim()
        .parse::<Word>()
        .map_err(|e| device_error(format!("{:?} is not an integer: {}", line.trim(), e)))
}

fn disassemble_file(path: &str) {
    use duckmachine::{disassemble, load_object};

    let object = match load_object(path) {
        Ok(object) => object,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            std::process::exit(1);
        }
    };

    print!("{}", disassemble(&object.words));
}
