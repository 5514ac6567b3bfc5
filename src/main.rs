//! gekko - GameCube/Wii PowerPC CPU core
//!
//! Loads a raw big-endian program image into guest RAM and runs it.
//!
//! Usage: gekko <program.bin> [load_addr] [entry] [cycles]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gk_core::config::Config;
use gk_memory::{GuestMemory, Memory};
use gk_ppc::{Cpu, Machine};

const DEFAULT_LOAD_ADDRESS: u32 = 0x8000_3100;
const DEFAULT_CYCLES: u64 = 486_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn parse_u32(text: &str) -> Result<u32> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    value.with_context(|| format!("invalid number {text:?}"))
}

fn main() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    gk_core::logging::init(&config);

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 5 {
        bail!("usage: {} <program.bin> [load_addr] [entry] [cycles]", args[0]);
    }

    let path = &args[1];
    let load_address = args.get(2).map(|s| parse_u32(s)).transpose()?.unwrap_or(DEFAULT_LOAD_ADDRESS);
    let entry = args.get(3).map(|s| parse_u32(s)).transpose()?.unwrap_or(load_address);
    let cycles = match args.get(4) {
        Some(s) => s.parse().with_context(|| format!("invalid cycle count {s:?}"))?,
        None => DEFAULT_CYCLES,
    };

    let image = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
    let memory = Arc::new(GuestMemory::new());
    memory
        .write_bytes(load_address, &image)
        .with_context(|| format!("program does not fit at 0x{load_address:08x}"))?;

    let mut machine = Machine::new(&config.cpu, memory).context("failed to create machine")?;
    machine.state.pc = entry;
    tracing::info!(
        "Loaded {} bytes at 0x{:08x}, entry 0x{:08x}",
        image.len(),
        load_address,
        entry
    );

    let cpu = Cpu::new(machine);
    let handle = cpu.spawn()?;
    if config.general.start_paused {
        tracing::info!("CPU paused at start");
    } else {
        cpu.start();
        run_until_cycles(&cpu, cycles);
    }
    cpu.stop();
    if handle.join().is_err() {
        bail!("CPU thread panicked");
    }

    cpu.with_machine(print_summary);
    Ok(())
}

/// Let the CPU thread run until `cycles` have elapsed or it stops by itself
fn run_until_cycles(cpu: &Cpu, cycles: u64) {
    loop {
        thread::sleep(POLL_INTERVAL);
        let was_running = cpu.pause_and_lock(true, false);
        let elapsed = cpu.with_machine(|m| m.timing().ticks());
        let done = !was_running || elapsed >= cycles;
        cpu.pause_and_lock(false, !done);
        if done {
            break;
        }
    }
}

fn print_summary(machine: &mut Machine) {
    let stats = machine.stats();
    tracing::info!(
        "Executed {} instructions in {} cycles, {} exceptions taken",
        stats.instructions,
        stats.cycles,
        stats.exceptions_taken
    );
    if let Some(tiered) = stats.tiered {
        tracing::info!("{:?}", tiered);
    }

    let state = &machine.state;
    for row in 0..8 {
        let regs: Vec<String> = (0..4)
            .map(|col| {
                let r = row * 4 + col;
                format!("r{:<2} {:08x}", r, state.gpr[r])
            })
            .collect();
        println!("{}", regs.join("  "));
    }
    println!("pc  {:08x}  msr {:08x}  cr  {:08x}  lr  {:08x}", state.pc, state.msr, state.cr, state.lr());
}
