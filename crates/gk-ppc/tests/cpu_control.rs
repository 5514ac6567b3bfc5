//! CPU thread state machine driven from a controller thread

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{asm, load, machine, CODE};
use gk_core::config::CpuCore;
use gk_ppc::{Cpu, CpuState};

fn counting_cpu(core: CpuCore) -> Cpu {
    let m = machine(core);
    load(&m, CODE, &[asm::addi(3, 3, 1), asm::b(-4)]);
    let cpu = Cpu::new(m);
    cpu.with_machine(|m| m.state.pc = CODE);
    cpu
}

fn wait_for(cpu: &Cpu, state: CpuState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while cpu.state() != state {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

fn counter(cpu: &Cpu) -> u32 {
    cpu.with_machine(|m| m.state.gpr[3])
}

#[test]
fn test_run_pause_and_stop() {
    let cpu = counting_cpu(CpuCore::Tiered);
    let handle = cpu.spawn().unwrap();

    cpu.start();
    thread::sleep(Duration::from_millis(20));
    cpu.pause();
    let first = counter(&cpu);
    assert!(first > 0);

    thread::sleep(Duration::from_millis(10));
    assert_eq!(counter(&cpu), first);

    cpu.start();
    thread::sleep(Duration::from_millis(20));
    cpu.stop();
    handle.join().unwrap();
    assert!(counter(&cpu) > first);
    assert_eq!(cpu.state(), CpuState::PowerDown);
}

#[test]
fn test_pause_and_lock_holds_the_cpu() {
    let cpu = counting_cpu(CpuCore::Interpreter);
    let handle = cpu.spawn().unwrap();
    cpu.start();
    thread::sleep(Duration::from_millis(10));

    assert!(cpu.pause_and_lock(true, false));
    let held = counter(&cpu);
    // Neither a start nor a step request gets past the lock
    cpu.start();
    thread::sleep(Duration::from_millis(10));
    assert_eq!(counter(&cpu), held);

    cpu.pause();
    cpu.pause_and_lock(false, true);
    assert_eq!(cpu.state(), CpuState::Running);
    thread::sleep(Duration::from_millis(10));
    assert!(counter(&cpu) > held);

    cpu.stop();
    handle.join().unwrap();
}

#[test]
fn test_breakpoint_switches_to_stepping() {
    let cpu = counting_cpu(CpuCore::Tiered);
    cpu.with_machine(|m| m.add_breakpoint(CODE + 4, false));
    let handle = cpu.spawn().unwrap();

    cpu.start();
    assert!(wait_for(&cpu, CpuState::Stepping));
    cpu.with_machine(|m| {
        assert_eq!(m.state.pc, CODE + 4);
        assert_eq!(m.state.gpr[3], 1);
        assert_eq!(m.breakpoints().get(CODE + 4).unwrap().hit_count, 1);
    });

    // Step over the branch, then resume into the next hit
    cpu.single_step().unwrap();
    assert_eq!(cpu.with_machine(|m| m.state.pc), CODE);
    cpu.start();
    assert!(wait_for(&cpu, CpuState::Stepping));
    assert_eq!(counter(&cpu), 2);

    cpu.stop();
    handle.join().unwrap();
}

#[test]
fn test_single_step_pauses_running_cpu() {
    let cpu = counting_cpu(CpuCore::Tiered);
    let handle = cpu.spawn().unwrap();
    cpu.start();
    thread::sleep(Duration::from_millis(5));

    cpu.single_step().unwrap();
    assert_eq!(cpu.state(), CpuState::Stepping);
    let (pc, count) = cpu.with_machine(|m| (m.state.pc, m.state.gpr[3]));
    cpu.single_step().unwrap();
    let (next_pc, next_count) = cpu.with_machine(|m| (m.state.pc, m.state.gpr[3]));
    if pc == CODE {
        assert_eq!((next_pc, next_count), (CODE + 4, count + 1));
    } else {
        assert_eq!((next_pc, next_count), (CODE, count));
    }

    cpu.stop();
    handle.join().unwrap();
    assert!(cpu.single_step().is_err());
}
