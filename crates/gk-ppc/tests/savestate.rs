//! Save states resume execution deterministically

mod common;

use common::{asm, config, load, machine, machine_with, CODE, CORES};
use gk_core::config::CpuCore;
use gk_core::CpuError;
use gk_ppc::state::Msr;
use gk_ppc::Machine;

/// A counting loop interrupted by a self-rearming decrementer
fn interrupted_loop(core: CpuCore) -> Machine {
    let mut m = machine(core);
    load(
        &m,
        CODE,
        &[asm::li(4, 50), asm::mtdec(4), asm::addi(3, 3, 1), asm::b(-4)],
    );
    load(&m, 0x900, &[asm::addi(5, 5, 1), asm::li(4, 50), asm::mtdec(4), asm::rfi()]);
    m.state.pc = CODE;
    m.state.msr = Msr::EE.bits();
    m
}

#[test]
fn test_resume_matches_uninterrupted_run() {
    for core in CORES {
        let mut m = interrupted_loop(core);
        m.run_for(5_000);
        let saved = m.save_state().unwrap();

        m.run_for(7_000);
        let expected = m.state.clone();
        let expected_ticks = m.timing().ticks();

        m.load_state(&saved).unwrap();
        m.run_for(7_000);
        assert_eq!(m.state, expected, "{core:?}");
        assert_eq!(m.timing().ticks(), expected_ticks, "{core:?}");
        assert!(m.state.gpr[5] > 0, "{core:?}");
    }
}

#[test]
fn test_state_moves_between_machines() {
    let mut source = interrupted_loop(CpuCore::Tiered);
    source.add_breakpoint(0x8000_4000, false);
    source.run_for(3_000);
    let saved = source.save_state().unwrap();

    let mut target = machine_with(&config(CpuCore::Tiered, false));
    target.load_state(&saved).unwrap();
    assert_eq!(target.state, source.state);
    assert_eq!(target.timing().snapshot(), source.timing().snapshot());
    assert!(target.breakpoints().is_address_breakpoint(0x8000_4000));
    assert_eq!(target.memory().read_be32(0x900).unwrap(), asm::addi(5, 5, 1));

    source.run_for(4_000);
    target.run_for(4_000);
    assert_eq!(target.state, source.state);
}

#[test]
fn test_truncated_state_is_rejected() {
    let m = interrupted_loop(CpuCore::Interpreter);
    let saved = m.save_state().unwrap();

    let mut other = machine(CpuCore::Interpreter);
    let err = other.load_state(&saved[..saved.len() / 2]).unwrap_err();
    assert!(matches!(err, CpuError::LoadState(_)));
    assert_eq!(other.state.pc, 0);
}
