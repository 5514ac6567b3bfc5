//! Exception priority over every combination of pending exceptions

use gk_ppc::exceptions::vector;
use gk_ppc::state::{spr, Msr};
use gk_ppc::{Exceptions, PowerPcState};

const PC: u32 = 0x8000_0100;

/// (bit, vector, SRR0 points at the faulting instruction)
const PRIORITY: [(Exceptions, u32, bool); 9] = [
    (Exceptions::ISI, vector::ISI, false),
    (Exceptions::PROGRAM, vector::PROGRAM, true),
    (Exceptions::SYSCALL, vector::SYSCALL, false),
    (Exceptions::FPU_UNAVAILABLE, vector::FPU_UNAVAILABLE, true),
    (Exceptions::DSI, vector::DSI, true),
    (Exceptions::ALIGNMENT, vector::ALIGNMENT, true),
    (Exceptions::EXTERNAL_INT, vector::EXTERNAL_INT, false),
    (Exceptions::PERFORMANCE_MONITOR, vector::PERFORMANCE_MONITOR, false),
    (Exceptions::DECREMENTER, vector::DECREMENTER, false),
];

fn expected(pending: Exceptions, ee: bool) -> Option<(Exceptions, u32, bool)> {
    PRIORITY
        .into_iter()
        .find(|&(bit, _, _)| pending.contains(bit) && (ee || !Exceptions::ASYNCHRONOUS.contains(bit)))
}

#[test]
fn test_every_pending_combination() {
    for bits in 0..512u32 {
        let pending = Exceptions::from_bits_truncate(bits);
        assert_eq!(pending.bits(), bits);

        for ee in [false, true] {
            let mut state = PowerPcState::new();
            state.pc = PC;
            state.npc = PC + 4;
            state.msr = if ee { Msr::EE.bits() } else { 0 };
            state.exceptions = pending;

            let taken = state.check_exceptions();
            match expected(pending, ee) {
                Some((bit, vector, at_pc)) => {
                    assert_eq!(taken, Some(bit), "pending {pending:?} ee={ee}");
                    assert_eq!(state.pc, vector, "pending {pending:?} ee={ee}");
                    assert_eq!(state.exceptions, pending - bit, "pending {pending:?} ee={ee}");
                    let srr0 = if at_pc { PC } else { PC + 4 };
                    assert_eq!(state.spr[spr::SRR0], srr0, "pending {pending:?} ee={ee}");
                    assert!(!state.msr_has(Msr::EE));
                }
                None => {
                    assert_eq!(taken, None, "pending {pending:?} ee={ee}");
                    assert_eq!(state.pc, PC);
                    assert_eq!(state.exceptions, pending);
                }
            }
        }
    }
}

#[test]
fn test_exceptions_drain_in_priority_order() {
    let mut state = PowerPcState::new();
    state.msr = Msr::EE.bits();
    state.exceptions = Exceptions::all();

    let mut order = Vec::new();
    while let Some(bit) = state.check_exceptions() {
        order.push(bit);
        // Handlers run with EE off; re-enable to keep draining
        state.msr |= Msr::EE.bits();
    }
    let expected: Vec<_> = PRIORITY.iter().map(|&(bit, _, _)| bit).collect();
    assert_eq!(order, expected);
}

#[test]
fn test_vectors_relocate_with_ip() {
    let mut state = PowerPcState::new();
    state.pc = PC;
    state.npc = PC + 4;
    state.msr = Msr::IP.bits();
    state.exceptions = Exceptions::SYSCALL;
    state.check_exceptions();
    assert_eq!(state.pc, 0xFFF0_0000 | vector::SYSCALL);
    assert!(state.msr_has(Msr::IP));
}
