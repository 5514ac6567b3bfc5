//! CPU thread control
//!
//! The CPU thread runs [`Cpu::run`] and moves between three states:
//! Running executes dispatch passes until someone pauses it, Stepping
//! parks the thread and services single-step requests, PowerDown makes it
//! exit. Other threads inspect or modify the machine through
//! [`Cpu::pause_and_lock`] or [`Cpu::with_machine`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use gk_core::CpuError;
use parking_lot::{Condvar, Mutex};

use crate::machine::Machine;

/// CPU execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    Running = 0,
    Stepping = 1,
    PowerDown = 2,
}

impl CpuState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CpuState::Running,
            1 => CpuState::Stepping,
            _ => CpuState::PowerDown,
        }
    }
}

#[derive(Debug, Default)]
struct Gate {
    /// Single steps requested but not yet executed
    step_requests: u32,
    /// Single steps executed by the CPU thread
    steps_done: u64,
    /// The CPU thread is inside the run loop or a step
    busy: bool,
    /// Held by pause_and_lock
    locked: bool,
    /// A thread is executing `Cpu::run`
    thread_active: bool,
}

/// State shared between the CPU thread and its controllers
#[derive(Debug)]
pub struct CpuControl {
    state: AtomicU8,
    gate: Mutex<Gate>,
    cond: Condvar,
}

impl CpuControl {
    fn new(state: CpuState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
            gate: Mutex::new(Gate::default()),
            cond: Condvar::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> CpuState {
        CpuState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == CpuState::Running
    }

    fn set_state(&self, state: CpuState) {
        let previous = CpuState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::debug!("CPU state {:?} -> {:?}", previous, state);
        }
        // Waiters re-check the state under the gate lock
        let _gate = self.gate.lock();
        self.cond.notify_all();
    }

    /// Running -> Stepping after a breakpoint hit. Never leaves PowerDown.
    pub(crate) fn break_to_stepping(&self, address: u32) {
        if self
            .state
            .compare_exchange(
                CpuState::Running as u8,
                CpuState::Stepping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::info!("CPU stopped at breakpoint 0x{:08x}", address);
            let _gate = self.gate.lock();
            self.cond.notify_all();
        }
    }
}

/// Handle to a machine and the thread driving it. Clones share both.
#[derive(Debug, Clone)]
pub struct Cpu {
    machine: Arc<Mutex<Machine>>,
    control: Arc<CpuControl>,
}

impl Cpu {
    /// Wrap `machine`; the CPU starts out Stepping
    pub fn new(machine: Machine) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            control: Arc::new(CpuControl::new(CpuState::Stepping)),
        }
    }

    pub fn state(&self) -> CpuState {
        self.control.state()
    }

    pub fn control(&self) -> &Arc<CpuControl> {
        &self.control
    }

    /// Recover from PowerDown
    pub fn init(&self) {
        if self.state() == CpuState::PowerDown {
            self.control.set_state(CpuState::Stepping);
        }
    }

    /// Enter Running. No effect after PowerDown.
    pub fn start(&self) {
        if self.state() != CpuState::PowerDown {
            self.control.set_state(CpuState::Running);
        }
    }

    /// Enter Stepping. No effect after PowerDown.
    pub fn pause(&self) {
        if self.state() != CpuState::PowerDown {
            self.control.set_state(CpuState::Stepping);
        }
    }

    /// Stepping on `stepping`, Running otherwise
    pub fn enable_stepping(&self, stepping: bool) {
        if stepping {
            self.pause();
        } else {
            self.start();
        }
    }

    /// Enter PowerDown; the CPU thread exits its loop
    pub fn stop(&self) {
        self.control.set_state(CpuState::PowerDown);
        tracing::info!("CPU powered down");
    }

    /// CPU thread body. Returns once the state becomes PowerDown.
    pub fn run(&self) {
        let control = &*self.control;
        control.gate.lock().thread_active = true;
        tracing::info!("CPU thread running");

        loop {
            match control.state() {
                CpuState::Running => {
                    {
                        let mut gate = control.gate.lock();
                        while gate.locked && control.is_running() {
                            control.cond.wait(&mut gate);
                        }
                        if !control.is_running() {
                            continue;
                        }
                        gate.busy = true;
                    }
                    self.machine.lock().run_loop(control);
                    self.finish_work(false);
                }
                CpuState::Stepping => {
                    let mut gate = control.gate.lock();
                    while control.state() == CpuState::Stepping && (gate.step_requests == 0 || gate.locked) {
                        control.cond.wait(&mut gate);
                    }
                    if control.state() != CpuState::Stepping {
                        continue;
                    }
                    gate.step_requests -= 1;
                    gate.busy = true;
                    drop(gate);

                    self.machine.lock().single_step();
                    self.finish_work(true);
                }
                CpuState::PowerDown => break,
            }
        }

        let mut gate = control.gate.lock();
        gate.thread_active = false;
        gate.step_requests = 0;
        control.cond.notify_all();
        tracing::info!("CPU thread exited");
    }

    fn finish_work(&self, stepped: bool) {
        let mut gate = self.control.gate.lock();
        gate.busy = false;
        if stepped {
            gate.steps_done += 1;
        }
        self.control.cond.notify_all();
    }

    /// Run [`Cpu::run`] on a new thread named "cpu"
    pub fn spawn(&self) -> Result<JoinHandle<()>, CpuError> {
        self.control.gate.lock().thread_active = true;
        let cpu = self.clone();
        thread::Builder::new()
            .name("cpu".to_string())
            .spawn(move || cpu.run())
            .map_err(|e| {
                self.control.gate.lock().thread_active = false;
                CpuError::ThreadSpawn(e.to_string())
            })
    }

    /// Execute one instruction and advance the scheduler once.
    ///
    /// Pauses a running CPU first. With a CPU thread active the step runs
    /// there and this call waits for it; otherwise it runs on the caller.
    pub fn single_step(&self) -> Result<(), CpuError> {
        match self.state() {
            CpuState::PowerDown => return Err(CpuError::PoweredDown),
            CpuState::Running => self.pause(),
            CpuState::Stepping => {}
        }

        let control = &*self.control;
        let mut gate = control.gate.lock();
        if !gate.thread_active {
            drop(gate);
            self.machine.lock().single_step();
            return Ok(());
        }

        let target = gate.steps_done + gate.step_requests as u64 + 1;
        gate.step_requests += 1;
        control.cond.notify_all();
        while gate.steps_done < target {
            if control.state() == CpuState::PowerDown || !gate.thread_active {
                return Err(CpuError::PoweredDown);
            }
            control.cond.wait(&mut gate);
        }
        Ok(())
    }

    /// Pause the CPU and hold it, or release a previous hold.
    ///
    /// Locking waits until the CPU thread has left the run loop; until the
    /// matching unlock neither running nor stepping happens. Unlocking with
    /// `unpause_on_unlock` restarts the CPU. Returns whether the CPU was
    /// Running before the call.
    pub fn pause_and_lock(&self, do_lock: bool, unpause_on_unlock: bool) -> bool {
        let control = &*self.control;
        let was_running = control.is_running();

        if do_lock {
            self.pause();
            let mut gate = control.gate.lock();
            debug_assert!(!gate.locked, "pause_and_lock is not reentrant");
            while gate.busy {
                control.cond.wait(&mut gate);
            }
            gate.locked = true;
            gk_core::ppc_debug!("CPU locked (was running: {})", was_running);
        } else {
            {
                let mut gate = control.gate.lock();
                gate.locked = false;
                control.cond.notify_all();
            }
            gk_core::ppc_debug!("CPU unlocked");
            if unpause_on_unlock {
                self.start();
            }
        }
        was_running
    }

    /// Borrow the machine. Blocks while the CPU thread is running; pause
    /// first to get at it promptly.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        f(&mut self.machine.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_core::config::CpuConfig;
    use gk_memory::GuestMemory;

    fn cpu() -> Cpu {
        let machine = Machine::new(&CpuConfig::default(), Arc::new(GuestMemory::new())).unwrap();
        Cpu::new(machine)
    }

    #[test]
    fn test_state_transitions() {
        let cpu = cpu();
        assert_eq!(cpu.state(), CpuState::Stepping);
        cpu.start();
        assert_eq!(cpu.state(), CpuState::Running);
        cpu.enable_stepping(true);
        assert_eq!(cpu.state(), CpuState::Stepping);

        cpu.stop();
        cpu.start();
        assert_eq!(cpu.state(), CpuState::PowerDown);
        assert!(matches!(cpu.single_step(), Err(CpuError::PoweredDown)));

        cpu.init();
        assert_eq!(cpu.state(), CpuState::Stepping);
    }

    #[test]
    fn test_single_step_without_thread() {
        let cpu = cpu();
        cpu.with_machine(|m| {
            m.memory().write_be32(0x8000_0000, 0x3860_0005).unwrap();
            m.state.pc = 0x8000_0000;
        });
        cpu.single_step().unwrap();
        cpu.with_machine(|m| {
            assert_eq!(m.state.gpr[3], 5);
            assert_eq!(m.state.pc, 0x8000_0004);
        });
    }

    #[test]
    fn test_pause_and_lock_reports_previous_state() {
        let cpu = cpu();
        assert!(!cpu.pause_and_lock(true, false));
        assert!(!cpu.pause_and_lock(false, true));
        assert_eq!(cpu.state(), CpuState::Running);
        assert!(cpu.pause_and_lock(true, false));
        assert_eq!(cpu.state(), CpuState::Stepping);
        cpu.pause_and_lock(false, false);
        assert_eq!(cpu.state(), CpuState::Stepping);
    }
}
