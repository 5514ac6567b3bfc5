//! Cycle-driven event scheduler
//!
//! The CPU charges executed cycles against a downcount. When the
//! downcount runs out the machine advances the scheduler, which fires
//! every due event and computes the length of the next slice.

use std::collections::VecDeque;

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::machine::Machine;

/// Longest stretch the CPU runs without checking for events
pub const MAX_SLICE_LENGTH: i64 = 20_000;

/// Core cycles per time base / decrementer tick
pub const TIMER_RATIO: u64 = 12;

/// Event handler. Receives the userdata it was scheduled with and how
/// many cycles late it fired.
pub type TimedCallback = fn(&mut Machine, u64, i64);

/// Handle of a registered event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType(u32);

struct EventEntry {
    name: &'static str,
    callback: TimedCallback,
}

/// A pending event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    /// Absolute cycle at which the event fires
    pub time: u64,
    pub event_type: EventType,
    pub userdata: u64,
}

#[derive(Debug, Clone, Copy)]
struct ThreadsafeEvent {
    delay: u64,
    event_type: EventType,
    userdata: u64,
}

/// Schedules events from threads other than the CPU thread.
///
/// Requests are queued and inserted at the next timing advance, with
/// their delay counted from that point.
#[derive(Clone)]
pub struct ThreadsafeScheduler {
    tx: Sender<ThreadsafeEvent>,
}

impl ThreadsafeScheduler {
    pub fn schedule_event(&self, delay: u64, event_type: EventType, userdata: u64) {
        // The receiver lives as long as CoreTiming; a closed channel means shutdown
        let _ = self.tx.send(ThreadsafeEvent {
            delay,
            event_type,
            userdata,
        });
    }
}

/// Pending event in save-state form, resolved by name on load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub name: String,
    pub time: u64,
    pub userdata: u64,
}

/// Scheduler state in save-state form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub ticks: u64,
    pub downcount: i64,
    pub events: Vec<EventSnapshot>,
}

pub struct CoreTiming {
    ticks: u64,
    downcount: i64,
    registry: Vec<EventEntry>,
    scheduled: VecDeque<ScheduledEvent>,
    ts_tx: Sender<ThreadsafeEvent>,
    ts_rx: Receiver<ThreadsafeEvent>,
}

impl std::fmt::Debug for CoreTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreTiming")
            .field("ticks", &self.ticks)
            .field("downcount", &self.downcount)
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

impl CoreTiming {
    pub fn new() -> Self {
        let (ts_tx, ts_rx) = channel::unbounded();
        Self {
            ticks: 0,
            downcount: MAX_SLICE_LENGTH,
            registry: Vec::new(),
            scheduled: VecDeque::with_capacity(16),
            ts_tx,
            ts_rx,
        }
    }

    /// Register an event kind. Registering a name twice returns the first handle.
    pub fn register_event(&mut self, name: &'static str, callback: TimedCallback) -> EventType {
        if let Some(existing) = self.event_by_name(name) {
            tracing::warn!("Timing event {} registered twice", name);
            return existing;
        }
        self.registry.push(EventEntry { name, callback });
        EventType(self.registry.len() as u32 - 1)
    }

    pub fn event_by_name(&self, name: &str) -> Option<EventType> {
        self.registry
            .iter()
            .position(|e| e.name == name)
            .map(|i| EventType(i as u32))
    }

    pub fn event_name(&self, event_type: EventType) -> &'static str {
        self.registry[event_type.0 as usize].name
    }

    pub fn callback(&self, event_type: EventType) -> TimedCallback {
        self.registry[event_type.0 as usize].callback
    }

    /// Cycles executed since power-on
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Cycles left in the current slice
    #[inline]
    pub fn downcount(&self) -> i64 {
        self.downcount
    }

    /// Time base ticks since power-on
    #[inline]
    pub fn time_base_ticks(&self) -> u64 {
        self.ticks / TIMER_RATIO
    }

    /// Charge executed cycles
    #[inline]
    pub fn consume(&mut self, cycles: u32) {
        self.ticks += cycles as u64;
        self.downcount -= cycles as i64;
    }

    /// Fire `event_type` after `delay` cycles
    pub fn schedule_event(&mut self, delay: u64, event_type: EventType, userdata: u64) {
        let time = self.ticks + delay;
        let index = self.scheduled.partition_point(|e| e.time <= time);
        self.scheduled.insert(
            index,
            ScheduledEvent {
                time,
                event_type,
                userdata,
            },
        );
        // Shorten the running slice so the event fires on time
        self.downcount = self.downcount.min(delay as i64);
        gk_core::timing_trace!(
            "Scheduled {} at {} (+{})",
            self.event_name(event_type),
            time,
            delay
        );
    }

    pub fn threadsafe_scheduler(&self) -> ThreadsafeScheduler {
        ThreadsafeScheduler {
            tx: self.ts_tx.clone(),
        }
    }

    /// Cancel every pending instance of `event_type`
    pub fn remove_event(&mut self, event_type: EventType) {
        self.scheduled.retain(|e| e.event_type != event_type);
    }

    pub fn is_scheduled(&self, event_type: EventType) -> bool {
        self.scheduled.iter().any(|e| e.event_type == event_type)
    }

    /// Pending events in firing order
    pub fn pending(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.scheduled.iter()
    }

    /// Move cross-thread requests into the queue
    pub fn drain_threadsafe(&mut self) {
        while let Ok(request) = self.ts_rx.try_recv() {
            self.schedule_event(request.delay, request.event_type, request.userdata);
        }
    }

    /// Pop the next due event and how many cycles late it is
    pub fn pop_due(&mut self) -> Option<(ScheduledEvent, i64)> {
        let ticks = self.ticks;
        match self.scheduled.front() {
            Some(e) if e.time <= ticks => {
                let event = self.scheduled.pop_front()?;
                Some((event, (ticks - event.time) as i64))
            }
            _ => None,
        }
    }

    /// Start a new slice ending at the next event
    pub fn reset_downcount(&mut self) {
        self.downcount = match self.scheduled.front() {
            Some(e) => (e.time.saturating_sub(self.ticks) as i64).min(MAX_SLICE_LENGTH),
            None => MAX_SLICE_LENGTH,
        };
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            ticks: self.ticks,
            downcount: self.downcount,
            events: self
                .scheduled
                .iter()
                .map(|e| EventSnapshot {
                    name: self.event_name(e.event_type).to_string(),
                    time: e.time,
                    userdata: e.userdata,
                })
                .collect(),
        }
    }

    /// Restore a snapshot. Events whose names are no longer registered are dropped.
    pub fn restore(&mut self, snapshot: &TimingSnapshot) {
        self.ticks = snapshot.ticks;
        self.downcount = snapshot.downcount;
        self.scheduled.clear();
        for event in &snapshot.events {
            match self.event_by_name(&event.name) {
                Some(event_type) => self.scheduled.push_back(ScheduledEvent {
                    time: event.time,
                    event_type,
                    userdata: event.userdata,
                }),
                None => tracing::warn!("Dropping unknown timing event {}", event.name),
            }
        }
    }

    /// Clear every pending event and rewind the clock; registrations are kept
    pub fn reset(&mut self) {
        self.ticks = 0;
        self.downcount = MAX_SLICE_LENGTH;
        self.scheduled.clear();
        while self.ts_rx.try_recv().is_ok() {}
    }
}

impl Default for CoreTiming {
    fn default() -> Self {
        Self::new()
    }
}
