//! Single-producer/single-consumer report exchange
//!
//! The writer never blocks: if the reader still holds the previous report,
//! or the lock is momentarily taken, [`HandShake::try_yield`] gives up and
//! the writer tries again later. The reader blocks in [`HandShake::wait`]
//! until a report is available.

use std::ops::Deref;

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, MutexGuard};

struct Exchange<T> {
    /// Writer and reader buffers, swapped on every handoff
    buffers: [CachePadded<T>; 2],
    /// Which buffer the reader sees
    reader: usize,
    available: bool,
    closed: bool,
}

pub struct HandShake<T> {
    exchange: Mutex<Exchange<T>>,
    cond: Condvar,
}

impl<T: Default> HandShake<T> {
    pub fn new() -> Self {
        Self {
            exchange: Mutex::new(Exchange {
                buffers: [CachePadded::new(T::default()), CachePadded::new(T::default())],
                reader: 0,
                available: false,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }
}

impl<T: Default> Default for HandShake<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandShake<T> {
    /// Writer side: fill the writer buffer with `fill` and publish it.
    ///
    /// Returns false, without calling `fill`, when the lock is contended or
    /// the previous report has not been consumed.
    pub fn try_yield(&self, fill: impl FnOnce(&mut T)) -> bool {
        let Some(mut exchange) = self.exchange.try_lock() else {
            return false;
        };
        if exchange.available || exchange.closed {
            return false;
        }
        let writer = exchange.reader ^ 1;
        fill(&mut *exchange.buffers[writer]);
        exchange.reader = writer;
        exchange.available = true;
        drop(exchange);
        self.cond.notify_one();
        true
    }

    /// Reader side: block until a report is available.
    ///
    /// Returns None once the handshake is closed and nothing is pending.
    /// The report counts as consumed when the guard is dropped.
    pub fn wait(&self) -> Option<ReportGuard<'_, T>> {
        let mut exchange = self.exchange.lock();
        while !exchange.available && !exchange.closed {
            self.cond.wait(&mut exchange);
        }
        if !exchange.available {
            return None;
        }
        Some(ReportGuard {
            exchange,
            cond: &self.cond,
        })
    }

    /// True while a published report awaits the reader
    pub fn is_pending(&self) -> bool {
        self.exchange.lock().available
    }

    /// Wake the reader and refuse further reports
    pub fn close(&self) {
        self.exchange.lock().closed = true;
        self.cond.notify_all();
    }
}

/// Exclusive access to the reader buffer
pub struct ReportGuard<'a, T> {
    exchange: MutexGuard<'a, Exchange<T>>,
    cond: &'a Condvar,
}

impl<T> Deref for ReportGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        let reader = self.exchange.reader;
        &*self.exchange.buffers[reader]
    }
}

impl<T> Drop for ReportGuard<'_, T> {
    fn drop(&mut self) {
        self.exchange.available = false;
        self.cond.notify_all();
    }
}
