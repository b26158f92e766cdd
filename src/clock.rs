// SPDX-License-Identifier: GPL-3.0-only

//! Monotonic time sources.
//!
//! Completion notices carry their timestamps (UST) in microseconds of
//! `CLOCK_MONOTONIC`, so everything that compares against them reads the
//! same clock.

use std::{cell::Cell, rc::Rc};

/// A source of monotonic time in microseconds
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// `CLOCK_MONOTONIC`, the clock domain of X Present UST values
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
        // always available on the platforms we support.
        let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        debug_assert_eq!(ret, 0);
        ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
    }
}

/// A clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give the
/// other to the code under test.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(now_us: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(now_us)),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now.set(now_us);
    }

    pub fn advance(&self, delta_us: u64) {
        self.now.set(self.now.get() + delta_us);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }
}
