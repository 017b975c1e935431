/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Time source for the boot-boost window and ontime residency.
//!
//! The engine only ever asks "how many microseconds since boot?".  Production
//! code uses [`MonotonicClock`], whose epoch is its own creation; tests and the
//! simulator drive a [`ManualClock`] explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Microseconds elapsed since the clock's epoch.
    fn now_us(&self) -> u64;
}

/// Wall-clock backed by [`Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now: AtomicU64::new(start_us),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now.store(now_us, Ordering::Release);
    }

    pub fn advance(&self, delta_us: u64) {
        self.now.fetch_add(delta_us, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
