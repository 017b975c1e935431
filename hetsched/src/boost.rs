/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Global boost requests and per-group prefer-perf service requests.
//!
//! Any number of named requesters may hold a boost priority (0..=100).  The
//! effective boost is the highest active priority scaled into capacity
//! units: `gb_max * max_prio / 100`, where `gb_max` is one more than the
//! second-highest cluster capacity, so a boosted task always out-grows every
//! cluster but the top one.  For a fixed window after boot the effective
//! boost is forced to `gb_max`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::cpu::lock;
use crate::scheduler::error::AdminError;
use crate::task::StuneGroup;

/// Length of the post-boot window during which boost is forced on.
pub const BOOT_BOOST_DURATION_US: u64 = 40_000_000;

// ── GlobalBoost ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct GlobalBoost {
    /// requester name → priority.  `BTreeMap` keeps listings stable.
    requests: Mutex<BTreeMap<String, u32>>,
    value: AtomicU64,
    max_value: u64,
    boot_window_us: u64,
}

impl GlobalBoost {
    pub fn new(second_max_capacity: u64, boot_window_us: u64) -> Self {
        Self {
            requests: Mutex::new(BTreeMap::new()),
            value: AtomicU64::new(0),
            max_value: second_max_capacity + 1,
            boot_window_us,
        }
    }

    pub fn max_value(&self) -> u64 {
        self.max_value
    }

    /// Effective boost in capacity units at time `now_us`.
    pub fn value(&self, now_us: u64) -> u64 {
        if now_us < self.boot_window_us {
            return self.max_value;
        }
        self.value.load(Ordering::Acquire)
    }

    /// Add or change the request held by `name`.
    pub fn update_request(&self, name: &str, prio: u32) -> Result<(), AdminError> {
        if prio > 100 {
            return Err(AdminError::BoostOutOfRange {
                name: name.to_string(),
                value: prio,
            });
        }

        let mut requests = lock(&self.requests);
        if requests.get(name) == Some(&prio) {
            return Ok(());
        }
        requests.insert(name.to_string(), prio);
        let value = self.recompute(&requests);
        info!(requester = name, prio, value, "global boost request updated");
        Ok(())
    }

    /// Drop the request held by `name`.  Returns `false` if there was none.
    pub fn remove_request(&self, name: &str) -> bool {
        let mut requests = lock(&self.requests);
        if requests.remove(name).is_none() {
            return false;
        }
        let value = self.recompute(&requests);
        info!(requester = name, value, "global boost request removed");
        true
    }

    /// Active requests in name order.
    pub fn requests(&self) -> Vec<(String, u32)> {
        lock(&self.requests)
            .iter()
            .map(|(name, prio)| (name.clone(), *prio))
            .collect()
    }

    fn recompute(&self, requests: &BTreeMap<String, u32>) -> u64 {
        let max_prio = requests.values().copied().max().unwrap_or(0);
        let value = self.max_value * u64::from(max_prio) / 100;
        self.value.store(value, Ordering::Release);
        value
    }
}

// ── Service requests ──────────────────────────────────────────────────────────

/// Prefer-perf requests raised by kernel-side services, one slot per group.
#[derive(Debug, Default)]
pub struct ServiceRequests {
    prefer_perf: [AtomicI32; StuneGroup::COUNT],
}

impl ServiceRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_prefer_perf(&self, group: StuneGroup, value: i32) {
        self.prefer_perf[group.index()].store(value, Ordering::Release);
        info!(group = group.name(), value, "prefer-perf service request");
    }

    pub fn prefer_perf(&self, group: StuneGroup) -> i32 {
        self.prefer_perf[group.index()].load(Ordering::Acquire)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
