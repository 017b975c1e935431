/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-CPU state: run queue, utilisation, idle depth and migration flags.
//!
//! Each [`CpuSlot`] keeps its run queue behind a `Mutex` (the per-CPU
//! run-queue lock) and mirrors the numbers the decision paths read on every
//! wakeup into atomics, so placement never has to take a run-queue lock.
//! Writers update the atomics while holding the lock; readers treat them as
//! a best-effort snapshot and the migration transaction re-validates
//! everything once it owns the locks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::task::Task;
use crate::topology::{CpuId, CpuMask, Topology, SCHED_CAPACITY_SCALE};

/// Lock `m`, recovering the guard if a previous holder panicked.
///
/// Run-queue contents stay structurally valid across a panic (every mutation
/// is a single push/remove), so poisoning carries no information here.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Idle state ────────────────────────────────────────────────────────────────

/// The idle state a CPU currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleState {
    /// Depth index; 0 is the shallowest state.
    pub index: u32,
    pub exit_latency_us: u32,
}

const NO_IDLE_STATE: u64 = u64::MAX;

fn pack_idle(state: Option<IdleState>) -> u64 {
    match state {
        Some(s) => (u64::from(s.index) << 32) | u64::from(s.exit_latency_us),
        None => NO_IDLE_STATE,
    }
}

fn unpack_idle(raw: u64) -> Option<IdleState> {
    if raw == NO_IDLE_STATE {
        None
    } else {
        Some(IdleState {
            index: (raw >> 32) as u32,
            exit_latency_us: raw as u32,
        })
    }
}

// ── Run queue ─────────────────────────────────────────────────────────────────

/// The runnable tasks of one CPU.
#[derive(Debug, Default)]
pub struct RunQueue {
    /// Task currently executing.
    pub curr: Option<Arc<Task>>,
    /// Waiting tasks, front is next to run.
    pub queued: VecDeque<Arc<Task>>,
}

impl RunQueue {
    pub fn nr_running(&self) -> usize {
        usize::from(self.curr.is_some()) + self.queued.len()
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.curr.as_deref().is_some_and(|c| std::ptr::eq(c, task))
            || self.queued.iter().any(|t| std::ptr::eq(t.as_ref(), task))
    }

    /// Add `task`; it becomes current if the CPU had nothing to run.
    pub fn push(&mut self, task: Arc<Task>) {
        if self.curr.is_none() {
            self.curr = Some(task);
        } else {
            self.queued.push_back(task);
        }
    }

    /// Remove `task` wherever it sits.  Returns the removed handle.
    ///
    /// Removing the current task hands the CPU to the front of the queue.
    pub fn remove(&mut self, task: &Task) -> Option<Arc<Task>> {
        if self.curr.as_deref().is_some_and(|c| std::ptr::eq(c, task)) {
            let removed = self.curr.take();
            self.curr = self.queued.pop_front();
            return removed;
        }
        let pos = self.queued.iter().position(|t| std::ptr::eq(t.as_ref(), task))?;
        self.queued.remove(pos)
    }
}

// ── CpuSlot ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CpuSlot {
    pub id: CpuId,
    rq: Mutex<RunQueue>,

    nr_running: AtomicUsize,
    util: AtomicU64,
    idle: AtomicU64,
    /// Current capacity after frequency/thermal capping.
    capacity: AtomicU64,
    freq_scale: AtomicU64,
    active: AtomicBool,
    /// Target of an in-flight ontime migration.
    migration_target: AtomicBool,
    /// A stopper-driven balance is pending on this (source) CPU.
    active_balance: AtomicBool,
}

impl CpuSlot {
    fn new(id: CpuId, capacity: u64) -> Self {
        Self {
            id,
            rq: Mutex::new(RunQueue::default()),
            nr_running: AtomicUsize::new(0),
            util: AtomicU64::new(0),
            idle: AtomicU64::new(NO_IDLE_STATE),
            capacity: AtomicU64::new(capacity),
            freq_scale: AtomicU64::new(SCHED_CAPACITY_SCALE),
            active: AtomicBool::new(true),
            migration_target: AtomicBool::new(false),
            active_balance: AtomicBool::new(false),
        }
    }

    /// Take this CPU's run-queue lock.
    pub fn lock_rq(&self) -> MutexGuard<'_, RunQueue> {
        lock(&self.rq)
    }

    /// Refresh the lock-free mirror of `rq`'s length.  Call with the lock held.
    pub(crate) fn sync_nr_running(&self, rq: &RunQueue) {
        self.nr_running.store(rq.nr_running(), Ordering::Release);
    }

    pub fn nr_running(&self) -> usize {
        self.nr_running.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.nr_running() == 0
    }

    /// Raw (unclamped) utilisation.
    pub fn util(&self) -> u64 {
        self.util.load(Ordering::Acquire)
    }

    pub(crate) fn set_util(&self, util: u64) {
        self.util.store(util, Ordering::Release);
    }

    pub(crate) fn add_util(&self, delta: u64) {
        self.util.fetch_add(delta, Ordering::AcqRel);
    }

    pub(crate) fn sub_util(&self, delta: u64) {
        // fetch_update never fails with a closure that always returns Some.
        let _ = self
            .util
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |u| {
                Some(u.saturating_sub(delta))
            });
    }

    /// Idle state, meaningful only while [`is_idle`](Self::is_idle).
    /// `None` means idle but not (yet) in any recorded state.
    pub fn idle_state(&self) -> Option<IdleState> {
        unpack_idle(self.idle.load(Ordering::Acquire))
    }

    pub(crate) fn set_idle_state(&self, state: Option<IdleState>) {
        self.idle.store(pack_idle(state), Ordering::Release);
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    pub(crate) fn set_capacity(&self, cap: u64) {
        self.capacity.store(cap, Ordering::Release);
    }

    pub fn freq_scale(&self) -> u64 {
        self.freq_scale.load(Ordering::Acquire)
    }

    pub(crate) fn set_freq_scale(&self, scale: u64) {
        self.freq_scale.store(scale, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn is_migration_target(&self) -> bool {
        self.migration_target.load(Ordering::Acquire)
    }

    pub(crate) fn set_migration_target(&self, v: bool) {
        self.migration_target.store(v, Ordering::Release);
    }

    pub fn active_balance(&self) -> bool {
        self.active_balance.load(Ordering::Acquire)
    }

    pub(crate) fn set_active_balance(&self, v: bool) {
        self.active_balance.store(v, Ordering::Release);
    }
}

// ── Cpus ──────────────────────────────────────────────────────────────────────

/// Registry of every CPU slot, indexed by [`CpuId`].
#[derive(Debug)]
pub struct Cpus {
    slots: Vec<CpuSlot>,
}

impl Cpus {
    pub fn new(topology: &Topology) -> Self {
        let slots = (0..topology.nr_cpus())
            .map(|cpu| CpuSlot::new(cpu, topology.capacity_orig_of(cpu)))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// # Panics
    /// Panics if `cpu` is out of range.
    pub fn get(&self, cpu: CpuId) -> &CpuSlot {
        &self.slots[cpu]
    }

    pub fn try_get(&self, cpu: CpuId) -> Option<&CpuSlot> {
        self.slots.get(cpu)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CpuSlot> {
        self.slots.iter()
    }

    pub fn active_mask(&self) -> CpuMask {
        self.slots
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.id)
            .collect()
    }

    /// Lock two run queues in ascending CPU order.
    ///
    /// The guards are returned in argument order.  `a` and `b` must differ.
    pub fn lock_pair(
        &self,
        a: CpuId,
        b: CpuId,
    ) -> (MutexGuard<'_, RunQueue>, MutexGuard<'_, RunQueue>) {
        debug_assert_ne!(a, b, "lock_pair on a single CPU");
        if a < b {
            let ga = self.slots[a].lock_rq();
            let gb = self.slots[b].lock_rq();
            (ga, gb)
        } else {
            let gb = self.slots[b].lock_rq();
            let ga = self.slots[a].lock_rq();
            (ga, gb)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
