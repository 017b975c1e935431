/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task data structures shared by every decision path.
//!
//! Two types model the two sides of the engine boundary:
//!
//! ```text
//! collaborator ──(TaskInfo)──►  Task::new()  ──►  Arc<Task>  ◄── wakeup / tick / stopper
//!                 plain data                       shared, interior-mutable
//! ```
//!
//! # Ownership model
//! A `Task` is shared between the per-CPU run queues, the wakeup path and any
//! in-flight migration message, so it is always handled as `Arc<Task>`.
//! Scalar fields that collaborators update on the fly (home CPU, utilisation,
//! allowed mask) are atomics.  The ontime record is a small `Mutex` because
//! its load average and state must change together.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;

use crate::cpu::lock;
use crate::ontime::pelt::OntimeAvg;
use crate::topology::{CpuId, CpuMask, SCHED_CAPACITY_SCALE};

pub type Pid = u32;

// ── Scheduling policy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// `SCHED_NORMAL` – fair-class task.
    #[default]
    Normal,
    /// `SCHED_FIFO` – real-time FIFO.
    Fifo,
    /// `SCHED_RR` – real-time round-robin.
    RoundRobin,
}

impl SchedPolicy {
    /// Real-time tasks report utilisation from their own decayed average.
    pub fn is_rt(self) -> bool {
        matches!(self, SchedPolicy::Fifo | SchedPolicy::RoundRobin)
    }
}

// ── Task groups ───────────────────────────────────────────────────────────────

/// The fixed set of tuning groups a task can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuneGroup {
    #[default]
    Root,
    Foreground,
    Background,
    TopApp,
    Rt,
}

impl StuneGroup {
    pub const COUNT: usize = 5;

    pub const ALL: [StuneGroup; Self::COUNT] = [
        StuneGroup::Root,
        StuneGroup::Foreground,
        StuneGroup::Background,
        StuneGroup::TopApp,
        StuneGroup::Rt,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StuneGroup::Root => "root",
            StuneGroup::Foreground => "foreground",
            StuneGroup::Background => "background",
            StuneGroup::TopApp => "top-app",
            StuneGroup::Rt => "rt",
        }
    }
}

/// Placement attributes attached to a task by the group attribute store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct GroupAttrs {
    /// Place on the highest-capacity cluster whenever possible.
    pub prefer_perf: bool,
    /// Prefer an idle CPU over packing.
    pub prefer_idle: bool,
    /// Keep the group packed on its reference cluster.
    pub group_balance: bool,
    /// Utilisation boost in percent (0..=100) of the remaining headroom.
    pub boost: u32,
}

// ── Ontime state ──────────────────────────────────────────────────────────────

/// Where a task stands with respect to ontime placement.
///
/// `cpu` is the CPU the task was promoted to (or is being migrated to);
/// `since_us` is the promotion/dispatch timestamp used for residency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OntimeState {
    #[default]
    NotOnTime,
    OnTime { cpu: CpuId, since_us: u64 },
    Migrating { cpu: CpuId, since_us: u64 },
}

impl OntimeState {
    pub fn is_ontime(&self) -> bool {
        matches!(self, OntimeState::OnTime { .. })
    }

    pub fn is_migrating(&self) -> bool {
        matches!(self, OntimeState::Migrating { .. })
    }

    /// The CPU this state refers to, if any.
    pub fn cpu(&self) -> Option<CpuId> {
        match *self {
            OntimeState::NotOnTime => None,
            OntimeState::OnTime { cpu, .. } | OntimeState::Migrating { cpu, .. } => Some(cpu),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OntimeState::NotOnTime => "not-ontime",
            OntimeState::OnTime { .. } => "ontime",
            OntimeState::Migrating { .. } => "migrating",
        }
    }
}

/// Per-task ontime record: load tracker plus state, updated together.
#[derive(Debug, Clone, Copy, Default)]
pub struct OntimeEntity {
    pub avg: OntimeAvg,
    pub state: OntimeState,
}

// ── TaskInfo (input) ──────────────────────────────────────────────────────────

/// Plain description of a task as handed over by a collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskInfo {
    pub pid: Pid,
    pub name: String,
    pub policy: SchedPolicy,
    pub group: StuneGroup,
    pub attrs: GroupAttrs,
    /// Allowed CPUs; `None` means every CPU.
    #[serde(skip)]
    pub allowed: Option<CpuMask>,
    /// Home CPU.
    pub cpu: CpuId,
    /// Decayed utilisation (fair class).
    pub util: u64,
    /// Decayed utilisation for real-time policies.
    pub rt_util: u64,
    /// Initial ontime load average, used by tests and the simulator to seed
    /// a task that has already been running for a while.
    pub load_avg: u64,
}

// ── Task (shared runtime record) ──────────────────────────────────────────────

#[derive(Debug)]
pub struct Task {
    pub pid: Pid,
    pub name: String,
    pub policy: SchedPolicy,
    pub group: StuneGroup,

    attrs: Mutex<GroupAttrs>,
    allowed: AtomicU64,
    cpu: AtomicUsize,
    util_avg: AtomicU64,
    rt_util_avg: AtomicU64,
    /// Set once the task's utilisation has been accounted on its home CPU.
    has_contrib: AtomicBool,
    on_rq: AtomicBool,
    exited: AtomicBool,

    ontime: Mutex<OntimeEntity>,
}

impl Task {
    pub fn new(info: TaskInfo) -> Self {
        let allowed = info.allowed.unwrap_or(CpuMask::from_bits(u64::MAX));
        let ontime = OntimeEntity {
            avg: OntimeAvg::with_load(info.load_avg),
            state: OntimeState::NotOnTime,
        };
        Self {
            pid: info.pid,
            name: info.name,
            policy: info.policy,
            group: info.group,
            attrs: Mutex::new(info.attrs),
            allowed: AtomicU64::new(allowed.bits()),
            cpu: AtomicUsize::new(info.cpu),
            util_avg: AtomicU64::new(info.util),
            rt_util_avg: AtomicU64::new(info.rt_util),
            has_contrib: AtomicBool::new(false),
            on_rq: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            ontime: Mutex::new(ontime),
        }
    }

    // ── Home CPU / affinity ───────────────────────────────────────────────────

    pub fn cpu(&self) -> CpuId {
        self.cpu.load(Ordering::Acquire)
    }

    pub(crate) fn set_cpu(&self, cpu: CpuId) {
        self.cpu.store(cpu, Ordering::Release);
    }

    pub fn allowed(&self) -> CpuMask {
        CpuMask::from_bits(self.allowed.load(Ordering::Acquire))
    }

    pub fn set_allowed(&self, mask: CpuMask) {
        self.allowed.store(mask.bits(), Ordering::Release);
    }

    pub fn allows(&self, cpu: CpuId) -> bool {
        self.allowed().test(cpu)
    }

    // ── Utilisation ───────────────────────────────────────────────────────────

    /// The task's own decayed utilisation estimate.
    pub fn util(&self) -> u64 {
        if self.policy.is_rt() {
            self.rt_util_avg.load(Ordering::Acquire)
        } else {
            self.util_avg.load(Ordering::Acquire)
        }
    }

    pub fn set_util(&self, util: u64) {
        if self.policy.is_rt() {
            self.rt_util_avg.store(util, Ordering::Release);
        } else {
            self.util_avg.store(util, Ordering::Release);
        }
    }

    /// Utilisation inflated by the group boost:
    /// `util + (SCALE - util) * boost / 100`.
    pub fn boosted_util(&self) -> u64 {
        let util = self.util();
        let boost = u64::from(self.attrs().boost.min(100));
        util + SCHED_CAPACITY_SCALE.saturating_sub(util) * boost / 100
    }

    pub(crate) fn has_contrib(&self) -> bool {
        self.has_contrib.load(Ordering::Acquire)
    }

    pub(crate) fn set_has_contrib(&self, v: bool) {
        self.has_contrib.store(v, Ordering::Release);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn on_rq(&self) -> bool {
        self.on_rq.load(Ordering::Acquire)
    }

    pub(crate) fn set_on_rq(&self, v: bool) {
        self.on_rq.store(v, Ordering::Release);
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub(crate) fn set_exited(&self) {
        self.exited.store(true, Ordering::Release);
    }

    // ── Group attributes ──────────────────────────────────────────────────────

    pub fn attrs(&self) -> GroupAttrs {
        *lock(&self.attrs)
    }

    pub fn set_attrs(&self, attrs: GroupAttrs) {
        *lock(&self.attrs) = attrs;
    }

    // ── Ontime record ─────────────────────────────────────────────────────────

    pub(crate) fn ontime(&self) -> MutexGuard<'_, OntimeEntity> {
        lock(&self.ontime)
    }

    pub fn ontime_state(&self) -> OntimeState {
        self.ontime().state
    }

    pub fn ontime_load_avg(&self) -> u64 {
        self.ontime().avg.load_avg
    }

    /// Snapshot of the whole ontime record.
    pub fn ontime_snapshot(&self) -> OntimeEntity {
        *self.ontime()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_not_ontime() {
        let t = Task::new(TaskInfo {
            pid: 7,
            load_avg: 300,
            ..Default::default()
        });
        assert_eq!(t.ontime_state(), OntimeState::NotOnTime);
        assert_eq!(t.ontime_load_avg(), 300);
        assert!(!t.on_rq());
    }

    #[test]
    fn missing_affinity_allows_every_cpu() {
        let t = Task::new(TaskInfo::default());
        assert!(t.allows(0));
        assert!(t.allows(63));
    }

    #[test]
    fn rt_tasks_report_rt_util() {
        let t = Task::new(TaskInfo {
            policy: SchedPolicy::Fifo,
            util: 100,
            rt_util: 700,
            ..Default::default()
        });
        assert_eq!(t.util(), 700);
    }

    #[test]
    fn boosted_util_scales_remaining_headroom() {
        let t = Task::new(TaskInfo {
            util: 224,
            attrs: GroupAttrs {
                boost: 50,
                ..Default::default()
            },
            ..Default::default()
        });
        // 224 + (1024 - 224) * 50 / 100
        assert_eq!(t.boosted_util(), 624);
    }

    #[test]
    fn unboosted_util_is_unchanged() {
        let t = Task::new(TaskInfo {
            util: 224,
            ..Default::default()
        });
        assert_eq!(t.boosted_util(), 224);
    }

    #[test]
    fn ontime_state_cpu_and_label() {
        let s = OntimeState::Migrating {
            cpu: 5,
            since_us: 10,
        };
        assert_eq!(s.cpu(), Some(5));
        assert!(s.is_migrating());
        assert_eq!(s.label(), "migrating");
        assert_eq!(OntimeState::NotOnTime.cpu(), None);
    }
}
