/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ontime placement: keeping heavy tasks on performance clusters.
//!
//! A task whose ontime load average reaches the up-threshold of its cluster
//! is promoted ("ontime") to the next cluster up, either at wakeup (this
//! module) or by the periodic scan ([`migration`]).  It is released again
//! once its load falls below the down-threshold of the cluster it was
//! promoted to, but never before it has stayed there for the boundary's
//! minimum residency.
//!
//! One [`OntimeBoundary`] exists per adjacent cluster pair.  Boundary `i`
//! joins cluster `i` (source) to cluster `i + 1` (destination), so the
//! boundary for any CPU is found from its cluster id without a search.
//!
//! ```text
//!            up ≥ up_threshold(src)          dispatch
//! NotOnTime ───────────────────────► OnTime ◄──────── Migrating
//!     ▲  ◄─── load < down && residency ─┘               │
//!     └──────────── abort / boost-driven ───────────────┘
//! ```

pub mod migration;
pub mod pelt;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::scheduler::error::{AdminError, TopologyError};
use crate::scheduler::Engine;
use crate::task::{OntimeEntity, OntimeState, Task};
use crate::topology::{ClusterId, CpuId, CpuMask, Topology, SCHED_CAPACITY_SCALE};

use pelt::OntimeAvg;

/// Minimum time a promoted task stays before it may be demoted.
pub const DEFAULT_MIN_RESIDENCY_US: u64 = 8192;

// ── Boundaries ────────────────────────────────────────────────────────────────

/// Per-boundary overrides; missing values fall back to the defaults below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundarySpec {
    /// Defaults to 40 % of the source cluster's capacity.
    pub up_threshold: Option<u64>,
    /// Defaults to 50 % of the destination cluster's lowest capacity state.
    pub down_threshold: Option<u64>,
    pub min_residency_us: Option<u64>,
}

#[derive(Debug)]
pub struct OntimeBoundary {
    pub src: ClusterId,
    pub dst: ClusterId,
    up_threshold: AtomicU64,
    down_threshold: AtomicU64,
    min_residency_us: AtomicU64,
}

impl OntimeBoundary {
    pub fn up_threshold(&self) -> u64 {
        self.up_threshold.load(Ordering::Acquire)
    }

    pub fn down_threshold(&self) -> u64 {
        self.down_threshold.load(Ordering::Acquire)
    }

    pub fn min_residency_us(&self) -> u64 {
        self.min_residency_us.load(Ordering::Acquire)
    }
}

/// Capacity-ordered boundary table.
#[derive(Debug)]
pub struct OntimeConditions {
    boundaries: Vec<OntimeBoundary>,
}

impl OntimeConditions {
    /// Build one boundary per adjacent cluster pair.
    ///
    /// `specs` is either empty (all defaults) or has exactly one entry per
    /// boundary, lowest first.
    pub fn new(topology: &Topology, specs: &[BoundarySpec]) -> Result<Self, TopologyError> {
        let expected = topology.clusters().len() - 1;
        if !specs.is_empty() && specs.len() != expected {
            return Err(TopologyError::BoundaryCount {
                given: specs.len(),
                expected,
            });
        }

        let mut boundaries = Vec::with_capacity(expected);
        for (src, pair) in topology.clusters().windows(2).enumerate() {
            let spec = specs.get(src).copied().unwrap_or_default();
            let up = spec
                .up_threshold
                .unwrap_or(pair[0].capacity_orig() * 40 / 100);
            let down = spec
                .down_threshold
                .unwrap_or(pair[1].min_capacity() * 50 / 100);

            for (field, value) in [("up_threshold", up), ("down_threshold", down)] {
                if value > SCHED_CAPACITY_SCALE {
                    return Err(TopologyError::ThresholdOutOfRange {
                        boundary: src,
                        field,
                        value,
                    });
                }
            }

            boundaries.push(OntimeBoundary {
                src,
                dst: src + 1,
                up_threshold: AtomicU64::new(up),
                down_threshold: AtomicU64::new(down),
                min_residency_us: AtomicU64::new(
                    spec.min_residency_us.unwrap_or(DEFAULT_MIN_RESIDENCY_US),
                ),
            });
        }

        Ok(Self { boundaries })
    }

    pub fn boundaries(&self) -> &[OntimeBoundary] {
        &self.boundaries
    }

    /// Load needed to leave `cluster` upwards; `u64::MAX` on the top cluster.
    pub fn up_threshold(&self, cluster: ClusterId) -> u64 {
        self.boundaries
            .get(cluster)
            .map_or(u64::MAX, OntimeBoundary::up_threshold)
    }

    /// Load below which a task promoted into `cluster` is released; 0 on the
    /// lowest cluster.
    pub fn down_threshold(&self, cluster: ClusterId) -> u64 {
        cluster
            .checked_sub(1)
            .and_then(|b| self.boundaries.get(b))
            .map_or(0, OntimeBoundary::down_threshold)
    }

    pub fn min_residency_us(&self, cluster: ClusterId) -> u64 {
        cluster
            .checked_sub(1)
            .and_then(|b| self.boundaries.get(b))
            .map_or(0, OntimeBoundary::min_residency_us)
    }

    fn boundary(&self, index: usize) -> Result<&OntimeBoundary, AdminError> {
        self.boundaries
            .get(index)
            .ok_or(AdminError::UnknownBoundary(index))
    }

    fn check_threshold(field: &'static str, value: u64) -> Result<(), AdminError> {
        if value > SCHED_CAPACITY_SCALE {
            return Err(AdminError::ThresholdOutOfRange {
                field,
                value,
                max: SCHED_CAPACITY_SCALE,
            });
        }
        Ok(())
    }

    pub fn set_up_threshold(&self, index: usize, value: u64) -> Result<(), AdminError> {
        let boundary = self.boundary(index)?;
        Self::check_threshold("up_threshold", value)?;
        boundary.up_threshold.store(value, Ordering::Release);
        Ok(())
    }

    pub fn set_down_threshold(&self, index: usize, value: u64) -> Result<(), AdminError> {
        let boundary = self.boundary(index)?;
        Self::check_threshold("down_threshold", value)?;
        boundary.down_threshold.store(value, Ordering::Release);
        Ok(())
    }

    pub fn set_min_residency(&self, index: usize, us: u64) -> Result<(), AdminError> {
        self.boundary(index)?
            .min_residency_us
            .store(us, Ordering::Release);
        Ok(())
    }
}

/// Has a task promoted at `since_us` stayed longer than `min_us`?
/// A zero residency never holds a task back.
fn residency_elapsed(since_us: u64, now_us: u64, min_us: u64) -> bool {
    min_us == 0 || now_us.saturating_sub(since_us) > min_us
}

// ── Engine integration ────────────────────────────────────────────────────────

impl Engine {
    /// Idle CPU in `dst ∩ mask` that no other migration is heading to,
    /// shallowest idle state first.  A CPU idle without any recorded state
    /// wins immediately.
    pub(crate) fn ontime_select_target_cpu(&self, dst: CpuMask, mask: CpuMask) -> Option<CpuId> {
        let mut target = None;
        let mut min_exit_latency = u32::MAX;

        for cpu in dst.and(mask).and(self.cpus.active_mask()).iter() {
            let slot = self.cpus.get(cpu);
            if !slot.is_idle() || slot.is_migration_target() {
                continue;
            }
            match slot.idle_state() {
                None => return Some(cpu),
                Some(idle) if idle.exit_latency_us < min_exit_latency => {
                    min_exit_latency = idle.exit_latency_us;
                    target = Some(cpu);
                }
                Some(_) => {}
            }
        }

        target
    }

    /// Ontime fast path of the wakeup cascade.
    pub fn ontime_task_wakeup(&self, task: &Task) -> Option<CpuId> {
        let now = self.clock.now_us();
        let src = task.cpu();
        if !self.topology.is_valid_cpu(src) {
            return None;
        }
        let mut ontime = task.ontime();

        if ontime.state.is_migrating() {
            return None;
        }

        let load = ontime.avg.load_avg;
        let src_cluster = self.topology.cluster_id_of(src);

        if load >= self.ontime.up_threshold(src_cluster) {
            let target = self
                .topology
                .next_cluster(src_cluster)
                .and_then(|next| self.ontime_select_target_cpu(next.cpus, task.allowed()));
            if let Some(dst) = target {
                debug!(pid = task.pid, src, dst, load, "up ontime");
                ontime.state = OntimeState::OnTime {
                    cpu: dst,
                    since_us: now,
                };
                return Some(dst);
            }
        }

        let OntimeState::OnTime { cpu: assigned, since_us } = ontime.state else {
            return None;
        };

        let cluster = self.topology.cluster_id_of(assigned);
        if residency_elapsed(since_us, now, self.ontime.min_residency_us(cluster))
            && load < self.ontime.down_threshold(cluster)
        {
            debug!(pid = task.pid, src, load, "release ontime");
            ontime.state = OntimeState::NotOnTime;
            return None;
        }

        let stay = self.topology.coregroup_mask(assigned);
        if let Some(dst) = self.ontime_select_target_cpu(stay, task.allowed()) {
            debug!(pid = task.pid, src, dst, load, "stay ontime");
            return Some(dst);
        }

        debug!(pid = task.pid, src, load, "banished");
        ontime.state = OntimeState::NotOnTime;
        None
    }

    /// Veto for the standard load balancer: may `task` be moved to `dst_cpu`?
    ///
    /// An ontime task may always move sideways or up.  Moving it down is
    /// refused during its minimum residency and while it is still heavy, but
    /// allowed (and the task released) when its CPU is contended.
    pub fn can_migrate_for_balance(&self, task: &Task, dst_cpu: CpuId) -> bool {
        if !self.topology.is_valid_cpu(dst_cpu) {
            return false;
        }
        let now = self.clock.now_us();
        let mut ontime = task.ontime();

        let (assigned, since_us) = match ontime.state {
            OntimeState::NotOnTime => {
                trace!(pid = task.pid, dst_cpu, verdict = true, "not ontime");
                return true;
            }
            OntimeState::Migrating { .. } => {
                trace!(pid = task.pid, dst_cpu, verdict = false, "migrating");
                return false;
            }
            OntimeState::OnTime { cpu, since_us } => (cpu, since_us),
        };

        if self.topology.coregroup_mask(assigned).test(dst_cpu) {
            trace!(pid = task.pid, dst_cpu, verdict = true, "same coregroup");
            return true;
        }

        if self.topology.capacity_orig_of(dst_cpu) > self.topology.capacity_orig_of(assigned) {
            trace!(pid = task.pid, dst_cpu, verdict = true, "bigger cpu");
            return true;
        }

        let cluster = self.topology.cluster_id_of(assigned);
        if !residency_elapsed(since_us, now, self.ontime.min_residency_us(cluster)) {
            debug!(pid = task.pid, dst_cpu, verdict = false, "min residency");
            return false;
        }

        let home = task.cpu();
        if self.topology.is_valid_cpu(home) && self.cpus.get(home).nr_running() > 1 {
            debug!(pid = task.pid, dst_cpu, verdict = true, "big is busy");
            ontime.state = OntimeState::NotOnTime;
            return true;
        }

        if ontime.avg.load_avg >= self.ontime.down_threshold(cluster) {
            debug!(pid = task.pid, dst_cpu, verdict = false, "heavy task");
            return false;
        }

        debug!(pid = task.pid, dst_cpu, verdict = true, "ontime release");
        ontime.state = OntimeState::NotOnTime;
        true
    }

    /// Feed `elapsed_us` of time into `task`'s ontime load tracker.
    ///
    /// Returns `true` when the task, sitting below the top cluster, has just
    /// reached its up-threshold: the caller should run the periodic scan at
    /// the next opportunity.
    pub fn record_tick(&self, task: &Task, elapsed_us: u64) -> bool {
        let cpu = task.cpu();
        if !self.topology.is_valid_cpu(cpu) {
            return false;
        }
        let scale_freq = self.cpus.get(cpu).freq_scale();
        let scale_cpu = self.topology.capacity_orig_of(cpu);

        let load = {
            let mut ontime = task.ontime();
            if !ontime.avg.update(elapsed_us, task.on_rq(), scale_freq, scale_cpu) {
                return false;
            }
            ontime.avg.load_avg
        };

        let cluster = self.topology.cluster_id_of(cpu);
        if self.topology.next_cluster(cluster).is_none() {
            return false;
        }
        let hint = load >= self.ontime.up_threshold(cluster);
        if hint {
            trace!(pid = task.pid, cpu, load, "ontime next balance");
        }
        hint
    }

    /// Give a freshly forked `child` its parent's ontime load.
    pub fn init_task_load(&self, parent: &Task, child: &Task) {
        if std::ptr::eq(parent, child) {
            return;
        }
        let inherited = OntimeAvg::inherit(&parent.ontime().avg);
        *child.ontime() = OntimeEntity {
            avg: inherited,
            state: OntimeState::NotOnTime,
        };
        trace!(
            parent = parent.pid,
            child = child.pid,
            load_avg = inherited.load_avg,
            "ontime new entity load"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
