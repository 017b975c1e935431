/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Boost and preference resolvers of the wakeup cascade.
//!
//! Each resolver is self-contained: it checks whether it applies to the
//! task and, if so, returns a CPU or `None` for "no preference".

use tracing::debug;

use crate::cpu::IdleState;
use crate::scheduler::Engine;
use crate::task::Task;
use crate::topology::{CpuId, CpuMask};

// ── Shallowest idle set ───────────────────────────────────────────────────────

/// Idle CPUs tied at the shallowest exit latency seen so far.
#[derive(Debug, Clone, Copy)]
struct ShallowestSet {
    cpus: CpuMask,
    min_exit_latency: u32,
}

impl ShallowestSet {
    fn new() -> Self {
        Self {
            cpus: CpuMask::empty(),
            min_exit_latency: u32::MAX,
        }
    }

    fn mark(&mut self, cpu: CpuId, idle: Option<IdleState>) {
        // CPUs idle without a recorded state are always kept.
        let Some(idle) = idle else {
            self.cpus.set(cpu);
            return;
        };
        if idle.exit_latency_us > self.min_exit_latency {
            return;
        }
        if idle.exit_latency_us < self.min_exit_latency {
            self.cpus.clear_all();
            self.min_exit_latency = idle.exit_latency_us;
        }
        self.cpus.set(cpu);
    }

    /// The task's own CPU if it is a member, else the highest member.
    fn select(&self, task_cpu: CpuId) -> Option<CpuId> {
        if self.cpus.test(task_cpu) {
            return Some(task_cpu);
        }
        self.cpus.last()
    }
}

fn mark_lowest(cpu: CpuId, util: u64, lowest: &mut Option<(CpuId, u64)>) {
    if lowest.map_or(true, |(_, u)| util < u) {
        *lowest = Some((cpu, util));
    }
}

// ── Resolvers ─────────────────────────────────────────────────────────────────

impl Engine {
    /// Prefer-perf applies through the group attribute or a service request.
    pub fn prefers_perf(&self, task: &Task) -> bool {
        task.attrs().prefer_perf || self.services.prefer_perf(task.group) > 0
    }

    /// Prefer-performance: place the task in the highest-capacity cluster.
    pub fn prefer_perf_cpu(&self, task: &Task) -> Option<CpuId> {
        if !self.prefers_perf(task) {
            return None;
        }
        let target = self.find_perf_target(task, false);
        debug!(pid = task.pid, target = ?target, "prefer-perf");
        target
    }

    /// Group balance: keep the task on its CPU when that CPU is idle in the
    /// reference (highest) cluster, else spread it across that cluster.
    pub fn group_balancing(&self, task: &Task) -> Option<CpuId> {
        if !task.attrs().group_balance {
            return None;
        }
        let target = self.find_perf_target(task, true);
        debug!(pid = task.pid, target = ?target, "group balancing");
        target
    }

    /// Scan the highest cluster: an idle CPU without a recorded state wins,
    /// then the shallowest idle CPU, then the least utilised busy CPU.
    fn find_perf_target(&self, task: &Task, keep_current: bool) -> Option<CpuId> {
        let top = self.topology.highest_cluster().cpus;
        let active = self.cpus.active_mask();
        let current = task.cpu();

        if keep_current
            && top.test(current)
            && active.test(current)
            && task.allows(current)
            && self.cpus.get(current).is_idle()
        {
            return Some(current);
        }

        let view = self.util_view();
        let mut shallowest = None;
        let mut min_exit_latency = u32::MAX;
        let mut lowest = None;

        for cpu in task.allowed().and(top).and(active).iter() {
            let slot = self.cpus.get(cpu);
            if slot.is_idle() {
                match slot.idle_state() {
                    None => return Some(cpu),
                    Some(idle) if idle.exit_latency_us < min_exit_latency => {
                        min_exit_latency = idle.exit_latency_us;
                        shallowest = Some(cpu);
                        continue;
                    }
                    Some(_) => {}
                }
            }

            if shallowest.is_some() {
                continue;
            }
            mark_lowest(cpu, view.cpu_util_wake(cpu, task), &mut lowest);
        }

        shallowest.or(lowest.map(|(cpu, _)| cpu))
    }

    /// Global boost: place every task as if it were `boost` bigger.
    pub fn global_boosting(&self, task: &Task) -> Option<CpuId> {
        let boost = self.global_boost();
        if boost == 0 {
            return None;
        }
        self.find_boost_target(task, task.boosted_util(), boost)
    }

    /// Walk the clusters from the lowest capacity up.
    ///
    /// A CPU "has room" when the boosted projected utilisation (capped at
    /// the system's largest capacity) fits its original capacity.  Idle
    /// CPUs with room are candidates and idle CPUs without room are the
    /// backup, each narrowed to the shallowest idle state.  After every
    /// cluster in which a CPU with room has been seen, a candidate and then
    /// a backup is tried.  When nothing is idle and a busy CPU of the
    /// task's own cluster overflowed, the least utilised busy CPU with room
    /// is taken; otherwise the task stays where it is.
    fn find_boost_target(&self, task: &Task, min_util: u64, boost: u64) -> Option<CpuId> {
        let view = self.util_view();
        let active = self.cpus.active_mask();
        let max_capacity = self.topology.max_capacity();
        let task_cpu = task.cpu();
        let task_cluster = self
            .topology
            .is_valid_cpu(task_cpu)
            .then(|| self.topology.cluster_id_of(task_cpu));

        // Stays `None` until some CPU with room has been seen.
        let mut candidates: Option<ShallowestSet> = None;
        let mut backup = ShallowestSet::new();
        let mut go_up = false;
        let mut lowest = None;

        for cluster in self.topology.clusters() {
            for cpu in task.allowed().and(cluster.cpus).and(active).iter() {
                let slot = self.cpus.get(cpu);
                let wake_util = view.cpu_util_wake(cpu, task);
                let new_util = (wake_util + task.util()).max(min_util);

                if (new_util + boost).min(max_capacity) > self.topology.capacity_orig_of(cpu) {
                    if slot.is_idle() {
                        backup.mark(cpu, slot.idle_state());
                    } else if task_cluster == Some(cluster.id) {
                        go_up = true;
                    }
                    continue;
                }

                let set = candidates.get_or_insert_with(ShallowestSet::new);
                if slot.is_idle() {
                    set.mark(cpu, slot.idle_state());
                    continue;
                }
                mark_lowest(cpu, wake_util, &mut lowest);
            }

            let Some(set) = &candidates else {
                continue;
            };
            if let Some(cpu) = set.select(task_cpu) {
                debug!(pid = task.pid, cpu, boost, "global boost: big idle");
                return Some(cpu);
            }
            if let Some(cpu) = backup.select(task_cpu) {
                debug!(pid = task.pid, cpu, boost, "global boost: little idle");
                return Some(cpu);
            }
        }

        if go_up {
            let target = lowest.map(|(cpu, _)| cpu);
            debug!(pid = task.pid, target = ?target, boost, "global boost: lowest big cpu");
            return target;
        }

        let stay = self.topology.is_valid_cpu(task_cpu)
            && active.test(task_cpu)
            && task.allows(task_cpu);
        debug!(pid = task.pid, cpu = task_cpu, stay, boost, "global boost: current cpu");
        stay.then_some(task_cpu)
    }

    /// Prefer-idle: cluster by cluster from the lowest capacity, take the
    /// task's own CPU if idle, else the least utilised idle CPU, else the
    /// least utilised busy CPU.  CPUs the task would overflow are a last
    /// resort, and only when idle.
    pub fn prefer_idle_cpu(&self, task: &Task) -> Option<CpuId> {
        if !task.attrs().prefer_idle {
            return None;
        }

        let view = self.util_view();
        let active = self.cpus.active_mask();
        let min_util = task.boosted_util();
        let task_cpu = task.cpu();

        let mut overcap_idle = CpuMask::empty();
        let mut overcap = None;

        for cluster in self.topology.clusters() {
            let mut lowest_idle = None;
            let mut lowest_busy = None;

            for cpu in task.allowed().and(cluster.cpus).and(active).iter() {
                let idle = self.cpus.get(cpu).is_idle();
                let new_util = (view.cpu_util_wake(cpu, task) + task.util()).max(min_util);

                if new_util > self.topology.capacity_orig_of(cpu) {
                    if idle {
                        overcap_idle.set(cpu);
                        mark_lowest(cpu, new_util, &mut overcap);
                    }
                    continue;
                }

                if idle {
                    if cpu == task_cpu {
                        debug!(pid = task.pid, cpu, "prefer-idle: current idle");
                        return Some(cpu);
                    }
                    mark_lowest(cpu, new_util, &mut lowest_idle);
                    continue;
                }
                mark_lowest(cpu, new_util, &mut lowest_busy);
            }

            if let Some((cpu, _)) = lowest_idle.or(lowest_busy) {
                debug!(pid = task.pid, cpu, cluster = cluster.name.as_str(), "prefer-idle");
                return Some(cpu);
            }
        }

        if overcap_idle.test(task_cpu) {
            return Some(task_cpu);
        }
        let target = overcap.map(|(cpu, _)| cpu);
        debug!(pid = task.pid, target = ?target, "prefer-idle: overcap");
        target
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
