/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Energy-aware CPU finder.
//!
//! Two candidates are gathered for a waking task:
//!
//! * **best**: a busy CPU, smallest original capacity first, then largest
//!   spare capacity after placing the task;
//! * **backup**: an idle CPU, smallest original capacity first, then
//!   shallowest idle state.
//!
//! The system energy with the task on the previous CPU is compared with the
//! cheaper of the two candidates.  The task only moves if the saving is at
//! least the dead-zone margin `prev_energy >> 6` (about 1.56 %).

use tracing::{debug, trace};

use crate::scheduler::Engine;
use crate::task::Task;
use crate::topology::{CpuId, SCHED_CAPACITY_SCALE, SCHED_CAPACITY_SHIFT};

/// Dead zone below which an energy saving is not worth a migration.
pub fn dead_zone_margin(prev_energy: u64) -> u64 {
    prev_energy >> 6
}

/// Does moving from `prev_energy` to `target_energy` save enough?
pub fn worth_migrating(prev_energy: u64, target_energy: u64) -> bool {
    target_energy < prev_energy && prev_energy - target_energy >= dead_zone_margin(prev_energy)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EcoCandidates {
    pub best: Option<CpuId>,
    pub backup: Option<CpuId>,
}

impl Engine {
    /// Collect the best (busy) and backup (idle) candidates for `task`,
    /// never considering `prev_cpu` itself.
    pub fn find_eco_target(&self, task: &Task, prev_cpu: CpuId) -> EcoCandidates {
        let view = self.util_view();
        let task_util = task.util();

        let mut best = None;
        let mut best_min_cap = u64::MAX;
        let mut best_spare = 0;
        let mut backup = None;
        let mut backup_min_cap = u64::MAX;
        let mut backup_idle_idx = i64::MAX;

        for cpu in task.allowed().and(self.cpus.active_mask()).iter() {
            if cpu == prev_cpu {
                continue;
            }
            let cap_orig = self.topology.capacity_orig_of(cpu);
            let new_util = view.cpu_util_wake(cpu, task) + task_util;

            if new_util > cap_orig || self.lbt_bring_overutilize(cpu, task) {
                continue;
            }

            let slot = self.cpus.get(cpu);
            if slot.is_idle() {
                // No recorded state ranks shallower than state 0.
                let idle_idx = slot.idle_state().map_or(-1, |s| i64::from(s.index));
                if cap_orig > backup_min_cap
                    || (cap_orig == backup_min_cap && idle_idx >= backup_idle_idx)
                {
                    continue;
                }
                backup_min_cap = cap_orig;
                backup_idle_idx = idle_idx;
                backup = Some(cpu);
                continue;
            }

            let spare = cap_orig - new_util;
            if cap_orig > best_min_cap || (cap_orig == best_min_cap && spare < best_spare) {
                continue;
            }
            best_spare = spare;
            best_min_cap = cap_orig;
            best = Some(cpu);
        }

        EcoCandidates { best, backup }
    }

    /// Estimated system energy if `task` ran on `target_cpu`.
    pub fn compute_energy(&self, task: &Task, target_cpu: CpuId) -> u64 {
        let view = self.util_view();
        let active = self.cpus.active_mask();

        let util: Vec<u64> = (0..self.topology.nr_cpus())
            .map(|cpu| {
                if !active.test(cpu) {
                    return 0;
                }
                let wake = view.cpu_util_wake(cpu, task);
                if cpu == target_cpu {
                    wake + task.util()
                } else {
                    wake
                }
            })
            .collect();

        let mut energy = 0;
        for cluster in self.topology.clusters() {
            let max_util = cluster.cpus.iter().map(|cpu| util[cpu]).max().unwrap_or(0);
            let state = cluster.find_state(max_util);

            let util_sum: u64 = cluster
                .cpus
                .iter()
                .map(|cpu| {
                    if util[cpu] >= state.cap {
                        SCHED_CAPACITY_SCALE
                    } else {
                        (util[cpu] << SCHED_CAPACITY_SHIFT) / state.cap
                    }
                })
                .sum();

            energy += util_sum * state.power;
        }
        energy
    }

    /// Choose between `prev_cpu` and the cheaper of the candidates.
    pub fn select_eco_cpu(&self, task: &Task, prev_cpu: CpuId, candidates: EcoCandidates) -> CpuId {
        let prev_energy = self.compute_energy(task, prev_cpu);
        let best_energy = candidates.best.map(|cpu| self.compute_energy(task, cpu));
        let backup_energy = candidates.backup.map(|cpu| self.compute_energy(task, cpu));

        let best = candidates.best.zip(best_energy);
        let backup = candidates.backup.zip(backup_energy);
        let cheaper = match (best, backup) {
            (Some(b), Some(k)) if b.1 < k.1 => Some(b),
            (Some(_), Some(k)) => Some(k),
            (b, k) => b.or(k),
        };

        let eco_cpu = match cheaper {
            Some((cpu, energy)) if worth_migrating(prev_energy, energy) => cpu,
            _ => prev_cpu,
        };

        debug!(
            pid = task.pid,
            eco_cpu,
            prev_cpu,
            best_cpu = ?candidates.best,
            backup_cpu = ?candidates.backup,
            prev_energy,
            best_energy = ?best_energy,
            backup_energy = ?backup_energy,
            "select eco cpu"
        );
        eco_cpu
    }

    /// Energy-aware placement for a waking `task` last run on `prev_cpu`.
    ///
    /// `sync_waker` is the waker's CPU on a synchronous wakeup; with the
    /// sync hint enabled it is returned as is when `task` may run there.
    pub fn select_energy_cpu(
        &self,
        task: &Task,
        prev_cpu: CpuId,
        sync_waker: Option<CpuId>,
    ) -> Option<CpuId> {
        if !self.topology.is_valid_cpu(prev_cpu) {
            return None;
        }

        if self.cluster_overutilized(prev_cpu) {
            trace!(pid = task.pid, prev_cpu, "energy: prev domain overutilized");
            return None;
        }

        if task.util() == 0 {
            return None;
        }

        if self.sync_hint_enabled() {
            if let Some(waker) = sync_waker.filter(|&cpu| task.allows(cpu)) {
                trace!(pid = task.pid, waker, "energy: sync wakeup");
                return Some(waker);
            }
        }

        let candidates = self.find_eco_target(task, prev_cpu);
        if candidates.best.is_none() && candidates.backup.is_none() {
            return None;
        }

        Some(self.select_eco_cpu(task, prev_cpu, candidates))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::IdleState;
    use crate::scheduler::testing::{big_little_engine, cluster, engine_on, occupy, platform_of};
    use crate::task::TaskInfo;
    use crate::topology::CpuMask;

    fn waking(util: u64, cpu: CpuId) -> Task {
        Task::new(TaskInfo {
            pid: 7,
            cpu,
            util,
            ..Default::default()
        })
    }

    // ── Dead zone ─────────────────────────────────────────────────────────────

    #[test]
    fn saving_of_exactly_the_margin_migrates() {
        assert_eq!(dead_zone_margin(1000), 15);
        assert!(worth_migrating(1000, 985));
    }

    #[test]
    fn saving_inside_the_margin_stays() {
        assert!(!worth_migrating(1000, 990));
        assert!(!worth_migrating(1000, 1000));
        assert!(!worth_migrating(1000, 1200));
    }

    /// little: CPU 0 at 512 (power 32).  big: CPU 1 at 1024 (power 63).
    fn single_state_engine() -> Engine {
        let (engine, _clock) = engine_on(platform_of(vec![
            cluster("little", 0b01, &[(512, 32)]),
            cluster("big", 0b10, &[(1024, 63)]),
        ]));
        engine
    }

    #[test]
    fn wakeup_saving_exactly_the_margin_moves() {
        let engine = single_state_engine();
        occupy(&engine, 1);
        let task = waking(64, 0);

        // prev: 128 * 32 = 4096, cpu 1: 64 * 63 = 4032, margin 4096 >> 6 = 64
        assert_eq!(engine.compute_energy(&task, 0), 4096);
        assert_eq!(engine.compute_energy(&task, 1), 4032);
        assert_eq!(engine.select_energy_cpu(&task, 0, None), Some(1));
    }

    #[test]
    fn wakeup_saving_one_below_the_margin_stays() {
        let engine = single_state_engine();
        occupy(&engine, 1);
        engine.set_cpu_util(1, 2);
        let task = waking(64, 0);

        // prev: 4096 + 2 * 63 = 4222, cpu 1: 66 * 63 = 4158, margin 65
        assert_eq!(engine.compute_energy(&task, 0), 4222);
        assert_eq!(engine.compute_energy(&task, 1), 4158);
        assert_eq!(engine.select_energy_cpu(&task, 0, None), Some(0));
    }

    // ── Energy model ──────────────────────────────────────────────────────────

    #[test]
    fn energy_follows_cluster_states_and_power() {
        let (engine, _clock) = big_little_engine();
        engine.set_cpu_util(0, 200);
        engine.set_cpu_util(1, 100);
        let task = waking(100, 0);

        // little at 300 peak -> 512 state (power 100): (600 + 200) * 100
        assert_eq!(engine.compute_energy(&task, 0), 80_000);
        // little at 200 peak -> 256 state (power 40): (800 + 800) * 40
        assert_eq!(engine.compute_energy(&task, 1), 64_000);
        // little (800 + 400) * 40 plus big 100/512 * 1024 * 300
        assert_eq!(engine.compute_energy(&task, 2), 108_000);
    }

    #[test]
    fn saturated_cpu_counts_full_scale() {
        let (engine, _clock) = big_little_engine();
        engine.set_cpu_util(0, 600);
        let task = waking(100, 3);
        // cpu 0 clamps to 512 at the top state: 1024 * 100
        assert_eq!(engine.compute_energy(&task, 1), (1024 + 200) * 100);
    }

    // ── Candidates ────────────────────────────────────────────────────────────

    #[test]
    fn busy_little_beats_idle_big() {
        let (engine, _clock) = big_little_engine();
        engine.set_cpu_util(0, 200);
        engine.set_cpu_util(1, 100);
        occupy(&engine, 0);
        occupy(&engine, 1);
        let task = waking(100, 0);

        let cands = engine.find_eco_target(&task, 0);
        assert_eq!(cands.best, Some(1));
        assert_eq!(cands.backup, Some(2));
        assert_eq!(engine.select_energy_cpu(&task, 0, None), Some(1));
    }

    #[test]
    fn backup_prefers_shallower_idle_state() {
        let (engine, _clock) = big_little_engine();
        engine.set_idle(2, Some(IdleState { index: 1, exit_latency_us: 500 }));
        engine.set_idle(3, Some(IdleState { index: 0, exit_latency_us: 50 }));
        engine.set_cpu_util(0, 100);
        occupy(&engine, 0);
        engine.set_cpu_util(1, 480);
        occupy(&engine, 1);
        let task = waking(100, 0);

        let cands = engine.find_eco_target(&task, 0);
        assert_eq!(cands.backup, Some(3));
        // cpu 1 would exceed its capacity
        assert_eq!(cands.best, None);
    }

    #[test]
    fn equal_spare_keeps_the_later_cpu() {
        let (engine, _clock) = big_little_engine();
        for cpu in 0..4 {
            engine.set_cpu_util(cpu, 100);
            occupy(&engine, cpu);
        }
        let task = waking(50, 3);
        assert_eq!(engine.find_eco_target(&task, 3).best, Some(1));
    }

    /// big: CPUs 0-1, 512/1024.  little: CPUs 2-3, 256/512.
    fn big_first_engine() -> Engine {
        let (engine, _clock) = engine_on(platform_of(vec![
            cluster("big", 0b0011, &[(512, 300), (1024, 800)]),
            cluster("little", 0b1100, &[(256, 40), (512, 100)]),
        ]));
        engine
    }

    #[test]
    fn smaller_busy_cpu_wins_regardless_of_numbering() {
        let engine = big_first_engine();
        for (cpu, util) in [(0, 700), (1, 100), (2, 100), (3, 300)] {
            engine.set_cpu_util(cpu, util);
            occupy(&engine, cpu);
        }
        let task = waking(50, 3);
        assert_eq!(engine.find_eco_target(&task, 3).best, Some(2));
    }

    #[test]
    fn smaller_idle_cpu_wins_over_shallower_state() {
        let engine = big_first_engine();
        engine.set_idle(0, Some(IdleState { index: 0, exit_latency_us: 50 }));
        engine.set_idle(2, Some(IdleState { index: 1, exit_latency_us: 500 }));
        occupy(&engine, 1);
        occupy(&engine, 3);
        let task = waking(50, 3);

        let cands = engine.find_eco_target(&task, 3);
        assert_eq!(cands.backup, Some(2));
        assert_eq!(cands.best, Some(1));
    }

    // ── Entry point ───────────────────────────────────────────────────────────

    #[test]
    fn zero_util_task_gets_no_preference() {
        let (engine, _clock) = big_little_engine();
        assert_eq!(engine.select_energy_cpu(&waking(0, 0), 0, None), None);
    }

    #[test]
    fn overutilized_prev_cluster_gets_no_preference() {
        let (engine, _clock) = big_little_engine();
        engine.set_cpu_util(1, 500);
        assert_eq!(engine.select_energy_cpu(&waking(100, 0), 0, None), None);
    }

    #[test]
    fn sync_hint_returns_allowed_waker() {
        let (engine, _clock) = big_little_engine();
        let task = waking(100, 0);
        engine.set_sync_hint(false);
        assert_ne!(engine.select_energy_cpu(&task, 0, Some(3)), Some(3));
        engine.set_sync_hint(true);
        assert_eq!(engine.select_energy_cpu(&task, 0, Some(3)), Some(3));
    }

    #[test]
    fn no_candidate_means_no_preference() {
        let (engine, _clock) = big_little_engine();
        let task = waking(100, 0);
        task.set_allowed(CpuMask::from_bits(0b0001));
        assert_eq!(engine.select_energy_cpu(&task, 0, None), None);
    }
}
