/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Utilisation estimates used by every placement path.

use crate::cpu::Cpus;
use crate::task::Task;
use crate::topology::{CpuId, Topology};

/// Read-only view over the topology and the per-CPU counters.
#[derive(Clone, Copy)]
pub struct UtilView<'a> {
    topology: &'a Topology,
    cpus: &'a Cpus,
}

impl<'a> UtilView<'a> {
    pub fn new(topology: &'a Topology, cpus: &'a Cpus) -> Self {
        Self { topology, cpus }
    }

    /// CPU utilisation clamped to its original capacity.
    pub fn cpu_util(&self, cpu: CpuId) -> u64 {
        self.cpus
            .get(cpu)
            .util()
            .min(self.topology.capacity_orig_of(cpu))
    }

    /// Utilisation of `cpu` as seen by `task` waking up.
    ///
    /// When `cpu` is the task's home CPU and the task's blocked utilisation is
    /// still accounted there, that contribution is removed so the task is not
    /// counted twice.
    pub fn cpu_util_wake(&self, cpu: CpuId, task: &Task) -> u64 {
        if cpu != task.cpu() || !task.has_contrib() {
            return self.cpu_util(cpu);
        }

        let capacity = self.topology.capacity_orig_of(cpu);
        let util = self.cpus.get(cpu).util().saturating_sub(task.util());
        util.min(capacity)
    }

    /// Utilisation `cpu` would carry if `task` ran there.
    pub fn projected_util(&self, cpu: CpuId, task: &Task) -> u64 {
        self.cpu_util_wake(cpu, task) + task.util()
    }
}
