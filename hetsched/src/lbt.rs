/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Load-balance trigger (LBT).
//!
//! For every CPU and every topology level the platform gives a ratio; the
//! CPU counts as over-utilised at that level once its utilisation exceeds
//! `ratio% × current capacity`.  Thresholds are recomputed whenever the CPU's
//! capacity changes.
//!
//! A level whose span for some CPU is identical to the level below adds no
//! information and is disabled for that CPU.  Disabled levels never report
//! over-utilisation.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::scheduler::error::{AdminError, TopologyError};
use crate::scheduler::Engine;
use crate::task::Task;
use crate::topology::{CpuId, CpuMask, Topology};

pub const DEFAULT_OU_RATIO: u32 = 80;

const DISABLED: u32 = u32::MAX;

// ── Level description ─────────────────────────────────────────────────────────

/// One topology level as described by the platform: each group is a CPU span
/// with its ratio.  The spans of a level partition the CPUs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbtLevelSpec {
    pub groups: Vec<(CpuMask, u32)>,
}

impl LbtLevelSpec {
    /// Level 0 per cluster and level 1 across the whole system, both at
    /// [`DEFAULT_OU_RATIO`].
    pub fn defaults(topology: &Topology) -> Vec<LbtLevelSpec> {
        vec![
            LbtLevelSpec {
                groups: topology
                    .clusters()
                    .iter()
                    .map(|c| (c.cpus, DEFAULT_OU_RATIO))
                    .collect(),
            },
            LbtLevelSpec {
                groups: vec![(topology.possible_mask(), DEFAULT_OU_RATIO)],
            },
        ]
    }
}

#[derive(Debug)]
struct OverutilEntry {
    span: CpuMask,
    top: bool,
    ratio: AtomicU32,
    threshold: AtomicU64,
}

impl OverutilEntry {
    fn ratio(&self) -> Option<u32> {
        match self.ratio.load(Ordering::Acquire) {
            DISABLED => None,
            r => Some(r),
        }
    }

    fn recompute(&self, capacity: u64) {
        if let Some(ratio) = self.ratio() {
            self.threshold
                .store(capacity * u64::from(ratio) / 100, Ordering::Release);
        }
    }
}

// ── Lbt ───────────────────────────────────────────────────────────────────────

/// Per-CPU, per-level over-utilisation thresholds.
#[derive(Debug)]
pub struct Lbt {
    /// `per_cpu[cpu][level]`.
    per_cpu: Vec<Vec<OverutilEntry>>,
}

impl Lbt {
    pub fn new(topology: &Topology, levels: &[LbtLevelSpec]) -> Result<Self, TopologyError> {
        let possible = topology.possible_mask();
        let nr_cpus = topology.nr_cpus();
        let mut per_cpu: Vec<Vec<OverutilEntry>> = (0..nr_cpus).map(|_| Vec::new()).collect();

        for (level, spec) in levels.iter().enumerate() {
            let mut covered = CpuMask::empty();

            for &(span, ratio) in &spec.groups {
                if ratio > 100 {
                    return Err(TopologyError::LbtRatioOutOfRange { level, ratio });
                }
                let span = span.and(possible);
                if span.is_empty() {
                    return Err(TopologyError::LbtEmptySpan {
                        level,
                        span: span.to_string(),
                    });
                }
                if let Some(cpu) = span.and(covered).first() {
                    return Err(TopologyError::LbtCpuOverlap { level, cpu });
                }
                covered = covered.or(span);

                let top = span == possible;
                let overlap = level > 0
                    && span
                        .first()
                        .and_then(|first| per_cpu[first].get(level - 1))
                        .is_some_and(|below| below.span == span);

                for cpu in span.iter() {
                    let entry = OverutilEntry {
                        span,
                        top,
                        ratio: AtomicU32::new(if overlap { DISABLED } else { ratio }),
                        threshold: AtomicU64::new(0),
                    };
                    entry.recompute(topology.capacity_orig_of(cpu));
                    per_cpu[cpu].push(entry);
                }
            }

            if let Some(cpu) = (0..nr_cpus).find(|c| !covered.test(*c)) {
                return Err(TopologyError::LbtCpuNotCovered { level, cpu });
            }
        }

        Ok(Self { per_cpu })
    }

    pub fn nr_levels(&self) -> usize {
        self.per_cpu.first().map_or(0, Vec::len)
    }

    fn entry(&self, cpu: CpuId, level: usize) -> Option<&OverutilEntry> {
        self.per_cpu.get(cpu)?.get(level)
    }

    /// Threshold of `cpu` at `level`, `None` when the level is disabled.
    pub fn threshold(&self, cpu: CpuId, level: usize) -> Option<u64> {
        let entry = self.entry(cpu, level)?;
        entry.ratio()?;
        Some(entry.threshold.load(Ordering::Acquire))
    }

    pub fn ratio(&self, cpu: CpuId, level: usize) -> Option<u32> {
        self.entry(cpu, level)?.ratio()
    }

    pub fn span(&self, cpu: CpuId, level: usize) -> Option<CpuMask> {
        self.entry(cpu, level).map(|e| e.span)
    }

    /// Returns `true` if `level` spans every CPU.
    pub fn is_top(&self, cpu: CpuId, level: usize) -> bool {
        self.entry(cpu, level).is_some_and(|e| e.top)
    }

    /// Lowest level at which `cpu` has a live threshold.
    pub fn lowest_enabled_level(&self, cpu: CpuId) -> Option<usize> {
        self.per_cpu
            .get(cpu)?
            .iter()
            .position(|e| e.ratio().is_some())
    }

    /// `util > threshold[cpu][level]`.
    pub fn is_overutilized(&self, cpu: CpuId, level: usize, util: u64) -> bool {
        self.threshold(cpu, level).is_some_and(|t| util > t)
    }

    /// Recompute every enabled level of `cpu` for a new capacity.
    pub fn update_thresholds(&self, cpu: CpuId, capacity: u64) {
        if let Some(levels) = self.per_cpu.get(cpu) {
            for entry in levels {
                entry.recompute(capacity);
            }
        }
    }

    /// Set the ratio of `level` for every CPU sharing `cpu`'s span at that
    /// level and recompute their thresholds from `capacity_of`.
    pub fn set_ratio(
        &self,
        level: usize,
        cpu: CpuId,
        ratio: u32,
        capacity_of: impl Fn(CpuId) -> u64,
    ) -> Result<(), AdminError> {
        if ratio > 100 {
            return Err(AdminError::RatioOutOfRange(ratio));
        }
        let levels = self.per_cpu.get(cpu).ok_or(AdminError::UnknownCpu(cpu))?;
        let entry = levels.get(level).ok_or(AdminError::UnknownLevel(level))?;
        if entry.ratio().is_none() {
            return Err(AdminError::LevelDisabled { level, cpu });
        }

        for sibling in entry.span.iter() {
            if let Some(e) = self.entry(sibling, level) {
                if e.ratio().is_none() {
                    continue;
                }
                e.ratio.store(ratio, Ordering::Release);
                e.recompute(capacity_of(sibling));
            }
        }
        Ok(())
    }
}

// ── Engine integration ────────────────────────────────────────────────────────

/// Inputs of an active-balance decision, supplied by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceContext {
    pub level: usize,
    pub src_cpu: CpuId,
    pub dst_cpu: CpuId,
    /// The balancing (destination) CPU is idle.
    pub dst_idle: bool,
    pub imbalance_pct: u32,
    pub nr_balance_failed: u32,
    pub cache_nice_tries: u32,
}

impl Default for BalanceContext {
    fn default() -> Self {
        Self {
            level: 0,
            src_cpu: 0,
            dst_cpu: 0,
            dst_idle: false,
            imbalance_pct: 125,
            nr_balance_failed: 0,
            cache_nice_tries: 1,
        }
    }
}

impl Engine {
    /// Returns `true` if `cpu` is over-utilised at `level`.
    pub fn lbt_overutilized(&self, cpu: CpuId, level: usize) -> bool {
        let util = self.util_view().cpu_util(cpu);
        let over = self.lbt.is_overutilized(cpu, level, util);
        if over {
            trace!(
                cpu,
                level,
                util,
                threshold = self.lbt.threshold(cpu, level),
                "lbt overutilized"
            );
        }
        over
    }

    /// Would placing `task` on `cpu` push it over its lowest live threshold?
    pub fn lbt_bring_overutilize(&self, cpu: CpuId, task: &Task) -> bool {
        let Some(level) = self.lbt.lowest_enabled_level(cpu) else {
            return false;
        };
        let util = self.util_view().projected_util(cpu, task);
        self.lbt.is_overutilized(cpu, level, util)
    }

    /// Returns `true` if any CPU of `cpu`'s cluster is over-utilised at its
    /// lowest live level.
    pub(crate) fn cluster_overutilized(&self, cpu: CpuId) -> bool {
        self.topology.coregroup_mask(cpu).iter().any(|c| {
            self.lbt
                .lowest_enabled_level(c)
                .is_some_and(|level| self.lbt_overutilized(c, level))
        })
    }

    /// Should the load balancer force an active (stopper) migration from
    /// `ctx.src_cpu` to `ctx.dst_cpu`?
    pub fn need_active_balance(&self, ctx: &BalanceContext) -> bool {
        let topo = &self.topology;
        if !topo.is_valid_cpu(ctx.src_cpu) || !topo.is_valid_cpu(ctx.dst_cpu) {
            return false;
        }

        let has_parent = !self.lbt.is_top(ctx.src_cpu, ctx.level);
        let (src_imb_pct, dst_imb_pct) = if has_parent {
            (u64::from(ctx.imbalance_pct), 100)
        } else {
            (1, 1)
        };
        let imb = u64::from(ctx.imbalance_pct);
        let src = self.cpus.get(ctx.src_cpu);
        let src_cap = src.capacity();
        let dst_cap = self.cpus.get(ctx.dst_cpu).capacity();
        let single = src.nr_running() == 1;

        if ctx.dst_idle && single {
            let capacity_reduced = src_cap * imb < topo.capacity_orig_of(ctx.src_cpu) * 100;
            if capacity_reduced && src_cap * imb < dst_cap * 100 {
                debug!(src = ctx.src_cpu, dst = ctx.dst_cpu, "active balance: reduced capacity");
                return true;
            }

            if !has_parent
                && src_cap < dst_cap
                && (self.lbt_overutilized(ctx.src_cpu, ctx.level) || self.global_boost() > 0)
            {
                debug!(src = ctx.src_cpu, dst = ctx.dst_cpu, "active balance: misfit at top");
                return true;
            }
        }

        if src_cap * src_imb_pct < dst_cap * dst_imb_pct
            && single
            && self.lbt_overutilized(ctx.src_cpu, ctx.level)
            && !self.lbt_overutilized(ctx.dst_cpu, ctx.level)
        {
            debug!(src = ctx.src_cpu, dst = ctx.dst_cpu, "active balance: overutilized source");
            return true;
        }

        ctx.nr_balance_failed > ctx.cache_nice_tries + 2
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
