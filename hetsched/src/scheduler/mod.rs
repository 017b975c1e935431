/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The placement engine and its wakeup cascade.
//!
//! [`Engine`] owns every piece of mutable scheduler state: the per-CPU
//! slots, LBT thresholds, ontime boundaries, boost requests and service
//! requests.  Collaborators hold it behind an `Arc` and call into it from
//! any number of threads.
//!
//! # Wakeup cascade
//!
//! [`Engine::select_wakeup_cpu`] asks each [`Resolver`] in turn and returns
//! the first concrete CPU:
//!
//! | # | Resolver | Applies when |
//! |---|---|---|
//! | 1 | service | an external service resolver is installed |
//! | 2 | ontime | the task is heavy or already ontime |
//! | 3 | prefer-perf | group attribute or service request |
//! | 4 | group balance | group attribute |
//! | 5 | global boost | a boost request is active |
//! | 6 | prefer-idle | group attribute |
//! | 7 | energy | task has utilisation, domain not over-utilised |
//! | 8 | proper | an external fallback is installed |
//!
//! # Lock order
//!
//! Run-queue locks are taken before a task's ontime lock, and two run-queue
//! locks are always taken lowest CPU first ([`Cpus::lock_pair`]).  The
//! wakeup path takes no run-queue lock at all.

pub mod energy;
pub mod error;
pub mod resolvers;

pub use error::{AdminError, DispatchError, TopologyError};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::boost::{GlobalBoost, ServiceRequests};
use crate::clock::Clock;
use crate::cpu::{CpuSlot, Cpus, IdleState, RunQueue};
use crate::lbt::{Lbt, LbtLevelSpec};
use crate::ontime::migration::MigrationDispatcher;
use crate::ontime::{BoundarySpec, OntimeConditions};
use crate::task::{StuneGroup, Task};
use crate::topology::{CpuId, Topology, SCHED_CAPACITY_SCALE};
use crate::util::UtilView;

// ── Cascade ───────────────────────────────────────────────────────────────────

/// One step of the wakeup cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolver {
    Service,
    Ontime,
    PreferPerf,
    GroupBalance,
    GlobalBoost,
    PreferIdle,
    Energy,
    Proper,
}

impl Resolver {
    /// Cascade order, highest priority first.
    pub const CASCADE: [Resolver; 8] = [
        Resolver::Service,
        Resolver::Ontime,
        Resolver::PreferPerf,
        Resolver::GroupBalance,
        Resolver::GlobalBoost,
        Resolver::PreferIdle,
        Resolver::Energy,
        Resolver::Proper,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resolver::Service => "service",
            Resolver::Ontime => "ontime migration",
            Resolver::PreferPerf => "prefer-perf",
            Resolver::GroupBalance => "group balancing",
            Resolver::GlobalBoost => "global boosting",
            Resolver::PreferIdle => "prefer-idle",
            Resolver::Energy => "energy cpu",
            Resolver::Proper => "proper cpu",
        }
    }
}

/// A CPU choice made outside the engine: the service-specific resolver at
/// the head of the cascade and the default balancer at its tail.
pub trait ExternalResolver: Send + Sync {
    fn select_cpu(&self, task: &Task, prev_cpu: CpuId) -> Option<CpuId>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeFlags {
    /// First placement of a newly forked task.
    pub fork: bool,
}

/// Which resolver placed a task, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupDecision {
    pub resolver: Resolver,
    pub cpu: CpuId,
}

// ── Platform ──────────────────────────────────────────────────────────────────

/// Validated static description the engine is built from.
#[derive(Debug)]
pub struct Platform {
    pub topology: Arc<Topology>,
    pub lbt: Lbt,
    pub ontime: OntimeConditions,
    pub boot_boost_duration_us: u64,
    pub sync_hint: bool,
}

impl Platform {
    pub fn new(
        topology: Topology,
        lbt_levels: &[LbtLevelSpec],
        boundaries: &[BoundarySpec],
        boot_boost_duration_us: u64,
        sync_hint: bool,
    ) -> Result<Self, TopologyError> {
        let lbt = Lbt::new(&topology, lbt_levels)?;
        let ontime = OntimeConditions::new(&topology, boundaries)?;
        Ok(Self {
            topology: Arc::new(topology),
            lbt,
            ontime,
            boot_boost_duration_us,
            sync_hint,
        })
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    pub(crate) topology: Arc<Topology>,
    pub(crate) cpus: Cpus,
    pub(crate) lbt: Lbt,
    pub(crate) ontime: OntimeConditions,
    pub(crate) boost: GlobalBoost,
    pub(crate) services: ServiceRequests,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) dispatcher: Arc<dyn MigrationDispatcher>,
    service_resolver: Option<Arc<dyn ExternalResolver>>,
    proper_resolver: Option<Arc<dyn ExternalResolver>>,
    sync_hint: AtomicBool,
    /// Serialises the periodic migration scan.
    pub(crate) scan_lock: Mutex<()>,
}

impl Engine {
    pub fn new(
        platform: Platform,
        dispatcher: Arc<dyn MigrationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let topology = platform.topology;
        let cpus = Cpus::new(&topology);
        let boost = GlobalBoost::new(
            topology.second_max_capacity(),
            platform.boot_boost_duration_us,
        );

        info!(
            cpus = topology.nr_cpus(),
            clusters = topology.clusters().len(),
            boundaries = platform.ontime.boundaries().len(),
            lbt_levels = platform.lbt.nr_levels(),
            gb_max = boost.max_value(),
            "engine initialised"
        );

        Self {
            topology,
            cpus,
            lbt: platform.lbt,
            ontime: platform.ontime,
            boost,
            services: ServiceRequests::new(),
            clock,
            dispatcher,
            service_resolver: None,
            proper_resolver: None,
            sync_hint: AtomicBool::new(platform.sync_hint),
            scan_lock: Mutex::new(()),
        }
    }

    /// Install the cascade's leading service resolver.
    pub fn with_service_resolver(mut self, resolver: Arc<dyn ExternalResolver>) -> Self {
        self.service_resolver = Some(resolver);
        self
    }

    /// Install the cascade's trailing "proper CPU" fallback.
    pub fn with_proper_resolver(mut self, resolver: Arc<dyn ExternalResolver>) -> Self {
        self.proper_resolver = Some(resolver);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn cpus(&self) -> &Cpus {
        &self.cpus
    }

    pub fn lbt(&self) -> &Lbt {
        &self.lbt
    }

    pub fn ontime_conditions(&self) -> &OntimeConditions {
        &self.ontime
    }

    pub fn boost(&self) -> &GlobalBoost {
        &self.boost
    }

    pub fn util_view(&self) -> UtilView<'_> {
        UtilView::new(&self.topology, &self.cpus)
    }

    /// Effective global boost right now, in capacity units.
    pub fn global_boost(&self) -> u64 {
        self.boost.value(self.clock.now_us())
    }

    pub fn sync_hint_enabled(&self) -> bool {
        self.sync_hint.load(Ordering::Acquire)
    }

    // ── Wakeup ────────────────────────────────────────────────────────────────

    /// Pick a CPU for waking `task`, or `None` for no preference.
    ///
    /// `sync_waker` is the waker's CPU when the wakeup is synchronous.
    pub fn select_wakeup_cpu(
        &self,
        task: &Task,
        prev_cpu: CpuId,
        flags: WakeFlags,
        sync_waker: Option<CpuId>,
    ) -> Option<CpuId> {
        self.wakeup_decision(task, prev_cpu, flags, sync_waker)
            .map(|d| d.cpu)
    }

    /// Like [`select_wakeup_cpu`](Self::select_wakeup_cpu), also reporting
    /// which resolver decided.
    pub fn wakeup_decision(
        &self,
        task: &Task,
        prev_cpu: CpuId,
        flags: WakeFlags,
        sync_waker: Option<CpuId>,
    ) -> Option<WakeupDecision> {
        for resolver in Resolver::CASCADE {
            if let Some(cpu) = self.resolve(resolver, task, prev_cpu, sync_waker) {
                debug!(
                    pid = task.pid,
                    prev_cpu,
                    cpu,
                    fork = flags.fork,
                    resolver = resolver.name(),
                    "wakeup balance"
                );
                return Some(WakeupDecision { resolver, cpu });
            }
        }
        debug!(pid = task.pid, prev_cpu, fork = flags.fork, "wakeup balance: no preference");
        None
    }

    /// Run a single cascade step on its own.
    pub fn resolve(
        &self,
        resolver: Resolver,
        task: &Task,
        prev_cpu: CpuId,
        sync_waker: Option<CpuId>,
    ) -> Option<CpuId> {
        match resolver {
            Resolver::Service => self.external(self.service_resolver.as_deref(), task, prev_cpu),
            Resolver::Ontime => self.ontime_task_wakeup(task),
            Resolver::PreferPerf => self.prefer_perf_cpu(task),
            Resolver::GroupBalance => self.group_balancing(task),
            Resolver::GlobalBoost => self.global_boosting(task),
            Resolver::PreferIdle => self.prefer_idle_cpu(task),
            Resolver::Energy => self.select_energy_cpu(task, prev_cpu, sync_waker),
            Resolver::Proper => self.external(self.proper_resolver.as_deref(), task, prev_cpu),
        }
    }

    fn external(
        &self,
        resolver: Option<&dyn ExternalResolver>,
        task: &Task,
        prev_cpu: CpuId,
    ) -> Option<CpuId> {
        let cpu = resolver?.select_cpu(task, prev_cpu)?;
        if !self.topology.is_valid_cpu(cpu) {
            warn!(pid = task.pid, cpu, "external resolver returned unknown cpu");
            return None;
        }
        Some(cpu)
    }

    // ── Run-queue primitives ──────────────────────────────────────────────────

    fn slot(&self, cpu: CpuId) -> Option<&CpuSlot> {
        let slot = self.cpus.try_get(cpu);
        if slot.is_none() {
            warn!(cpu, "unknown cpu");
        }
        slot
    }

    /// Lock the run queue of the CPU `task` is on, retrying if a migration
    /// moved it before the lock was taken.
    fn lock_task_rq(&self, task: &Task) -> Option<(&CpuSlot, MutexGuard<'_, RunQueue>)> {
        loop {
            let cpu = task.cpu();
            let slot = self.slot(cpu)?;
            let rq = slot.lock_rq();
            if task.cpu() == cpu {
                return Some((slot, rq));
            }
        }
    }

    /// Put `task` on `cpu`'s run queue.  Its utilisation contribution follows
    /// it from its previous CPU.  Returns `false` if the task is already
    /// queued, has exited, or `cpu` is unknown.
    pub fn enqueue_task(&self, task: &Arc<Task>, cpu: CpuId) -> bool {
        let Some(slot) = self.slot(cpu) else {
            return false;
        };
        if task.has_exited() {
            return false;
        }

        let mut rq = slot.lock_rq();
        if task.on_rq() {
            return false;
        }

        let old = task.cpu();
        if task.has_contrib() && old != cpu {
            if let Some(prev) = self.cpus.try_get(old) {
                prev.sub_util(task.util());
            }
        }
        if !task.has_contrib() || old != cpu {
            slot.add_util(task.util());
            task.set_has_contrib(true);
        }

        task.set_cpu(cpu);
        task.set_on_rq(true);
        rq.push(Arc::clone(task));
        slot.sync_nr_running(&rq);
        true
    }

    /// Take `task` off its CPU's run queue.  Its blocked utilisation stays
    /// accounted on that CPU.
    pub fn dequeue_task(&self, task: &Task) -> bool {
        let Some((slot, mut rq)) = self.lock_task_rq(task) else {
            return false;
        };
        if rq.remove(task).is_none() {
            return false;
        }
        task.set_on_rq(false);
        slot.sync_nr_running(&rq);
        if rq.nr_running() == 0 {
            // Idle, not yet in any idle state.
            slot.set_idle_state(None);
        }
        true
    }

    /// Make the queued `task` its CPU's current task; the previous current
    /// task goes to the back of the queue.
    pub fn set_running(&self, task: &Task) -> bool {
        let Some((_, mut rq)) = self.lock_task_rq(task) else {
            return false;
        };
        if rq.curr.as_deref().is_some_and(|c| std::ptr::eq(c, task)) {
            return true;
        }
        let Some(pos) = rq.queued.iter().position(|t| std::ptr::eq(t.as_ref(), task)) else {
            return false;
        };
        let Some(next) = rq.queued.remove(pos) else {
            return false;
        };
        if let Some(prev) = rq.curr.replace(next) {
            rq.queued.push_back(prev);
        }
        true
    }

    /// Remove an exiting task and its utilisation contribution.
    pub fn task_exit(&self, task: &Task) {
        self.dequeue_task(task);
        task.set_exited();
        if task.has_contrib() {
            if let Some(slot) = self.cpus.try_get(task.cpu()) {
                slot.sub_util(task.util());
            }
            task.set_has_contrib(false);
        }
        debug!(pid = task.pid, "task exit");
    }

    /// Record the idle state `cpu` has entered.
    pub fn set_idle(&self, cpu: CpuId, state: Option<IdleState>) {
        if let Some(slot) = self.slot(cpu) {
            slot.set_idle_state(state);
        }
    }

    pub fn set_cpu_util(&self, cpu: CpuId, util: u64) {
        if let Some(slot) = self.slot(cpu) {
            slot.set_util(util);
        }
    }

    /// New current capacity of `cpu`; LBT thresholds follow it.
    pub fn update_cpu_capacity(&self, cpu: CpuId, capacity: u64) {
        let Some(slot) = self.slot(cpu) else {
            return;
        };
        let capacity = capacity.min(self.topology.capacity_orig_of(cpu));
        slot.set_capacity(capacity);
        self.lbt.update_thresholds(cpu, capacity);
        debug!(cpu, capacity, "cpu capacity updated");
    }

    pub fn set_freq_scale(&self, cpu: CpuId, scale: u64) {
        if let Some(slot) = self.slot(cpu) {
            slot.set_freq_scale(scale.min(SCHED_CAPACITY_SCALE));
        }
    }

    pub fn set_active(&self, cpu: CpuId, active: bool) {
        if let Some(slot) = self.slot(cpu) {
            slot.set_active(active);
            info!(cpu, active, "cpu active state changed");
        }
    }

    // ── Administration ────────────────────────────────────────────────────────

    pub fn set_up_threshold(&self, boundary: usize, value: u64) -> Result<(), AdminError> {
        self.ontime.set_up_threshold(boundary, value)?;
        info!(boundary, value, "ontime up-threshold updated");
        Ok(())
    }

    pub fn set_down_threshold(&self, boundary: usize, value: u64) -> Result<(), AdminError> {
        self.ontime.set_down_threshold(boundary, value)?;
        info!(boundary, value, "ontime down-threshold updated");
        Ok(())
    }

    pub fn set_min_residency(&self, boundary: usize, us: u64) -> Result<(), AdminError> {
        self.ontime.set_min_residency(boundary, us)?;
        info!(boundary, us, "ontime min residency updated");
        Ok(())
    }

    /// Change the LBT ratio of `level` for the span containing `cpu`.
    pub fn set_lbt_ratio(&self, level: usize, cpu: CpuId, ratio: u32) -> Result<(), AdminError> {
        self.lbt
            .set_ratio(level, cpu, ratio, |c| self.cpus.get(c).capacity())?;
        info!(level, cpu, ratio, "lbt ratio updated");
        Ok(())
    }

    pub fn update_boost_request(&self, name: &str, prio: u32) -> Result<(), AdminError> {
        self.boost.update_request(name, prio)
    }

    pub fn remove_boost_request(&self, name: &str) -> bool {
        self.boost.remove_request(name)
    }

    pub fn request_prefer_perf(&self, group: StuneGroup, value: i32) {
        self.services.request_prefer_perf(group, value);
    }

    pub fn set_sync_hint(&self, enabled: bool) {
        self.sync_hint.store(enabled, Ordering::Release);
        info!(enabled, "sync hint");
    }
}

// ── Test fixtures ─────────────────────────────────────────────────────────────


// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::testing::*;
    use super::*;
    use crate::task::{GroupAttrs, OntimeState, TaskInfo};

    struct Fixed(Option<CpuId>);

    impl ExternalResolver for Fixed {
        fn select_cpu(&self, _task: &Task, _prev_cpu: CpuId) -> Option<CpuId> {
            self.0
        }
    }

    fn sleeper(cpu: CpuId, util: u64) -> Task {
        Task::new(TaskInfo {
            pid: 5,
            cpu,
            util,
            ..Default::default()
        })
    }

    // ── Cascade ───────────────────────────────────────────────────────────────

    #[test]
    fn service_resolver_comes_first() {
        let (engine, _clock) = big_little_engine();
        let engine = engine.with_service_resolver(Arc::new(Fixed(Some(1))));
        let t = Task::new(TaskInfo {
            pid: 1,
            load_avg: 900,
            ..Default::default()
        });
        let d = engine.wakeup_decision(&t, 0, WakeFlags::default(), None).unwrap();
        assert_eq!(d, WakeupDecision { resolver: Resolver::Service, cpu: 1 });
    }

    #[test]
    fn ontime_outranks_prefer_perf() {
        let (engine, _clock) = big_little_engine();
        engine.set_idle(2, Some(IdleState { index: 0, exit_latency_us: 10 }));
        let t = Task::new(TaskInfo {
            pid: 1,
            load_avg: 900,
            attrs: GroupAttrs {
                prefer_perf: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let d = engine.wakeup_decision(&t, 0, WakeFlags::default(), None).unwrap();
        assert_eq!(d.resolver, Resolver::Ontime);
        assert!(t.ontime_state().is_ontime());
    }

    /// A light task on idle little CPU 0 carrying `attrs`.
    fn grouped(attrs: GroupAttrs) -> Task {
        Task::new(TaskInfo {
            pid: 6,
            util: 100,
            attrs,
            ..Default::default()
        })
    }

    /// Both resolvers have an answer for `t`; the decision comes from
    /// `winner`.
    fn assert_outranks(engine: &Engine, t: &Task, winner: Resolver, loser: Resolver) {
        assert!(engine.resolve(loser, t, 0, None).is_some(), "{} has no answer", loser.name());
        let expected = engine.resolve(winner, t, 0, None);
        let d = engine.wakeup_decision(t, 0, WakeFlags::default(), None).unwrap();
        assert_eq!(d.resolver, winner);
        assert_eq!(Some(d.cpu), expected);
    }

    #[test]
    fn prefer_perf_outranks_group_balance() {
        let (engine, _clock) = big_little_engine();
        let t = grouped(GroupAttrs {
            prefer_perf: true,
            group_balance: true,
            ..Default::default()
        });
        assert_outranks(&engine, &t, Resolver::PreferPerf, Resolver::GroupBalance);
    }

    #[test]
    fn group_balance_outranks_global_boost() {
        let (engine, _clock) = big_little_engine();
        engine.update_boost_request("touch", 100).unwrap();
        let t = grouped(GroupAttrs {
            group_balance: true,
            ..Default::default()
        });
        assert_outranks(&engine, &t, Resolver::GroupBalance, Resolver::GlobalBoost);
    }

    #[test]
    fn global_boost_outranks_prefer_idle() {
        let (engine, _clock) = big_little_engine();
        engine.update_boost_request("touch", 100).unwrap();
        let t = grouped(GroupAttrs {
            prefer_idle: true,
            ..Default::default()
        });
        assert_outranks(&engine, &t, Resolver::GlobalBoost, Resolver::PreferIdle);
        // boosted past the little capacity
        let d = engine.wakeup_decision(&t, 0, WakeFlags::default(), None).unwrap();
        assert!(d.cpu == 2 || d.cpu == 3);
    }

    #[test]
    fn prefer_idle_outranks_energy() {
        let (engine, _clock) = big_little_engine();
        let t = grouped(GroupAttrs {
            prefer_idle: true,
            ..Default::default()
        });
        assert_outranks(&engine, &t, Resolver::PreferIdle, Resolver::Energy);
        assert_eq!(engine.resolve(Resolver::PreferIdle, &t, 0, None), Some(0));
    }

    #[test]
    fn light_task_falls_through_to_energy() {
        let (engine, _clock) = big_little_engine();
        engine.set_cpu_util(0, 200);
        engine.set_cpu_util(1, 100);
        occupy(&engine, 0);
        occupy(&engine, 1);
        let t = sleeper(0, 100);
        let d = engine.wakeup_decision(&t, 0, WakeFlags::default(), None).unwrap();
        assert_eq!(d, WakeupDecision { resolver: Resolver::Energy, cpu: 1 });
    }

    #[test]
    fn proper_resolver_is_the_last_resort() {
        let (engine, _clock) = big_little_engine();
        let engine = engine.with_proper_resolver(Arc::new(Fixed(Some(3))));
        let d = engine.wakeup_decision(&sleeper(0, 0), 0, WakeFlags::default(), None).unwrap();
        assert_eq!(d.resolver, Resolver::Proper);
    }

    #[test]
    fn nothing_applies_means_no_preference() {
        let (engine, _clock) = big_little_engine();
        assert_eq!(engine.select_wakeup_cpu(&sleeper(0, 0), 0, WakeFlags { fork: true }, None), None);
    }

    #[test]
    fn external_resolver_with_unknown_cpu_is_ignored() {
        let (engine, _clock) = big_little_engine();
        let engine = engine.with_service_resolver(Arc::new(Fixed(Some(42))));
        assert_eq!(engine.resolve(Resolver::Service, &sleeper(0, 0), 0, None), None);
    }

    // ── Run-queue primitives ──────────────────────────────────────────────────

    #[test]
    fn enqueue_moves_util_contribution() {
        let (engine, _clock) = big_little_engine();
        let t = spawn_task(&engine, TaskInfo { pid: 1, cpu: 0, util: 200, ..Default::default() });
        assert_eq!(engine.cpus().get(0).util(), 200);
        assert!(!engine.enqueue_task(&t, 0), "already queued");

        assert!(engine.dequeue_task(&t));
        assert_eq!(engine.cpus().get(0).util(), 200, "blocked util stays");
        assert!(engine.cpus().get(0).is_idle());

        assert!(engine.enqueue_task(&t, 2));
        assert_eq!(engine.cpus().get(0).util(), 0);
        assert_eq!(engine.cpus().get(2).util(), 200);
        assert_eq!(t.cpu(), 2);
    }

    #[test]
    fn dequeue_follows_a_task_migrated_while_waiting() {
        let (engine, _clock) = big_little_engine();
        let t = spawn_task(&engine, TaskInfo { pid: 1, cpu: 0, util: 100, ..Default::default() });
        let src = engine.cpus().get(0);
        let dst = engine.cpus().get(2);

        thread::scope(|s| {
            let mut src_rq = src.lock_rq();
            let dequeuer = s.spawn(|| engine.dequeue_task(&t));
            thread::sleep(Duration::from_millis(50));

            // Move the task the way a stopper does while the dequeuer waits.
            let mut dst_rq = dst.lock_rq();
            let moved = src_rq.remove(&t).unwrap();
            dst_rq.push(moved);
            t.set_cpu(2);
            src.sync_nr_running(&src_rq);
            dst.sync_nr_running(&dst_rq);
            drop(dst_rq);
            drop(src_rq);

            assert!(dequeuer.join().unwrap());
        });

        assert!(!t.on_rq());
        assert!(!dst.lock_rq().contains(&t));
        assert_eq!(dst.nr_running(), 0);
    }

    #[test]
    fn set_running_rotates_current_task() {
        let (engine, _clock) = big_little_engine();
        let a = spawn_task(&engine, TaskInfo { pid: 1, ..Default::default() });
        let b = spawn_task(&engine, TaskInfo { pid: 2, ..Default::default() });
        assert!(engine.set_running(&b));
        let rq = engine.cpus().get(0).lock_rq();
        assert!(Arc::ptr_eq(rq.curr.as_ref().unwrap(), &b));
        assert!(Arc::ptr_eq(&rq.queued[0], &a));
    }

    #[test]
    fn exited_task_drops_its_contribution() {
        let (engine, _clock) = big_little_engine();
        let t = spawn_task(&engine, TaskInfo { pid: 1, cpu: 1, util: 150, ..Default::default() });
        engine.task_exit(&t);
        assert_eq!(engine.cpus().get(1).util(), 0);
        assert!(!t.on_rq());
        assert!(!engine.enqueue_task(&t, 1));
    }

    #[test]
    fn capacity_update_moves_lbt_thresholds() {
        let (engine, _clock) = big_little_engine();
        assert_eq!(engine.lbt().threshold(2, 0), Some(819));
        engine.update_cpu_capacity(2, 512);
        assert_eq!(engine.cpus().get(2).capacity(), 512);
        assert_eq!(engine.lbt().threshold(2, 0), Some(409));
        engine.update_cpu_capacity(2, 4096);
        assert_eq!(engine.cpus().get(2).capacity(), 1024);
    }

    #[test]
    fn inactive_cpu_is_never_chosen() {
        let (engine, _clock) = big_little_engine();
        engine.set_active(2, false);
        engine.set_active(3, false);
        let t = Task::new(TaskInfo { pid: 1, load_avg: 900, ..Default::default() });
        assert_eq!(engine.ontime_task_wakeup(&t), None);
        assert_eq!(t.ontime_state(), OntimeState::NotOnTime);
    }

    // ── Administration ────────────────────────────────────────────────────────

    #[test]
    fn rejected_admin_update_keeps_previous_value() {
        let (engine, _clock) = big_little_engine();
        assert!(engine.set_up_threshold(0, 5000).is_err());
        assert_eq!(engine.ontime_conditions().up_threshold(0), 410);
        assert!(engine.set_lbt_ratio(0, 0, 150).is_err());
        assert_eq!(engine.lbt().ratio(0, 0), Some(80));
        engine.set_lbt_ratio(0, 0, 50).unwrap();
        assert_eq!(engine.lbt().threshold(1, 0), Some(256));
    }
}
