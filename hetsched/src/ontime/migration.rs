/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Periodic ontime scan and the stopper-side migration transaction.
//!
//! The scan walks every boundary's source cluster looking for a heavy task
//! on a contended CPU.  When it finds one it marks the task `Migrating`,
//! flags both ends of the move, and hands a [`MigrationRequest`] to the
//! source CPU's stopper through a [`MigrationDispatcher`].  The stopper later
//! calls [`Engine::execute_migration`], which re-validates everything under
//! both run-queue locks before moving the task.

use std::sync::{Arc, TryLockError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cpu::RunQueue;
use crate::scheduler::error::DispatchError;
use crate::scheduler::Engine;
use crate::task::{OntimeState, Task};
use crate::topology::{CpuId, CpuMask};

/// Number of queued tasks examined per CPU by the scan.
pub const TASK_TRACK_COUNT: usize = 5;

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// A pending move of `task` from `src_cpu` to `dst_cpu`.
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub src_cpu: CpuId,
    pub dst_cpu: CpuId,
    pub task: Arc<Task>,
    /// Boost-driven moves leave the task `NotOnTime` on arrival.
    pub boost: bool,
}

/// Delivers migration requests to the source CPU's stopper.
pub trait MigrationDispatcher: Send + Sync {
    fn dispatch(&self, req: MigrationRequest) -> Result<(), DispatchError>;
}

/// One unbounded channel per CPU; the receiving halves are driven by
/// [`run_stopper`].
#[derive(Debug)]
pub struct ChannelDispatcher {
    senders: Vec<mpsc::UnboundedSender<MigrationRequest>>,
}

impl ChannelDispatcher {
    pub fn new(nr_cpus: usize) -> (Self, Vec<mpsc::UnboundedReceiver<MigrationRequest>>) {
        let (senders, receivers) = (0..nr_cpus).map(|_| mpsc::unbounded_channel()).unzip();
        (Self { senders }, receivers)
    }
}

impl MigrationDispatcher for ChannelDispatcher {
    fn dispatch(&self, req: MigrationRequest) -> Result<(), DispatchError> {
        let cpu = req.src_cpu;
        self.senders
            .get(cpu)
            .ok_or(DispatchError::NoStopper(cpu))?
            .send(req)
            .map_err(|_| DispatchError::StopperClosed(cpu))
    }
}

/// Stopper loop for `cpu`: executes every request addressed to it until
/// the dispatcher side is dropped.
pub async fn run_stopper(
    cpu: CpuId,
    mut rx: mpsc::UnboundedReceiver<MigrationRequest>,
    engine: Arc<Engine>,
) {
    debug!(cpu, "stopper started");
    while let Some(req) = rx.recv().await {
        engine.execute_migration(cpu, &req);
    }
    debug!(cpu, "stopper stopped");
}

/// Spawn one stopper task per receiver, receiver `i` serving CPU `i`.
pub fn spawn_stoppers(
    engine: &Arc<Engine>,
    receivers: Vec<mpsc::UnboundedReceiver<MigrationRequest>>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(cpu, rx)| tokio::spawn(run_stopper(cpu, rx, Arc::clone(engine))))
        .collect()
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// Why a migration transaction gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The task was no longer marked `Migrating`.
    NotMigrating,
    TaskExited,
    /// The stopper ran on a CPU other than the request's source.
    WrongCpu,
    /// The source CPU no longer had anything else to run.
    SourceNotBusy,
    /// The task left the source run queue before the stopper ran.
    TaskMoved,
    /// Source and destination do not share a domain, or the destination
    /// went offline.
    NoPath,
    /// The task's affinity no longer includes the destination.
    NotAllowed,
}

impl AbortReason {
    pub fn label(self) -> &'static str {
        match self {
            AbortReason::NotMigrating => "not migrating",
            AbortReason::TaskExited => "task exited",
            AbortReason::WrongCpu => "wrong cpu",
            AbortReason::SourceNotBusy => "source not busy",
            AbortReason::TaskMoved => "task moved",
            AbortReason::NoPath => "no path",
            AbortReason::NotAllowed => "not allowed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated { dst_cpu: CpuId, state: OntimeState },
    Aborted(AbortReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Another scan held the scan lock.
    Skipped,
    Completed { dispatched: usize },
}

// ── Engine integration ────────────────────────────────────────────────────────

impl Engine {
    /// Walk every boundary and dispatch at most one migration per source CPU.
    ///
    /// Only one scan runs at a time; a concurrent caller returns
    /// [`ScanOutcome::Skipped`] immediately.
    pub fn run_periodic_migration_scan(&self) -> ScanOutcome {
        let _scan = match self.scan_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                trace!("ontime scan already running");
                return ScanOutcome::Skipped;
            }
        };

        let now = self.clock.now_us();
        let boosted = self.global_boost() > 0;
        let mut dispatched = 0;

        for boundary in self.ontime.boundaries() {
            let clusters = self.topology.clusters();
            let src_cpus = clusters[boundary.src].cpus;
            let dst_cpus = clusters[boundary.dst].cpus;
            let up_threshold = boundary.up_threshold();

            for cpu in src_cpus.and(self.cpus.active_mask()).iter() {
                let slot = self.cpus.get(cpu);
                let rq = slot.lock_rq();

                if slot.active_balance() || rq.curr.is_none() || rq.nr_running() <= 1 {
                    continue;
                }

                let Some(dst_cpu) =
                    self.ontime_select_target_cpu(dst_cpus, self.cpus.active_mask())
                else {
                    continue;
                };

                let Some((task, boost)) =
                    self.pick_heavy_task(&rq, dst_cpus, up_threshold, boosted)
                else {
                    continue;
                };

                task.ontime().state = OntimeState::Migrating {
                    cpu: dst_cpu,
                    since_us: now,
                };
                slot.set_active_balance(true);
                self.cpus.get(dst_cpu).set_migration_target(true);
                drop(rq);

                let req = MigrationRequest {
                    src_cpu: cpu,
                    dst_cpu,
                    task: Arc::clone(&task),
                    boost,
                };
                match self.dispatcher.dispatch(req) {
                    Ok(()) => {
                        debug!(pid = task.pid, src = cpu, dst = dst_cpu, boost, "ontime migration dispatched");
                        dispatched += 1;
                    }
                    Err(e) => {
                        warn!(pid = task.pid, src = cpu, dst = dst_cpu, error = %e, "ontime dispatch failed");
                        task.ontime().state = OntimeState::NotOnTime;
                        slot.set_active_balance(false);
                        self.cpus.get(dst_cpu).set_migration_target(false);
                    }
                }
            }
        }

        ScanOutcome::Completed { dispatched }
    }

    /// Choose the task to move off `rq`.  Returns the task and whether the
    /// move is boost-driven.
    ///
    /// The running task is taken outright under global boost or when its
    /// group prefers performance.  Otherwise the heaviest task at or above
    /// `up_threshold` wins among the running task and the first
    /// [`TASK_TRACK_COUNT`] queued ones, except that a queued prefer-perf
    /// task is taken as soon as it is seen.
    pub(crate) fn pick_heavy_task(
        &self,
        rq: &RunQueue,
        dst_cpus: CpuMask,
        up_threshold: u64,
        boosted: bool,
    ) -> Option<(Arc<Task>, bool)> {
        let curr = rq.curr.as_ref()?;
        if (boosted || self.prefers_perf(curr)) && curr.allowed().intersects(dst_cpus) {
            return Some((Arc::clone(curr), true));
        }

        let mut heaviest: Option<(&Arc<Task>, u64)> = None;
        let load = curr.ontime_load_avg();
        if load >= up_threshold && curr.allowed().intersects(dst_cpus) {
            heaviest = Some((curr, load));
        }

        for task in rq.queued.iter().take(TASK_TRACK_COUNT) {
            if !task.allowed().intersects(dst_cpus) {
                continue;
            }
            if self.prefers_perf(task) {
                return Some((Arc::clone(task), true));
            }
            let load = task.ontime_load_avg();
            if load < up_threshold {
                continue;
            }
            if heaviest.map_or(true, |(_, max)| load > max) {
                heaviest = Some((task, load));
            }
        }

        heaviest.map(|(task, _)| (Arc::clone(task), false))
    }

    /// Stopper-side migration transaction, run on `executing_cpu`.
    ///
    /// Both run queues are locked (lower CPU first) for the whole check and
    /// move.  The source's `active_balance` and the destination's
    /// `migration_target` flags are always cleared.
    pub fn execute_migration(&self, executing_cpu: CpuId, req: &MigrationRequest) -> MigrationOutcome {
        let (src, dst) = (req.src_cpu, req.dst_cpu);
        let task = &req.task;

        if !self.topology.is_valid_cpu(src) || !self.topology.is_valid_cpu(dst) || src == dst {
            warn!(pid = task.pid, src, dst, "malformed migration request");
            return MigrationOutcome::Aborted(AbortReason::NoPath);
        }

        let now = self.clock.now_us();
        let outcome = {
            let (mut src_rq, mut dst_rq) = self.cpus.lock_pair(src, dst);
            let mut ontime = task.ontime();

            let result = self.check_migration(executing_cpu, req, &src_rq, ontime.state);
            let outcome = match result {
                Ok(()) => {
                    if let Some(moved) = src_rq.remove(task) {
                        dst_rq.push(moved);
                    }
                    task.set_cpu(dst);
                    if task.has_contrib() {
                        let util = task.util();
                        self.cpus.get(src).sub_util(util);
                        self.cpus.get(dst).add_util(util);
                    }
                    self.cpus.get(src).sync_nr_running(&src_rq);
                    self.cpus.get(dst).sync_nr_running(&dst_rq);

                    ontime.state = if req.boost {
                        OntimeState::NotOnTime
                    } else {
                        OntimeState::OnTime {
                            cpu: dst,
                            since_us: now,
                        }
                    };
                    MigrationOutcome::Migrated {
                        dst_cpu: dst,
                        state: ontime.state,
                    }
                }
                Err(reason) => {
                    // A state someone else already moved on from is theirs to keep.
                    if reason != AbortReason::NotMigrating {
                        ontime.state = OntimeState::NotOnTime;
                    }
                    MigrationOutcome::Aborted(reason)
                }
            };

            self.cpus.get(src).set_active_balance(false);
            self.cpus.get(dst).set_migration_target(false);
            outcome
        };

        match outcome {
            MigrationOutcome::Migrated { state, .. } => {
                info!(pid = task.pid, src, dst, state = state.label(), "ontime migration");
            }
            MigrationOutcome::Aborted(reason) => {
                debug!(pid = task.pid, src, dst, reason = reason.label(), "ontime migration aborted");
            }
        }
        outcome
    }

    fn check_migration(
        &self,
        executing_cpu: CpuId,
        req: &MigrationRequest,
        src_rq: &RunQueue,
        state: OntimeState,
    ) -> Result<(), AbortReason> {
        let task = &req.task;
        if !state.is_migrating() {
            return Err(AbortReason::NotMigrating);
        }
        if task.has_exited() {
            return Err(AbortReason::TaskExited);
        }
        if executing_cpu != req.src_cpu {
            return Err(AbortReason::WrongCpu);
        }
        if src_rq.nr_running() <= 1 {
            return Err(AbortReason::SourceNotBusy);
        }
        if task.cpu() != req.src_cpu || !src_rq.contains(task) {
            return Err(AbortReason::TaskMoved);
        }
        if !self.topology.shares_domain(req.src_cpu, req.dst_cpu)
            || !self.cpus.get(req.dst_cpu).is_active()
        {
            return Err(AbortReason::NoPath);
        }
        if !task.allows(req.dst_cpu) {
            return Err(AbortReason::NotAllowed);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::{big_little_engine_with, spawn_task, RecordingDispatcher};
    use crate::task::{GroupAttrs, StuneGroup, TaskInfo};

    fn heavy(pid: u32, cpu: CpuId, load_avg: u64) -> TaskInfo {
        TaskInfo {
            pid,
            cpu,
            load_avg,
            util: 300,
            ..Default::default()
        }
    }

    // ── Scan ──────────────────────────────────────────────────────────────────

    #[test]
    fn scan_dispatches_heaviest_queued_task() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        let _light = spawn_task(&engine, heavy(1, 0, 100));
        let mid = spawn_task(&engine, heavy(2, 0, 450));
        let top = spawn_task(&engine, heavy(3, 0, 500));

        assert_eq!(engine.run_periodic_migration_scan(), ScanOutcome::Completed { dispatched: 1 });

        let reqs = recorder.take();
        assert_eq!(reqs.len(), 1);
        assert!(Arc::ptr_eq(&reqs[0].task, &top));
        assert!(!reqs[0].boost);
        assert!(top.ontime_state().is_migrating());
        assert_eq!(mid.ontime_state(), OntimeState::NotOnTime);
        assert!(engine.cpus().get(0).active_balance());
        assert!(engine.cpus().get(reqs[0].dst_cpu).is_migration_target());
    }

    #[test]
    fn scan_skips_cpu_with_single_task() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        let _only = spawn_task(&engine, heavy(1, 0, 900));
        assert_eq!(engine.run_periodic_migration_scan(), ScanOutcome::Completed { dispatched: 0 });
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn scan_skips_cpu_with_pending_balance() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        spawn_task(&engine, heavy(1, 0, 900));
        spawn_task(&engine, heavy(2, 0, 900));
        engine.cpus().get(0).set_active_balance(true);
        assert_eq!(engine.run_periodic_migration_scan(), ScanOutcome::Completed { dispatched: 0 });
    }

    #[test]
    fn prefer_perf_queued_task_wins_outright() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        spawn_task(&engine, heavy(1, 0, 900));
        let perf = spawn_task(
            &engine,
            TaskInfo {
                pid: 2,
                cpu: 0,
                group: StuneGroup::TopApp,
                attrs: GroupAttrs {
                    prefer_perf: true,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        engine.run_periodic_migration_scan();
        let reqs = recorder.take();
        assert!(Arc::ptr_eq(&reqs[0].task, &perf));
        assert!(reqs[0].boost);
    }

    #[test]
    fn failed_dispatch_reverts_flags() {
        let recorder = Arc::new(RecordingDispatcher::failing());
        let (engine, _clock) = big_little_engine_with(recorder);
        spawn_task(&engine, heavy(1, 0, 100));
        let t = spawn_task(&engine, heavy(2, 0, 900));
        assert_eq!(engine.run_periodic_migration_scan(), ScanOutcome::Completed { dispatched: 0 });
        assert_eq!(t.ontime_state(), OntimeState::NotOnTime);
        assert!(!engine.cpus().get(0).active_balance());
        assert!(engine.cpus().iter().all(|s| !s.is_migration_target()));
    }

    #[test]
    fn concurrent_scan_is_skipped() {
        let (engine, _clock) = big_little_engine_with(Arc::new(RecordingDispatcher::default()));
        let _held = engine.scan_lock.lock().unwrap();
        assert_eq!(engine.run_periodic_migration_scan(), ScanOutcome::Skipped);
    }

    // ── Transaction ───────────────────────────────────────────────────────────

    #[test]
    fn migration_moves_task_and_util() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        spawn_task(&engine, heavy(1, 0, 100));
        let t = spawn_task(&engine, heavy(2, 0, 900));
        let util_before = engine.cpus().get(0).util();

        engine.run_periodic_migration_scan();
        let req = recorder.take().remove(0);
        let dst = req.dst_cpu;

        let outcome = engine.execute_migration(0, &req);
        assert!(matches!(outcome, MigrationOutcome::Migrated { dst_cpu, .. } if dst_cpu == dst));
        assert_eq!(t.cpu(), dst);
        assert!(matches!(t.ontime_state(), OntimeState::OnTime { cpu, .. } if cpu == dst));
        assert_eq!(engine.cpus().get(0).util(), util_before - 300);
        assert_eq!(engine.cpus().get(dst).util(), 300);
        assert_eq!(engine.cpus().get(0).nr_running(), 1);
        assert_eq!(engine.cpus().get(dst).nr_running(), 1);
        assert!(!engine.cpus().get(0).active_balance());
        assert!(!engine.cpus().get(dst).is_migration_target());
    }

    #[test]
    fn boost_migration_arrives_not_ontime() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        engine.update_boost_request("launcher", 100).unwrap();
        let curr = spawn_task(&engine, heavy(1, 0, 10));
        spawn_task(&engine, heavy(2, 0, 10));
        engine.run_periodic_migration_scan();
        let req = recorder.take().remove(0);
        assert!(Arc::ptr_eq(&req.task, &curr));
        assert!(req.boost);
        let outcome = engine.execute_migration(0, &req);
        assert!(matches!(outcome, MigrationOutcome::Migrated { state: OntimeState::NotOnTime, .. }));
    }

    #[test]
    fn migration_aborts_when_task_left_source() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        spawn_task(&engine, heavy(1, 0, 100));
        let t = spawn_task(&engine, heavy(2, 0, 900));
        engine.run_periodic_migration_scan();
        let req = recorder.take().remove(0);

        engine.dequeue_task(&t);
        let outcome = engine.execute_migration(0, &req);
        assert_eq!(outcome, MigrationOutcome::Aborted(AbortReason::SourceNotBusy));
        assert_eq!(t.ontime_state(), OntimeState::NotOnTime);
        assert!(!engine.cpus().get(0).active_balance());
        assert!(!engine.cpus().get(req.dst_cpu).is_migration_target());
    }

    #[test]
    fn migration_aborts_on_wrong_cpu_and_exit() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        spawn_task(&engine, heavy(1, 0, 100));
        let t = spawn_task(&engine, heavy(2, 0, 900));
        engine.run_periodic_migration_scan();
        let req = recorder.take().remove(0);

        assert_eq!(engine.execute_migration(1, &req), MigrationOutcome::Aborted(AbortReason::WrongCpu));

        // Abort left the task NotOnTime: a replay finds nothing to do.
        assert_eq!(engine.execute_migration(0, &req), MigrationOutcome::Aborted(AbortReason::NotMigrating));
        assert_eq!(t.cpu(), 0);
    }

    #[test]
    fn migration_aborts_when_affinity_changed() {
        let recorder = Arc::new(RecordingDispatcher::default());
        let (engine, _clock) = big_little_engine_with(recorder.clone());
        spawn_task(&engine, heavy(1, 0, 100));
        let t = spawn_task(&engine, heavy(2, 0, 900));
        engine.run_periodic_migration_scan();
        let req = recorder.take().remove(0);

        t.set_allowed(CpuMask::from_bits(0b0011));
        assert_eq!(engine.execute_migration(0, &req), MigrationOutcome::Aborted(AbortReason::NotAllowed));
    }

    // ── Stoppers ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn channel_stopper_executes_dispatched_request() {
        let (dispatcher, receivers) = ChannelDispatcher::new(4);
        let (engine, _clock) = big_little_engine_with(Arc::new(dispatcher));
        let engine = Arc::new(engine);
        spawn_task(&engine, heavy(1, 0, 100));
        let t = spawn_task(&engine, heavy(2, 0, 900));

        let handles = spawn_stoppers(&engine, receivers);
        assert_eq!(engine.run_periodic_migration_scan(), ScanOutcome::Completed { dispatched: 1 });

        for _ in 0..100 {
            if t.ontime_state().is_ontime() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(t.ontime_state().is_ontime());
        assert!(engine.topology().cluster_id_of(t.cpu()) == 1);

        for h in handles {
            h.abort();
        }
    }

    #[test]
    fn dispatch_to_unknown_cpu_fails() {
        let (dispatcher, _rx) = ChannelDispatcher::new(1);
        let req = MigrationRequest {
            src_cpu: 3,
            dst_cpu: 0,
            task: Arc::new(Task::new(TaskInfo::default())),
            boost: false,
        };
        assert_eq!(dispatcher.dispatch(req).unwrap_err(), DispatchError::NoStopper(3));
    }

    #[test]
    fn dispatch_to_closed_stopper_fails() {
        let (dispatcher, rx) = ChannelDispatcher::new(1);
        drop(rx);
        let req = MigrationRequest {
            src_cpu: 0,
            dst_cpu: 1,
            task: Arc::new(Task::new(TaskInfo::default())),
            boost: false,
        };
        assert_eq!(dispatcher.dispatch(req).unwrap_err(), DispatchError::StopperClosed(0));
    }
}
