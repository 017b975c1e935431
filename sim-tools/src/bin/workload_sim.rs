/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Synthetic workload driver for the placement engine.
//!
//! Workload YAML:
//! ```yaml
//! platform: platform.yaml   # optional, built-in 4+4 layout otherwise
//! duration_ms: 2000
//! tick_us: 1024
//! scan_every_ticks: 4
//! boost:
//!   - { name: touch, prio: 2 }
//! tasks:
//!   - pid: 100
//!     name: render
//!     cpu: 0
//!     util: 450
//!     group: top_app
//!     run_ms: 16
//!     sleep_ms: 4
//!   - pid: 200
//!     name: sync
//!     cpu: 1
//!     util: 80
//!     allowed: "0-3"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use hetsched::clock::ManualClock;
use hetsched::config::{PlatformConfig, PlatformConfigManager};
use hetsched::ontime::migration::{spawn_stoppers, ChannelDispatcher, ScanOutcome};
use hetsched::scheduler::{Engine, WakeFlags};
use hetsched::task::{Task, TaskInfo};
use hetsched::topology::{ClusterId, CpuMask};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "workload-sim", about = "Drive the hetsched engine with a synthetic workload")]
struct Cli {
    /// Workload description (YAML).
    #[arg(short = 'w', long = "workload")]
    workload: PathBuf,

    /// Platform description; overrides the workload's `platform` entry.
    #[arg(short = 'p', long = "platform")]
    platform: Option<PathBuf>,
}

// ── Workload file ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Workload {
    platform: Option<PathBuf>,
    #[serde(default = "default_duration_ms")]
    duration_ms: u64,
    #[serde(default = "default_tick_us")]
    tick_us: u64,
    #[serde(default = "default_scan_every_ticks")]
    scan_every_ticks: u64,
    #[serde(default)]
    boost: Vec<BoostEntry>,
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct BoostEntry {
    name: String,
    prio: u32,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    #[serde(flatten)]
    info: TaskInfo,
    /// Cpulist; every CPU when absent.
    allowed: Option<String>,
    /// Running phase length; 0 with `sleep_ms: 0` means always runnable.
    #[serde(default)]
    run_ms: u64,
    #[serde(default)]
    sleep_ms: u64,
}

fn default_duration_ms() -> u64 {
    1000
}

fn default_tick_us() -> u64 {
    1024
}

fn default_scan_every_ticks() -> u64 {
    4
}

fn load_workload(path: &Path) -> Result<Workload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot open workload file: {}", path.display()))?;
    let workload: Workload = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
    if workload.tick_us == 0 {
        bail!("tick_us must be positive");
    }
    if workload.tasks.is_empty() {
        bail!("workload has no tasks");
    }
    Ok(workload)
}

// ── Simulation state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Phase {
    Running { left_us: u64 },
    Sleeping { left_us: u64 },
}

struct SimTask {
    task: Arc<Task>,
    run_us: u64,
    sleep_us: u64,
    phase: Phase,
    cluster: ClusterId,
    cluster_switches: u64,
    /// Runnable time per cluster.
    runnable_us: Vec<u64>,
}

#[derive(Debug, Default)]
struct Stats {
    wakeups: u64,
    no_preference: u64,
    by_resolver: BTreeMap<&'static str, u64>,
    scans: u64,
    scans_skipped: u64,
    dispatched: u64,
    hints: u64,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("workload-sim failed: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let workload = load_workload(&cli.workload)?;

    let platform_path = cli.platform.or_else(|| workload.platform.clone());
    let config = match platform_path {
        Some(path) => {
            let mut manager = PlatformConfigManager::new();
            manager.load_from_file(&path)?;
            manager.config_or_default()
        }
        None => {
            warn!("No platform description given, using the built-in 4+4 layout");
            PlatformConfig::default_config()
        }
    };
    let platform = config.build().context("Invalid platform description")?;

    let nr_cpus = platform.topology.nr_cpus();
    let nr_clusters = platform.topology.clusters().len();
    let clock = Arc::new(ManualClock::new(0));
    let (dispatcher, receivers) = ChannelDispatcher::new(nr_cpus);
    let engine = Arc::new(Engine::new(platform, Arc::new(dispatcher), clock.clone()));
    let stoppers = spawn_stoppers(&engine, receivers);

    for b in &workload.boost {
        engine
            .update_boost_request(&b.name, b.prio)
            .with_context(|| format!("Invalid boost request '{}'", b.name))?;
    }

    let mut stats = Stats::default();
    let mut tasks = Vec::with_capacity(workload.tasks.len());
    for entry in workload.tasks {
        tasks.push(admit(&engine, entry, nr_clusters, &mut stats)?);
    }

    let tick = workload.tick_us;
    let nr_ticks = workload.duration_ms * 1000 / tick;
    info!(tasks = tasks.len(), nr_ticks, tick_us = tick, "simulation starting");

    for n in 1..=nr_ticks {
        clock.advance(tick);
        let mut hint = false;

        for t in &mut tasks {
            hint |= engine.record_tick(&t.task, tick);
            step(&engine, t, tick, &mut stats);
        }
        if hint {
            stats.hints += 1;
        }

        if hint || n % workload.scan_every_ticks.max(1) == 0 {
            stats.scans += 1;
            match engine.run_periodic_migration_scan() {
                ScanOutcome::Skipped => stats.scans_skipped += 1,
                ScanOutcome::Completed { dispatched } => {
                    stats.dispatched += dispatched as u64;
                    if dispatched > 0 {
                        settle(&tasks).await;
                    }
                }
            }
        }
    }

    for handle in stoppers {
        handle.abort();
    }

    report(&engine, &tasks, &stats);
    Ok(())
}

/// Create the task and give it its first placement.
fn admit(engine: &Engine, entry: TaskEntry, nr_clusters: usize, stats: &mut Stats) -> Result<SimTask> {
    let mut info = entry.info;
    if !engine.topology().is_valid_cpu(info.cpu) {
        bail!("task {} starts on unknown cpu {}", info.pid, info.cpu);
    }
    if let Some(list) = &entry.allowed {
        let mask = CpuMask::parse_cpulist(list)
            .with_context(|| format!("Invalid cpulist for task {}", info.pid))?;
        info.allowed = Some(mask);
    }

    let task = Arc::new(Task::new(info));
    let prev = task.cpu();
    let cpu = wake(engine, &task, prev, WakeFlags { fork: true }, stats);
    engine.enqueue_task(&task, cpu);

    let run_us = entry.run_ms * 1000;
    Ok(SimTask {
        cluster: engine.topology().cluster_id_of(cpu),
        task,
        run_us,
        sleep_us: entry.sleep_ms * 1000,
        phase: Phase::Running { left_us: run_us },
        cluster_switches: 0,
        runnable_us: vec![0; nr_clusters],
    })
}

fn wake(engine: &Engine, task: &Task, prev: usize, flags: WakeFlags, stats: &mut Stats) -> usize {
    stats.wakeups += 1;
    match engine.wakeup_decision(task, prev, flags, None) {
        Some(d) if task.allows(d.cpu) => {
            *stats.by_resolver.entry(d.resolver.name()).or_default() += 1;
            d.cpu
        }
        _ => {
            stats.no_preference += 1;
            prev
        }
    }
}

/// Advance one task by `tick` microseconds.
fn step(engine: &Engine, t: &mut SimTask, tick: u64, stats: &mut Stats) {
    let cluster = engine.topology().cluster_id_of(t.task.cpu());
    if cluster != t.cluster {
        t.cluster_switches += 1;
        t.cluster = cluster;
    }

    t.phase = match t.phase {
        Phase::Running { left_us } => {
            t.runnable_us[cluster] += tick;
            if t.sleep_us == 0 {
                Phase::Running { left_us }
            } else if left_us <= tick {
                engine.dequeue_task(&t.task);
                Phase::Sleeping { left_us: t.sleep_us }
            } else {
                Phase::Running { left_us: left_us - tick }
            }
        }
        Phase::Sleeping { left_us } if left_us <= tick => {
            let prev = t.task.cpu();
            let cpu = wake(engine, &t.task, prev, WakeFlags::default(), stats);
            engine.enqueue_task(&t.task, cpu);
            debug!(pid = t.task.pid, prev, cpu, "woken");
            Phase::Running { left_us: t.run_us }
        }
        Phase::Sleeping { left_us } => Phase::Sleeping { left_us: left_us - tick },
    };
}

/// Give the stoppers a chance to finish every in-flight migration.
async fn settle(tasks: &[SimTask]) {
    for _ in 0..64 {
        if !tasks.iter().any(|t| t.task.ontime_state().is_migrating()) {
            return;
        }
        tokio::task::yield_now().await;
    }
    warn!("migrations still in flight after settling");
}

fn report(engine: &Engine, tasks: &[SimTask], stats: &Stats) {
    info!("── Wakeups ─────────────────────────────────────────");
    info!("  total={} no_preference={}", stats.wakeups, stats.no_preference);
    for (name, count) in &stats.by_resolver {
        info!("  {:<18} {}", name, count);
    }

    info!("── Ontime scan ─────────────────────────────────────");
    info!(
        "  scans={} skipped={} dispatched={} tick_hints={}",
        stats.scans, stats.scans_skipped, stats.dispatched, stats.hints
    );

    info!("── Tasks ───────────────────────────────────────────");
    let names: Vec<&str> = engine
        .topology()
        .clusters()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    for t in tasks {
        let residency: Vec<String> = names
            .iter()
            .zip(&t.runnable_us)
            .map(|(name, us)| format!("{}={}ms", name, us / 1000))
            .collect();
        info!(
            "  [{pid}] {name:<12} cpu={cpu} load={load} state={state} switches={sw} {res}",
            pid = t.task.pid,
            name = t.task.name,
            cpu = t.task.cpu(),
            load = t.task.ontime_load_avg(),
            state = t.task.ontime_state().label(),
            sw = t.cluster_switches,
            res = residency.join(" "),
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
