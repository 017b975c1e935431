/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use hetsched::clock::MonotonicClock;
use hetsched::config::{PlatformConfig, PlatformConfigManager};
use hetsched::ontime::migration::{spawn_stoppers, ChannelDispatcher};
use hetsched::scheduler::{Engine, WakeFlags};
use hetsched::task::{Task, TaskInfo};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Load a platform description, report the derived thresholds and optionally
/// place one sample task.
///
/// Example:
///   hetsched --config platform.yaml --boot-boost-us 0 --task-util 450 --task-cpu 1
#[derive(Debug, Parser)]
#[command(
    name = "hetsched",
    about = "Heterogeneous CPU placement engine – platform inspector",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML platform description.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Utilisation of the sample task; nothing is placed without it.
    #[arg(long = "task-util")]
    task_util: Option<u64>,

    /// Ontime load average the sample task starts with.
    #[arg(long = "task-load", default_value_t = 0)]
    task_load: u64,

    /// CPU the sample task last ran on.
    #[arg(long = "task-cpu", default_value_t = 0)]
    task_cpu: usize,

    /// Pid reported for the sample task.
    #[arg(long = "task-pid", default_value_t = 1)]
    task_pid: u32,

    /// Boot-time global boost window in microseconds; 0 disables it.
    /// Overrides the platform description.
    #[arg(long = "boot-boost-us")]
    boot_boost_us: Option<u64>,
}

impl Cli {
    /// The platform description with command-line overrides applied.
    fn platform_config(&self, manager: &PlatformConfigManager) -> PlatformConfig {
        let mut config = manager.config_or_default();
        if let Some(us) = self.boot_boost_us {
            config.boot_boost_duration_us = us;
        }
        config
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(config = ?cli.config, task_util = ?cli.task_util, "hetsched starting up");

    // ── Load platform description ─────────────────────────────────────────────
    let mut manager = PlatformConfigManager::new();
    match &cli.config {
        Some(path) => {
            if let Err(e) = manager.load_from_file(path) {
                error!("Failed to load platform description: {:#}", e);
                process::exit(1);
            }
        }
        None => warn!("No platform description provided, using the built-in 4+4 layout"),
    }

    let config = cli.platform_config(&manager);
    info!(boot_boost_us = config.boot_boost_duration_us, "boot boost window");
    let platform = match config.build() {
        Ok(p) => p,
        Err(e) => {
            error!("Invalid platform description: {}", e);
            process::exit(1);
        }
    };

    // ── Engine + stoppers ─────────────────────────────────────────────────────
    let nr_cpus = platform.topology.nr_cpus();
    let (dispatcher, receivers) = ChannelDispatcher::new(nr_cpus);
    let engine = Arc::new(Engine::new(
        platform,
        Arc::new(dispatcher),
        Arc::new(MonotonicClock::new()),
    ));
    let stoppers = spawn_stoppers(&engine, receivers);

    report(&engine);

    if let Some(util) = cli.task_util {
        if !engine.topology().is_valid_cpu(cli.task_cpu) {
            error!("Sample cpu {} does not exist", cli.task_cpu);
            process::exit(1);
        }
        let task = Arc::new(Task::new(TaskInfo {
            pid: cli.task_pid,
            name: "sample".to_string(),
            cpu: cli.task_cpu,
            util,
            load_avg: cli.task_load,
            ..Default::default()
        }));
        engine.enqueue_task(&task, cli.task_cpu);
        engine.dequeue_task(&task);

        match engine.wakeup_decision(&task, cli.task_cpu, WakeFlags::default(), None) {
            Some(d) => info!(
                "Sample pid={} util={} load={} → cpu {} ({})",
                task.pid,
                util,
                cli.task_load,
                d.cpu,
                d.resolver.name()
            ),
            None => info!("Sample pid={} util={} → no preference", task.pid, util),
        }
    }

    for handle in stoppers {
        handle.abort();
    }
}

fn report(engine: &Engine) {
    let topology = engine.topology();
    info!("Platform: {} cpu(s), {} cluster(s)", topology.nr_cpus(), topology.clusters().len());
    for cluster in topology.clusters() {
        let states: Vec<String> = cluster
            .states
            .iter()
            .map(|s| format!("{}@{}", s.cap, s.power))
            .collect();
        info!(
            "  [{name}]  cpus={cpus}  capacity={cap}  states={states}",
            name = cluster.name,
            cpus = cluster.cpus,
            cap = cluster.capacity_orig(),
            states = states.join(" "),
        );
    }

    for b in engine.ontime_conditions().boundaries() {
        info!(
            "  ontime {} → {}: up={} down={} min_residency={}us",
            b.src,
            b.dst,
            b.up_threshold(),
            b.down_threshold(),
            b.min_residency_us()
        );
    }

    let lbt = engine.lbt();
    for cpu in 0..topology.nr_cpus() {
        let levels: Vec<String> = (0..lbt.nr_levels())
            .map(|level| match lbt.threshold(cpu, level) {
                Some(t) => t.to_string(),
                None => "-".to_string(),
            })
            .collect();
        info!("  lbt cpu{}: {}", cpu, levels.join(" / "));
    }

    info!("  global boost max={}", engine.boost().max_value());
}

// ── Tests ─────────────────────────────────────────────────────────────────────
