/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Platform description loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! clusters:
//!   little:
//!     cpus: [0, 1, 2, 3]
//!     states:
//!       - { cap: 128, power: 30 }
//!       - { cap: 512, power: 190 }
//!   big:
//!     cpus: [4, 5, 6, 7]
//!     states:
//!       - { cap: 256, power: 220 }
//!       - { cap: 1024, power: 1200 }
//! ontime:                 # optional, one entry per boundary, lowest first
//!   - up_threshold: 205
//!     down_threshold: 128
//!     min_residency_us: 8192
//! lbt:                    # optional, one entry per topology level
//!   - cpus: ["0-3", "4-7"]
//!     ratio: [80, 80]
//!   - cpus: ["0-7"]
//!     ratio: [100]
//! global_boost:
//!   boot_boost_duration_us: 40000000
//! sync_hint: true
//! ```
//!
//! Missing ontime values and a missing `lbt` section fall back to the
//! defaults described in [`crate::ontime`] and [`crate::lbt`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::boost::BOOT_BOOST_DURATION_US;
use crate::lbt::LbtLevelSpec;
use crate::ontime::BoundarySpec;
use crate::scheduler::error::TopologyError;
use crate::scheduler::Platform;
use crate::topology::{CapacityState, Cluster, CpuId, CpuMask, Topology};

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlatformFile {
    clusters: BTreeMap<String, ClusterEntry>,
    #[serde(default)]
    ontime: Vec<OntimeEntry>,
    #[serde(default)]
    lbt: Vec<LbtEntry>,
    #[serde(default)]
    global_boost: GlobalBoostEntry,
    #[serde(default = "default_sync_hint")]
    sync_hint: bool,
}

#[derive(Debug, Deserialize)]
struct ClusterEntry {
    cpus: Vec<CpuId>,
    states: Vec<StateEntry>,
}

#[derive(Debug, Deserialize)]
struct StateEntry {
    cap: u64,
    power: u64,
}

#[derive(Debug, Default, Deserialize)]
struct OntimeEntry {
    up_threshold: Option<u64>,
    down_threshold: Option<u64>,
    min_residency_us: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LbtEntry {
    cpus: Vec<String>,
    ratio: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct GlobalBoostEntry {
    #[serde(default = "default_boot_boost_duration_us")]
    boot_boost_duration_us: u64,
}

impl Default for GlobalBoostEntry {
    fn default() -> Self {
        Self {
            boot_boost_duration_us: BOOT_BOOST_DURATION_US,
        }
    }
}

fn default_sync_hint() -> bool {
    true
}

fn default_boot_boost_duration_us() -> u64 {
    BOOT_BOOST_DURATION_US
}

// ── Public data structures ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub name: String,
    pub cpus: Vec<CpuId>,
    pub states: Vec<CapacityState>,
}

/// One LBT topology level: a cpulist per group and its ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbtLevelConfig {
    pub cpus: Vec<String>,
    pub ratio: Vec<u32>,
}

/// Platform description as read from YAML, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub clusters: Vec<ClusterConfig>,
    /// Empty means every boundary uses its defaults.
    pub ontime: Vec<BoundarySpec>,
    /// Empty means the default two-level layout.
    pub lbt: Vec<LbtLevelConfig>,
    pub boot_boost_duration_us: u64,
    pub sync_hint: bool,
}

impl PlatformConfig {
    /// Built-in 4 + 4 big.LITTLE platform used when no file is given.
    pub fn default_config() -> Self {
        let states = |table: &[(u64, u64)]| {
            table
                .iter()
                .map(|&(cap, power)| CapacityState { cap, power })
                .collect()
        };
        Self {
            clusters: vec![
                ClusterConfig {
                    name: "little".to_string(),
                    cpus: vec![0, 1, 2, 3],
                    states: states(&[(128, 30), (256, 70), (384, 120), (512, 190)]),
                },
                ClusterConfig {
                    name: "big".to_string(),
                    cpus: vec![4, 5, 6, 7],
                    states: states(&[(256, 220), (512, 480), (768, 800), (1024, 1200)]),
                },
            ],
            ontime: Vec::new(),
            lbt: Vec::new(),
            boot_boost_duration_us: BOOT_BOOST_DURATION_US,
            sync_hint: true,
        }
    }

    fn from_file(file: PlatformFile) -> Self {
        Self {
            clusters: file
                .clusters
                .into_iter()
                .map(|(name, entry)| ClusterConfig {
                    name,
                    cpus: entry.cpus,
                    states: entry
                        .states
                        .into_iter()
                        .map(|s| CapacityState {
                            cap: s.cap,
                            power: s.power,
                        })
                        .collect(),
                })
                .collect(),
            ontime: file
                .ontime
                .into_iter()
                .map(|o| BoundarySpec {
                    up_threshold: o.up_threshold,
                    down_threshold: o.down_threshold,
                    min_residency_us: o.min_residency_us,
                })
                .collect(),
            lbt: file
                .lbt
                .into_iter()
                .map(|l| LbtLevelConfig {
                    cpus: l.cpus,
                    ratio: l.ratio,
                })
                .collect(),
            boot_boost_duration_us: file.global_boost.boot_boost_duration_us,
            sync_hint: file.sync_hint,
        }
    }

    /// Validate the description and build the engine's [`Platform`].
    pub fn build(&self) -> Result<Platform, TopologyError> {
        let mut clusters = Vec::with_capacity(self.clusters.len());
        for c in &self.clusters {
            let mut cpus = CpuMask::empty();
            for &cpu in &c.cpus {
                if cpu >= CpuMask::MAX_CPUS {
                    return Err(TopologyError::TooManyCpus {
                        count: cpu + 1,
                        max: CpuMask::MAX_CPUS,
                    });
                }
                if cpus.test(cpu) {
                    return Err(TopologyError::DuplicateCpu {
                        cpu,
                        first: c.name.clone(),
                        second: c.name.clone(),
                    });
                }
                cpus.set(cpu);
            }
            clusters.push(Cluster {
                id: 0,
                name: c.name.clone(),
                cpus,
                states: c.states.clone(),
            });
        }
        let topology = Topology::new(clusters)?;

        let levels = if self.lbt.is_empty() {
            LbtLevelSpec::defaults(&topology)
        } else {
            self.lbt
                .iter()
                .enumerate()
                .map(|(level, l)| lbt_level(level, l))
                .collect::<Result<Vec<_>, _>>()?
        };

        Platform::new(
            topology,
            &levels,
            &self.ontime,
            self.boot_boost_duration_us,
            self.sync_hint,
        )
    }
}

fn lbt_level(level: usize, config: &LbtLevelConfig) -> Result<LbtLevelSpec, TopologyError> {
    if config.cpus.len() != config.ratio.len() {
        return Err(TopologyError::LbtLengthMismatch {
            level,
            cpus: config.cpus.len(),
            ratios: config.ratio.len(),
        });
    }
    let groups = config
        .cpus
        .iter()
        .zip(&config.ratio)
        .map(|(list, &ratio)| Ok((CpuMask::parse_cpulist(list)?, ratio)))
        .collect::<Result<Vec<_>, TopologyError>>()?;
    Ok(LbtLevelSpec { groups })
}

// ── PlatformConfigManager ─────────────────────────────────────────────────────

/// Loads and holds the platform description.
#[derive(Debug, Default)]
pub struct PlatformConfigManager {
    config: Option<PlatformConfig>,
}

impl PlatformConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate `path`.
    ///
    /// On any error the previously loaded description (if any) is kept.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// describes an inconsistent platform.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading platform description from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open platform file: {}", path.display()))?;

        let file: PlatformFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let config = PlatformConfig::from_file(file);
        config
            .build()
            .with_context(|| format!("Invalid platform description: {}", path.display()))?;

        for c in &config.clusters {
            debug!(
                cluster = c.name.as_str(),
                cpus = ?c.cpus,
                states = c.states.len(),
                "cluster"
            );
        }
        info!(
            clusters = config.clusters.len(),
            boundaries = config.ontime.len(),
            lbt_levels = config.lbt.len(),
            "platform description loaded"
        );

        self.config = Some(config);
        Ok(())
    }

    /// Returns `true` after a successful [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&PlatformConfig> {
        self.config.as_ref()
    }

    /// The loaded description, or [`PlatformConfig::default_config`].
    pub fn config_or_default(&self) -> PlatformConfig {
        self.config
            .clone()
            .unwrap_or_else(PlatformConfig::default_config)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    const FULL: &str = r#"
clusters:
  big:
    cpus: [2, 3]
    states:
      - { cap: 512, power: 300 }
      - { cap: 1024, power: 800 }
  little:
    cpus: [0, 1]
    states:
      - { cap: 256, power: 40 }
      - { cap: 512, power: 100 }
ontime:
  - up_threshold: 410
    down_threshold: 512
    min_residency_us: 4096
lbt:
  - cpus: ["0-1", "2-3"]
    ratio: [70, 90]
  - cpus: ["0-3"]
    ratio: [100]
global_boost:
  boot_boost_duration_us: 0
sync_hint: false
"#;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_config_builds() {
        let platform = PlatformConfig::default_config().build().unwrap();
        assert_eq!(platform.topology.nr_cpus(), 8);
        assert_eq!(platform.topology.max_capacity(), 1024);
        // 40 % of 512, 50 % of 256
        assert_eq!(platform.ontime.up_threshold(0), 204);
        assert_eq!(platform.ontime.down_threshold(1), 128);
        assert_eq!(platform.lbt.nr_levels(), 2);
        assert!(platform.sync_hint);
    }

    #[test]
    fn manager_starts_unloaded_with_default_fallback() {
        let mgr = PlatformConfigManager::new();
        assert!(!mgr.is_loaded());
        assert!(mgr.config().is_none());
        assert_eq!(mgr.config_or_default(), PlatformConfig::default_config());
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    #[test]
    fn load_full_description() {
        let f = yaml_tempfile(FULL);
        let mut mgr = PlatformConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();
        assert!(mgr.is_loaded());

        let cfg = mgr.config().unwrap();
        assert!(!cfg.sync_hint);
        assert_eq!(cfg.boot_boost_duration_us, 0);
        assert_eq!(cfg.ontime[0].min_residency_us, Some(4096));

        let platform = cfg.build().unwrap();
        assert_eq!(platform.topology.clusters()[0].name, "little");
        assert_eq!(platform.ontime.up_threshold(0), 410);
        assert_eq!(platform.lbt.ratio(0, 0), Some(70));
        assert_eq!(platform.lbt.threshold(3, 0), Some(921));
        assert!(platform.lbt.is_top(1, 1));
    }

    #[test]
    fn optional_sections_take_defaults() {
        let f = yaml_tempfile(
            r#"
clusters:
  little:
    cpus: [0, 1]
    states: [{ cap: 512, power: 100 }]
  big:
    cpus: [2, 3]
    states: [{ cap: 600, power: 300 }, { cap: 1024, power: 800 }]
"#,
        );
        let mut mgr = PlatformConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();
        let cfg = mgr.config().unwrap();
        assert!(cfg.sync_hint);
        assert_eq!(cfg.boot_boost_duration_us, BOOT_BOOST_DURATION_US);

        let platform = cfg.build().unwrap();
        assert_eq!(platform.ontime.up_threshold(0), 204);
        assert_eq!(platform.ontime.down_threshold(1), 300);
        assert_eq!(platform.ontime.min_residency_us(1), 8192);
    }

    #[test]
    fn missing_file_returns_error() {
        let mut mgr = PlatformConfigManager::new();
        assert!(mgr
            .load_from_file(Path::new("/nonexistent/platform.yaml"))
            .is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("clusters: [this is: not valid");
        let mut mgr = PlatformConfigManager::new();
        assert!(mgr.load_from_file(f.path()).is_err());
    }

    #[test]
    fn invalid_platform_keeps_previous_description() {
        let good = yaml_tempfile(FULL);
        let bad = yaml_tempfile(
            r#"
clusters:
  little:
    cpus: [0, 1]
    states: [{ cap: 512, power: 100 }]
  big:
    cpus: [1, 2]
    states: [{ cap: 1024, power: 800 }]
"#,
        );
        let mut mgr = PlatformConfigManager::new();
        mgr.load_from_file(good.path()).unwrap();
        let err = mgr.load_from_file(bad.path()).unwrap_err();
        assert!(format!("{err:#}").contains("CPU 1 is listed in both"));
        assert_eq!(mgr.config().unwrap().boot_boost_duration_us, 0);
    }

    // ── Validation ────────────────────────────────────────────────────────────

    fn with_lbt(levels: Vec<LbtLevelConfig>) -> PlatformConfig {
        PlatformConfig {
            lbt: levels,
            ..PlatformConfig::default_config()
        }
    }

    #[test]
    fn lbt_length_mismatch_is_rejected() {
        let cfg = with_lbt(vec![LbtLevelConfig {
            cpus: vec!["0-3".into(), "4-7".into()],
            ratio: vec![80],
        }]);
        assert_eq!(
            cfg.build().unwrap_err(),
            TopologyError::LbtLengthMismatch { level: 0, cpus: 2, ratios: 1 }
        );
    }

    #[test]
    fn lbt_bad_cpulist_is_rejected() {
        let cfg = with_lbt(vec![LbtLevelConfig {
            cpus: vec!["0-x".into()],
            ratio: vec![80],
        }]);
        assert!(matches!(cfg.build().unwrap_err(), TopologyError::InvalidCpulist(_)));
    }

    #[test]
    fn lbt_level_repeating_previous_span_is_disabled() {
        let cfg = with_lbt(vec![
            LbtLevelConfig {
                cpus: vec!["0-3".into(), "4-7".into()],
                ratio: vec![80, 80],
            },
            LbtLevelConfig {
                cpus: vec!["0-3".into(), "4-7".into()],
                ratio: vec![90, 90],
            },
        ]);
        let platform = cfg.build().unwrap();
        assert_eq!(platform.lbt.ratio(0, 1), None);
        assert_eq!(platform.lbt.threshold(0, 1), None);
    }

    #[test]
    fn out_of_range_cpu_is_rejected() {
        let mut cfg = PlatformConfig::default_config();
        cfg.clusters[1].cpus.push(64);
        assert!(matches!(cfg.build().unwrap_err(), TopologyError::TooManyCpus { .. }));
    }

    #[test]
    fn wrong_boundary_count_is_rejected() {
        let mut cfg = PlatformConfig::default_config();
        cfg.ontime = vec![BoundarySpec::default(); 3];
        assert!(matches!(cfg.build().unwrap_err(), TopologyError::BoundaryCount { .. }));
    }
}
