/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Capacity / energy model.
//!
//! A [`Topology`] is the immutable description of the platform: which CPUs
//! exist, how they are grouped into clusters and what (capacity, power)
//! operating points each cluster offers.  It is built once, validated, and
//! then shared read-only (`Arc<Topology>`) by every decision path, so readers
//! never take a lock.
//!
//! Clusters are stored in ascending capacity order and their [`ClusterId`] is
//! their position in that order.  "Next cluster up" is therefore `id + 1`.

pub mod cpumask;

pub use cpumask::CpuMask;

use crate::scheduler::error::TopologyError;

// ── Constants ─────────────────────────────────────────────────────────────────

pub const SCHED_CAPACITY_SHIFT: u32 = 10;

/// Capacity of the fastest possible CPU at its highest operating point.
pub const SCHED_CAPACITY_SCALE: u64 = 1 << SCHED_CAPACITY_SHIFT;

pub type CpuId = usize;

/// Position of a cluster in ascending capacity order.
pub type ClusterId = usize;

// ── Cluster ───────────────────────────────────────────────────────────────────

/// One discrete operating point of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityState {
    pub cap: u64,
    pub power: u64,
}

/// A set of CPUs sharing one capacity/power table.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub cpus: CpuMask,
    /// Operating points, strictly ascending in capacity.
    pub states: Vec<CapacityState>,
}

impl Cluster {
    /// Maximum capacity of any CPU in this cluster.
    pub fn capacity_orig(&self) -> u64 {
        self.states.last().map(|s| s.cap).unwrap_or(0)
    }

    /// Capacity of the lowest operating point.
    pub fn min_capacity(&self) -> u64 {
        self.states.first().map(|s| s.cap).unwrap_or(0)
    }

    /// Index of the first state able to carry `util`, or the highest state
    /// when none can.
    pub fn state_index_for(&self, util: u64) -> usize {
        self.states
            .iter()
            .position(|s| s.cap >= util)
            .unwrap_or(self.states.len().saturating_sub(1))
    }

    /// Operating point the cluster would run at to carry `util`.
    pub fn find_state(&self, util: u64) -> CapacityState {
        self.states[self.state_index_for(util)]
    }
}

// ── Topology ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Topology {
    clusters: Vec<Cluster>,
    /// `cpu → cluster id`, precomputed so lookups are O(1).
    cpu_cluster: Vec<ClusterId>,
    /// Second-highest distinct original capacity (0 on single-cluster parts).
    second_max_capacity: u64,
}

impl Topology {
    /// Validate `clusters` and build the topology.
    ///
    /// The input order does not matter; clusters are re-sorted by capacity
    /// and renumbered.  Every CPU id in `0..n` must belong to exactly one
    /// cluster.
    pub fn new(mut clusters: Vec<Cluster>) -> Result<Self, TopologyError> {
        if clusters.is_empty() {
            return Err(TopologyError::NoClusters);
        }

        for cluster in &clusters {
            if cluster.cpus.is_empty() {
                return Err(TopologyError::EmptyCluster {
                    cluster: cluster.name.clone(),
                });
            }
            if cluster.states.is_empty() {
                return Err(TopologyError::NoCapacityStates {
                    cluster: cluster.name.clone(),
                });
            }
            for (index, state) in cluster.states.iter().enumerate() {
                if state.cap == 0 || state.cap > SCHED_CAPACITY_SCALE {
                    return Err(TopologyError::CapacityOutOfRange {
                        cluster: cluster.name.clone(),
                        index,
                        cap: state.cap,
                    });
                }
                if index > 0 && cluster.states[index - 1].cap >= state.cap {
                    return Err(TopologyError::StatesNotAscending {
                        cluster: cluster.name.clone(),
                        index,
                    });
                }
            }
        }

        clusters.sort_by_key(|c| c.capacity_orig());
        for pair in clusters.windows(2) {
            if pair[0].capacity_orig() == pair[1].capacity_orig() {
                return Err(TopologyError::DuplicateCapacity {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                    cap: pair[0].capacity_orig(),
                });
            }
        }

        for (id, cluster) in clusters.iter_mut().enumerate() {
            cluster.id = id;
        }

        let mut owner: Vec<Option<ClusterId>> = vec![None; CpuMask::MAX_CPUS];
        for cluster in &clusters {
            for cpu in cluster.cpus.iter() {
                if let Some(prev) = owner[cpu] {
                    return Err(TopologyError::DuplicateCpu {
                        cpu,
                        first: clusters[prev].name.clone(),
                        second: cluster.name.clone(),
                    });
                }
                owner[cpu] = Some(cluster.id);
            }
        }

        // CPU ids are dense, so the highest id fixes the CPU count.
        let nr_cpus = clusters
            .iter()
            .filter_map(|c| c.cpus.last())
            .max()
            .map_or(0, |last| last + 1);

        let mut cpu_cluster = Vec::with_capacity(nr_cpus);
        for (cpu, slot) in owner.iter().enumerate().take(nr_cpus) {
            match slot {
                Some(id) => cpu_cluster.push(*id),
                None => return Err(TopologyError::MissingCpu { cpu }),
            }
        }

        let second_max_capacity = if clusters.len() >= 2 {
            clusters[clusters.len() - 2].capacity_orig()
        } else {
            0
        };

        Ok(Self {
            clusters,
            cpu_cluster,
            second_max_capacity,
        })
    }

    pub fn nr_cpus(&self) -> usize {
        self.cpu_cluster.len()
    }

    pub fn possible_mask(&self) -> CpuMask {
        CpuMask::first_n(self.nr_cpus())
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id)
    }

    /// Cluster id of `cpu`.
    ///
    /// # Panics
    /// Panics if `cpu` is out of range; callers validate CPU ids at the
    /// engine boundary.
    pub fn cluster_id_of(&self, cpu: CpuId) -> ClusterId {
        self.cpu_cluster[cpu]
    }

    pub fn cluster_of(&self, cpu: CpuId) -> &Cluster {
        &self.clusters[self.cpu_cluster[cpu]]
    }

    /// All CPUs sharing `cpu`'s cluster (the "coregroup").
    pub fn coregroup_mask(&self, cpu: CpuId) -> CpuMask {
        self.cluster_of(cpu).cpus
    }

    pub fn capacity_orig_of(&self, cpu: CpuId) -> u64 {
        self.cluster_of(cpu).capacity_orig()
    }

    pub fn lowest_cluster(&self) -> &Cluster {
        &self.clusters[0]
    }

    pub fn highest_cluster(&self) -> &Cluster {
        &self.clusters[self.clusters.len() - 1]
    }

    /// The cluster immediately above `id` in capacity order.
    pub fn next_cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(id + 1)
    }

    /// Largest original capacity on the platform.
    pub fn max_capacity(&self) -> u64 {
        self.highest_cluster().capacity_orig()
    }

    pub fn second_max_capacity(&self) -> u64 {
        self.second_max_capacity
    }

    pub fn is_valid_cpu(&self, cpu: CpuId) -> bool {
        cpu < self.nr_cpus()
    }

    /// Returns `true` if some scheduling domain spans both CPUs.
    ///
    /// Every topology has a system-wide top domain, so this only fails for
    /// ids outside the platform.
    pub fn shares_domain(&self, a: CpuId, b: CpuId) -> bool {
        self.is_valid_cpu(a) && self.is_valid_cpu(b)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
