/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the placement engine.
//!
//! Three error enums model the three places where the engine can refuse
//! something:
//!
//! * [`TopologyError`] — the platform description is structurally
//!   inconsistent and no engine can be built from it.
//! * [`AdminError`] — an administrative update was rejected.  The previous
//!   value stays in effect.
//! * [`DispatchError`] — a migration message could not be delivered to the
//!   source CPU's stopper.
//!
//! Wakeup and tick decisions never fail: "no preference" is `None`, not an
//! error.

use thiserror::Error;

use crate::topology::{ClusterId, CpuId};

// ── Platform construction ─────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The platform declares no clusters at all.
    #[error("platform has no clusters")]
    NoClusters,

    #[error("cluster '{cluster}' has no CPUs")]
    EmptyCluster { cluster: String },

    #[error("cluster '{cluster}' has no capacity states")]
    NoCapacityStates { cluster: String },

    /// Capacity states must be listed lowest first, without repeats.
    #[error("cluster '{cluster}' capacity states are not strictly ascending at index {index}")]
    StatesNotAscending { cluster: String, index: usize },

    #[error("cluster '{cluster}' state {index} capacity {cap} exceeds the capacity scale")]
    CapacityOutOfRange {
        cluster: String,
        index: usize,
        cap: u64,
    },

    /// Two clusters share the same maximum capacity so they cannot be ordered.
    #[error("clusters '{first}' and '{second}' have the same capacity {cap}")]
    DuplicateCapacity {
        first: String,
        second: String,
        cap: u64,
    },

    #[error("CPU {cpu} is listed in both '{first}' and '{second}'")]
    DuplicateCpu {
        cpu: CpuId,
        first: String,
        second: String,
    },

    /// CPU ids must be dense: every id in `0..n` belongs to some cluster.
    #[error("CPU {cpu} does not belong to any cluster")]
    MissingCpu { cpu: CpuId },

    #[error("platform declares {count} CPUs, at most {max} are supported")]
    TooManyCpus { count: usize, max: usize },

    #[error("invalid cpulist '{0}'")]
    InvalidCpulist(String),

    #[error("ontime declares {given} boundaries but the platform has {expected}")]
    BoundaryCount { given: usize, expected: usize },

    #[error("ontime boundary {boundary}: {field} {value} exceeds the capacity scale")]
    ThresholdOutOfRange {
        boundary: usize,
        field: &'static str,
        value: u64,
    },

    #[error("lbt level {level}: {cpus} cpulists but {ratios} ratios")]
    LbtLengthMismatch {
        level: usize,
        cpus: usize,
        ratios: usize,
    },

    #[error("lbt level {level}: ratio {ratio} is outside 0..=100")]
    LbtRatioOutOfRange { level: usize, ratio: u32 },

    #[error("lbt level {level}: span '{span}' selects no CPU")]
    LbtEmptySpan { level: usize, span: String },

    #[error("lbt level {level}: CPU {cpu} is not covered")]
    LbtCpuNotCovered { level: usize, cpu: CpuId },

    #[error("lbt level {level}: CPU {cpu} is covered more than once")]
    LbtCpuOverlap { level: usize, cpu: CpuId },
}

// ── Administrative updates ────────────────────────────────────────────────────

/// Why an administrative update was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("no ontime boundary with index {0}")]
    UnknownBoundary(usize),

    #[error("{field} {value} exceeds the capacity scale ({max})")]
    ThresholdOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("no lbt level {0}")]
    UnknownLevel(usize),

    #[error("no CPU {0}")]
    UnknownCpu(CpuId),

    #[error("no cluster {0}")]
    UnknownCluster(ClusterId),

    #[error("lbt ratio {0} is outside 0..=100")]
    RatioOutOfRange(u32),

    /// The level duplicates its parent's span for this CPU and is switched
    /// off; its ratio cannot be tuned.
    #[error("lbt level {level} is disabled for CPU {cpu}")]
    LevelDisabled { level: usize, cpu: CpuId },

    #[error("boost request '{name}' value {value} is outside 0..=100")]
    BoostOutOfRange { name: String, value: u32 },
}

// ── Migration dispatch ────────────────────────────────────────────────────────

/// Why a migration transaction could not be handed to a stopper.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no stopper registered for CPU {0}")]
    NoStopper(CpuId),

    /// The stopper's receiving half has been dropped.
    #[error("stopper for CPU {0} has shut down")]
    StopperClosed(CpuId),
}
