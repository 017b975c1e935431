/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! hetsched – task placement and ontime migration for heterogeneous CPUs
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── topology/       – clusters, capacity states, CPU masks
//! ├── config/         – YAML platform description
//! ├── task            – task attributes and ontime state
//! ├── cpu             – run queues and per-CPU dynamic state
//! ├── util            – CPU utilisation estimates
//! ├── clock           – monotonic time source (manual clock for tests)
//! ├── lbt             – multi-level over-utilisation thresholds
//! ├── boost           – global boost and service requests
//! ├── ontime/         – ontime load tracking, wakeup and migration
//! └── scheduler/      – engine, wakeup cascade, energy and resolvers
//! ```

pub mod boost;
pub mod clock;
pub mod config;
pub mod cpu;
pub mod lbt;
pub mod ontime;
pub mod scheduler;
pub mod task;
pub mod topology;
pub mod util;
