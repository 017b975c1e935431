/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-point decayed load tracking.
//!
//! Time is cut into 1024 µs periods.  A contribution made `n` periods ago is
//! weighted by `y^n` with `y^32 = 0.5`, so a task that ran continuously
//! converges to `load_avg ≈ cpu capacity` and one that stopped halves every
//! 32 ms.  All arithmetic is integer; `y^n` comes from a 32-entry table in
//! 0.32 fixed point.

use crate::topology::SCHED_CAPACITY_SHIFT;

/// Upper bound of the geometric series `1024 * Σ y^n` after truncation.
pub const LOAD_AVG_MAX: u64 = 47742;

/// Number of periods after which a contribution has halved.
pub const LOAD_AVG_PERIOD: u64 = 32;

/// Length of one accumulation period in µs.
pub const PERIOD_US: u64 = 1024;

/// `y^n * 2^32` for `n` in `0..32`.
const RUNNABLE_AVG_YN_INV: [u32; LOAD_AVG_PERIOD as usize] = [
    0xffff_ffff, 0xfa83_b2da, 0xf525_7d14, 0xefe4_b99a, 0xeac0_c6e6, 0xe5b9_06e6, 0xe0cc_deeb,
    0xdbfb_b796, 0xd744_fcc9, 0xd2a8_1d91, 0xce24_8c14, 0xc9b9_bd85, 0xc567_2a10, 0xc12c_4cc9,
    0xbd08_a39e, 0xb8fb_af46, 0xb504_f333, 0xb123_f581, 0xad58_3ee9, 0xa9a1_5ab4, 0xa5fe_d6a9,
    0xa270_4302, 0x9ef5_325f, 0x9b8d_39b9, 0x9837_f050, 0x94f4_efa8, 0x91c3_d373, 0x8ea4_398a,
    0x8b95_c1e3, 0x8898_0e80, 0x85aa_c367, 0x82cd_8698,
];

/// Decay `val` by `n` periods: `val * y^n`.
pub fn decay_load(mut val: u64, mut n: u64) -> u64 {
    if n > LOAD_AVG_PERIOD * 63 {
        return 0;
    }
    if n >= LOAD_AVG_PERIOD {
        val >>= n / LOAD_AVG_PERIOD;
        n %= LOAD_AVG_PERIOD;
    }
    let factor = u128::from(RUNNABLE_AVG_YN_INV[n as usize]);
    ((u128::from(val) * factor) >> 32) as u64
}

/// Contribution of an update that crossed `periods` boundaries.
///
/// `d1` is the remainder of the period that was open at the last update,
/// `d3` the part of the period that is open now; everything in between is
/// full periods.
pub fn accumulate_segments(periods: u64, d1: u32, d3: u32) -> u32 {
    let c1 = decay_load(u64::from(d1), periods);
    let c2 = LOAD_AVG_MAX
        .saturating_sub(decay_load(LOAD_AVG_MAX, periods))
        .saturating_sub(PERIOD_US);
    (c1 + c2 + u64::from(d3)) as u32
}

#[inline]
fn cap_scale(v: u64, scale: u64) -> u64 {
    (v * scale) >> SCHED_CAPACITY_SHIFT
}

// ── OntimeAvg ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OntimeAvg {
    pub load_sum: u64,
    pub load_avg: u64,
    /// µs already accumulated in the currently open period.
    pub period_contrib: u32,
}

impl OntimeAvg {
    /// A tracker that already reports `load_avg`.
    pub fn with_load(load_avg: u64) -> Self {
        Self {
            load_sum: load_avg * (LOAD_AVG_MAX - PERIOD_US),
            load_avg,
            period_contrib: 0,
        }
    }

    /// Load inherited by a freshly forked child.
    pub fn inherit(parent: &OntimeAvg) -> Self {
        Self {
            load_sum: parent.load_sum,
            load_avg: parent.load_avg,
            period_contrib: 1023,
        }
    }

    /// Account `delta_us` of wall time.
    ///
    /// `running` says whether the task was runnable during the interval;
    /// `scale_freq` and `scale_cpu` are the current frequency and CPU
    /// capacity factors (1024 = full).  Returns `true` when at least one period
    /// boundary was crossed and `load_avg` was recomputed.
    pub fn update(&mut self, delta_us: u64, running: bool, scale_freq: u64, scale_cpu: u64) -> bool {
        let mut delta = delta_us.saturating_add(u64::from(self.period_contrib));
        let periods = delta / PERIOD_US;
        let mut contrib = delta_us.min(u64::from(u32::MAX));

        if periods > 0 {
            self.load_sum = decay_load(self.load_sum, periods);
            delta %= PERIOD_US;
            contrib = u64::from(accumulate_segments(
                periods,
                PERIOD_US as u32 - self.period_contrib,
                delta as u32,
            ));
        }
        self.period_contrib = delta as u32;

        if running {
            self.load_sum += cap_scale(contrib, scale_freq) * scale_cpu;
        }

        if periods == 0 {
            return false;
        }

        self.load_avg = self.load_sum / (LOAD_AVG_MAX - PERIOD_US + u64::from(self.period_contrib));
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_halves_every_32_periods() {
        assert_eq!(decay_load(1024, 0), 1023);
        // Whole half-lives are a shift; y^0 in 0.32 fixed point truncates by one.
        let half = decay_load(1 << 20, 32);
        assert_eq!(half, (1 << 19) - 1);
    }

    #[test]
    fn decay_vanishes_after_long_idle() {
        assert_eq!(decay_load(LOAD_AVG_MAX * 1024, 63 * 32 + 1), 0);
    }

    #[test]
    fn single_period_adds_no_full_segments() {
        // One boundary crossed: only the decayed remainder plus the open part.
        let c = accumulate_segments(1, 1024, 0);
        assert_eq!(u64::from(c), decay_load(1024, 1));
    }

    #[test]
    fn sub_period_update_does_not_recompute_avg() {
        let mut avg = OntimeAvg::default();
        assert!(!avg.update(500, true, 1024, 1024));
        assert_eq!(avg.load_avg, 0);
        assert_eq!(avg.period_contrib, 500);
        assert!(avg.load_sum > 0);
    }

    #[test]
    fn continuous_running_converges_to_capacity() {
        let mut avg = OntimeAvg::default();
        for _ in 0..2000 {
            avg.update(1024, true, 1024, 1024);
        }
        assert!(
            (1000..=1040).contains(&avg.load_avg),
            "load_avg = {}",
            avg.load_avg
        );
    }

    #[test]
    fn capacity_scaling_caps_the_average() {
        let mut avg = OntimeAvg::default();
        for _ in 0..2000 {
            avg.update(1024, true, 1024, 512);
        }
        assert!(
            (490..=530).contains(&avg.load_avg),
            "load_avg = {}",
            avg.load_avg
        );
    }

    #[test]
    fn idle_time_decays_the_average() {
        let mut avg = OntimeAvg::default();
        for _ in 0..2000 {
            avg.update(1024, true, 1024, 1024);
        }
        avg.update(200 * 1024, false, 1024, 1024);
        assert!(avg.load_avg < 20, "load_avg = {}", avg.load_avg);
    }

    #[test]
    fn clock_jump_saturates_instead_of_overflowing() {
        let mut avg = OntimeAvg::with_load(300);
        avg.period_contrib = 1000;
        assert!(avg.update(u64::MAX, true, 1024, 1024));
        assert!(avg.load_avg <= 1024, "load_avg = {}", avg.load_avg);

        avg.period_contrib = 1000;
        assert!(avg.update(u64::MAX, false, 1024, 1024));
        assert_eq!(avg.load_avg, 0);
    }

    #[test]
    fn inherited_load_keeps_parent_average() {
        let parent = OntimeAvg::with_load(450);
        let child = OntimeAvg::inherit(&parent);
        assert_eq!(child.load_avg, 450);
        assert_eq!(child.load_sum, parent.load_sum);
        assert_eq!(child.period_contrib, 1023);
    }
}
