/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-width CPU set.
//!
//! A `u64` bitmask is enough for every platform this engine targets (phones
//! and embedded big.LITTLE parts top out well below 64 cores).  Bit N set
//! means CPU N is a member.

use std::fmt;

use super::CpuId;
use crate::scheduler::error::TopologyError;

/// A set of CPU ids backed by a single `u64` bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuMask(u64);

impl CpuMask {
    /// Largest number of CPUs a mask can describe.
    pub const MAX_CPUS: usize = 64;

    /// The empty set.
    pub const fn empty() -> Self {
        CpuMask(0)
    }

    /// Build a mask from raw bits (bit N = CPU N).
    pub const fn from_bits(bits: u64) -> Self {
        CpuMask(bits)
    }

    /// Every CPU in `0..n`.
    pub fn first_n(n: usize) -> Self {
        if n >= Self::MAX_CPUS {
            CpuMask(u64::MAX)
        } else {
            CpuMask((1u64 << n) - 1)
        }
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u64 {
        self.0
    }

    pub fn set(&mut self, cpu: CpuId) {
        debug_assert!(cpu < Self::MAX_CPUS, "cpu {cpu} out of mask range");
        if cpu < Self::MAX_CPUS {
            self.0 |= 1 << cpu;
        }
    }

    pub fn clear(&mut self, cpu: CpuId) {
        if cpu < Self::MAX_CPUS {
            self.0 &= !(1 << cpu);
        }
    }

    /// Remove every CPU from the set.
    pub fn clear_all(&mut self) {
        self.0 = 0;
    }

    /// Returns `true` if `cpu` is a member of the set.
    pub fn test(self, cpu: CpuId) -> bool {
        cpu < Self::MAX_CPUS && (self.0 >> cpu) & 1 == 1
    }

    pub fn and(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 & other.0)
    }

    pub fn or(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 | other.0)
    }

    pub fn intersects(self, other: CpuMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of CPUs in the set.
    pub fn weight(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest CPU id in the set.
    pub fn first(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as CpuId)
        }
    }

    /// Highest CPU id in the set.
    pub fn last(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(63 - self.0.leading_zeros() as CpuId)
        }
    }

    /// Iterate member CPUs in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let cpu = bits.trailing_zeros() as CpuId;
            bits &= bits - 1;
            Some(cpu)
        })
    }

    /// Parse a kernel-style cpulist such as `"0-3,6"`.
    ///
    /// Whitespace around items is ignored.  An empty string yields the empty
    /// mask.
    pub fn parse_cpulist(list: &str) -> Result<Self, TopologyError> {
        let bad = || TopologyError::InvalidCpulist(list.to_string());
        let mut mask = CpuMask::empty();

        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (lo, hi) = match item.split_once('-') {
                Some((lo, hi)) => (lo.trim(), hi.trim()),
                None => (item, item),
            };
            let lo: CpuId = lo.parse().map_err(|_| bad())?;
            let hi: CpuId = hi.parse().map_err(|_| bad())?;
            if lo > hi || hi >= Self::MAX_CPUS {
                return Err(bad());
            }
            for cpu in lo..=hi {
                mask.set(cpu);
            }
        }

        Ok(mask)
    }
}

impl FromIterator<CpuId> for CpuMask {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut mask = CpuMask::empty();
        for cpu in iter {
            mask.set(cpu);
        }
        mask
    }
}

/// Formats as a cpulist (`0-3,6`), the same notation `parse_cpulist` accepts.
impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut cpus = self.iter().peekable();

        while let Some(start) = cpus.next() {
            let mut end = start;
            while cpus.peek() == Some(&(end + 1)) {
                end += 1;
                cpus.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }

        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_n_covers_exactly_n_cpus() {
        let m = CpuMask::first_n(4);
        assert_eq!(m.weight(), 4);
        assert!(m.test(3));
        assert!(!m.test(4));
        assert_eq!(CpuMask::first_n(64).weight(), 64);
    }

    #[test]
    fn iter_is_ascending() {
        let m: CpuMask = [5, 1, 3].into_iter().collect();
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(m.first(), Some(1));
        assert_eq!(m.last(), Some(5));
    }

    #[test]
    fn empty_mask_has_no_first_or_last() {
        assert_eq!(CpuMask::empty().first(), None);
        assert_eq!(CpuMask::empty().last(), None);
        assert_eq!(CpuMask::empty().iter().count(), 0);
    }

    #[test]
    fn intersects_and_and() {
        let a = CpuMask::from_bits(0b0011);
        let b = CpuMask::from_bits(0b0110);
        assert!(a.intersects(b));
        assert_eq!(a.and(b), CpuMask::from_bits(0b0010));
        assert!(!a.intersects(CpuMask::from_bits(0b1100)));
    }

    #[test]
    fn parse_cpulist_ranges_and_singles() {
        let m = CpuMask::parse_cpulist("0-3, 6").unwrap();
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 6]);
    }

    #[test]
    fn parse_cpulist_rejects_garbage() {
        assert!(CpuMask::parse_cpulist("0-x").is_err());
        assert!(CpuMask::parse_cpulist("3-1").is_err());
        assert!(CpuMask::parse_cpulist("64").is_err());
    }

    #[test]
    fn display_matches_cpulist_notation() {
        let m = CpuMask::parse_cpulist("0-3,6,8-9").unwrap();
        assert_eq!(m.to_string(), "0-3,6,8-9");
        assert_eq!(CpuMask::empty().to_string(), "none");
    }
}
