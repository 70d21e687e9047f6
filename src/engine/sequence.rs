//! Measurement-sequence bookkeeping.
//!
//! Sequence numbers are 16-bit and wrap. `a` is older than `b` when `b` is
//! ahead of `a` by less than half the number space; a larger distance is a
//! wrap-around, so `0xFFFF → 0x0000` counts as progress, not regression.

use super::cluster::ClusterTable;
use std::time::Duration;

const HALF_RANGE: u16 = 0x8000;

/// `true` when `seq` precedes `current` (modulo wrap-around).
pub fn is_older(seq: u16, current: u16) -> bool {
    let d = current.wrapping_sub(seq);
    d != 0 && d < HALF_RANGE
}

/// `true` when `seq` follows `current` (modulo wrap-around).
pub fn is_newer(seq: u16, current: u16) -> bool {
    seq != current && !is_older(seq, current)
}

/// The sequence currently being ingested.
#[derive(Debug, Clone)]
pub struct OpenSequence {
    pub number: u16,
    /// Rows received per cluster (table order), zero-fills included.
    pub rows: Vec<usize>,
    pub zero_filled: usize,
    pub accepted: usize,
    pub last_arrival: Duration,
}

impl OpenSequence {
    pub fn new(number: u16, clusters: usize, now: Duration) -> Self {
        Self {
            number,
            rows: vec![0; clusters],
            zero_filled: 0,
            accepted: 0,
            last_arrival: now,
        }
    }

    /// Every cluster has contributed its `l_k` rows.
    pub fn is_complete(&self, table: &ClusterTable) -> bool {
        table.iter().zip(&self.rows).all(|(c, &r)| r >= c.l)
    }

    /// Rows still missing per cluster index.
    pub fn missing(&self, table: &ClusterTable) -> Vec<(usize, usize)> {
        table
            .iter()
            .zip(&self.rows)
            .enumerate()
            .filter(|(_, (c, r))| **r < c.l)
            .map(|(i, (c, &r))| (i, c.l - r))
            .collect()
    }

    pub fn idle_for(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_arrival)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cluster::ClusterDescriptor;

    #[test]
    fn ordering_wraps() {
        assert!(is_older(4, 5));
        assert!(!is_older(5, 5));
        assert!(is_newer(6, 5));
        // 0xFFFF -> 0 is progress
        assert!(is_newer(0, 0xFFFF));
        assert!(is_older(0xFFFF, 0));
        // a jump of more than half the range looks like a wrap
        assert!(is_newer(10, 0x9000));
        assert!(is_older(0x8FFF, 0x9000));
    }

    #[test]
    fn completion_and_missing_rows() {
        let mut t = ClusterTable::new();
        t.insert(ClusterDescriptor::with_sequential_nodes(1, 8, 4, 2, 1, 3, 0)).unwrap();
        t.insert(ClusterDescriptor::with_sequential_nodes(2, 8, 4, 3, 1, 3, 0)).unwrap();
        let mut s = OpenSequence::new(1, 2, Duration::ZERO);
        s.rows = vec![2, 1];
        assert!(!s.is_complete(&t));
        assert_eq!(s.missing(&t), vec![(1, 2)]);
        s.rows[1] = 3;
        assert!(s.is_complete(&t));
        assert_eq!(s.idle_for(Duration::from_millis(5)), Duration::from_millis(5));
    }
}
