//! Transaction statistics

use std::ops::{AddAssign, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters accumulated by a transaction and folded into the database
/// statistics when it closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStats {
    // Page statistics.
    /// number of page allocations
    pub page_count: i64,
    /// total bytes allocated
    pub page_alloc: i64,

    // Cursor statistics.
    /// number of cursors created
    pub cursor_count: i64,

    // Node statistics.
    /// number of node allocations
    pub node_count: i64,
    /// number of node dereferences
    pub node_deref: i64,

    // Rebalance statistics.
    /// number of node rebalances
    pub rebalance: i64,
    /// total time spent rebalancing
    pub rebalance_time: Duration,

    // Split/Spill statistics.
    /// number of nodes split
    pub split: i64,
    /// number of nodes spilled
    pub spill: i64,
    /// total time spent spilling
    pub spill_time: Duration,

    // Write statistics.
    /// number of writes performed
    pub write: i64,
    /// total time spent writing to disk
    pub write_time: Duration,
}

impl TxStats {
    /// Add `other` field by field
    pub fn add(&mut self, other: &TxStats) {
        self.page_count += other.page_count;
        self.page_alloc += other.page_alloc;
        self.cursor_count += other.cursor_count;
        self.node_count += other.node_count;
        self.node_deref += other.node_deref;
        self.rebalance += other.rebalance;
        self.rebalance_time += other.rebalance_time;
        self.split += other.split;
        self.spill += other.spill;
        self.spill_time += other.spill_time;
        self.write += other.write;
        self.write_time += other.write_time;
    }

    /// Field-by-field difference, e.g. the delta between two snapshots.
    /// Durations saturate at zero.
    pub fn sub(&self, other: &TxStats) -> TxStats {
        TxStats {
            page_count: self.page_count - other.page_count,
            page_alloc: self.page_alloc - other.page_alloc,
            cursor_count: self.cursor_count - other.cursor_count,
            node_count: self.node_count - other.node_count,
            node_deref: self.node_deref - other.node_deref,
            rebalance: self.rebalance - other.rebalance,
            rebalance_time: self.rebalance_time.saturating_sub(other.rebalance_time),
            split: self.split - other.split,
            spill: self.spill - other.spill,
            spill_time: self.spill_time.saturating_sub(other.spill_time),
            write: self.write - other.write,
            write_time: self.write_time.saturating_sub(other.write_time),
        }
    }
}

impl AddAssign<TxStats> for TxStats {
    fn add_assign(&mut self, rhs: TxStats) {
        self.add(&rhs);
    }
}

impl Sub<TxStats> for TxStats {
    type Output = TxStats;

    fn sub(self, rhs: TxStats) -> Self::Output {
        TxStats::sub(&self, &rhs)
    }
}
