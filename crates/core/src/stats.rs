//! Per-core statistics (§8's "simulator-only" counters plus the
//! supplemented per-Mop/per-uop slip and memory-order-event counters
//! this crate adds beyond spec.md's distillation, grounded on
//! `examples/original_source/xiosim/zesto-oracle.cpp` /
//! `ZPIPE-commit/commit-IO-DPM.cpp`'s `sim.*` counter fields).

use crate::core::pipeline::model::SlipStats;

/// Why commit stalled this cycle (§4.5 step 1-3), tallied as a
/// histogram so a caller can characterize bottlenecks after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// ROB is empty: nothing to commit.
    Empty,
    /// Head Mop has a delayed branch recovery outstanding.
    JeclearInflight,
    /// `commit.branch_limit` branches already retired this cycle.
    MaxBranches,
    /// A store-address uop couldn't find room in the STQ.
    Stq,
}

/// Running totals for one core, accumulated by commit and the
/// memory-order/execute stages. Never read by the core itself —
/// purely observational (§4.5 "Stall-reason histogram is a
/// simulator-only statistic").
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub num_insn_committed: u64,
    pub num_uops_committed: u64,
    pub num_branches_committed: u64,
    pub num_traps: u64,

    /// Whole fusion groups retired as a unit (§8 scenario 6).
    pub commit_fusions: u64,
    /// Memory-order nukes fired (§4.4 "Partial overlap").
    pub load_nukes: u64,
    /// Trailing-half DL1 accesses issued for a split-line load (§4.4
    /// scenario 4).
    pub dl1_load_split_accesses: u64,
    /// Senior-STQ drains observed (`STQ_deallocate_senior` firing).
    pub stq_drains: u64,
    /// Forced recoveries fired by `Core::check_deadlock` once
    /// `deadlock_grace_period` expired with commit still stalled.
    pub deadlock_flushes: u64,
    /// Repeater hits that short-circuited a DL1 access.
    pub repeater_hits: u64,
    /// Repeater misses that fell through to DL1.
    pub repeater_misses: u64,
    /// Loads stalled behind a partial store-forward overlap
    /// (§4.4 "Partial overlap").
    pub partial_forward_stalls: u64,
    /// DL1 accesses that missed, triggering a load-miss reschedule.
    pub load_misses: u64,

    pub stall_empty: u64,
    pub stall_jeclear_inflight: u64,
    pub stall_max_branches: u64,
    pub stall_stq: u64,

    /// Sum of per-Mop slip statistics across every committed Mop, for
    /// post-run bottleneck analysis.
    pub slip_totals: SlipStats,
}

impl Stats {
    pub fn note_stall(&mut self, reason: StallReason) {
        match reason {
            StallReason::Empty => self.stall_empty += 1,
            StallReason::JeclearInflight => self.stall_jeclear_inflight += 1,
            StallReason::MaxBranches => self.stall_max_branches += 1,
            StallReason::Stq => self.stall_stq += 1,
        }
    }

    pub fn note_stq_drain(&mut self) {
        self.stq_drains += 1;
    }

    pub fn note_load_nuke(&mut self) {
        self.load_nukes += 1;
    }

    pub fn note_split_access(&mut self) {
        self.dl1_load_split_accesses += 1;
    }

    pub fn note_deadlock_flush(&mut self) {
        self.deadlock_flushes += 1;
    }

    pub fn note_repeater_hit(&mut self) {
        self.repeater_hits += 1;
    }

    pub fn note_repeater_miss(&mut self) {
        self.repeater_misses += 1;
    }

    pub fn note_partial_forward_stall(&mut self) {
        self.partial_forward_stalls += 1;
    }

    pub fn note_load_miss(&mut self) {
        self.load_misses += 1;
    }

    pub fn note_uop_committed(&mut self, is_branch: bool) {
        self.num_uops_committed += 1;
        if is_branch {
            self.num_branches_committed += 1;
        }
    }

    pub fn note_mop_committed(&mut self, is_trap: bool, slip: SlipStats, fused: bool) {
        self.num_insn_committed += 1;
        if is_trap {
            self.num_traps += 1;
        }
        if fused {
            self.commit_fusions += 1;
        }
        self.slip_totals.decode2alloc += slip.decode2alloc;
        self.slip_totals.alloc2ready += slip.alloc2ready;
        self.slip_totals.ready2issue += slip.ready2issue;
        self.slip_totals.issue2exec += slip.issue2exec;
        self.slip_totals.exec2complete += slip.exec2complete;
        self.slip_totals.complete2commit += slip.complete2commit;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_histogram_tallies_by_reason() {
        let mut s = Stats::default();
        s.note_stall(StallReason::Empty);
        s.note_stall(StallReason::Stq);
        s.note_stall(StallReason::Stq);
        assert_eq!(s.stall_empty, 1);
        assert_eq!(s.stall_stq, 2);
    }

    #[test]
    fn mop_commit_accumulates_slip_totals() {
        let mut s = Stats::default();
        let slip = SlipStats {
            decode2alloc: 2,
            alloc2ready: 1,
            ready2issue: 3,
            issue2exec: 1,
            exec2complete: 4,
            complete2commit: 1,
        };
        s.note_mop_committed(false, slip, true);
        s.note_mop_committed(false, slip, false);
        assert_eq!(s.num_insn_committed, 2);
        assert_eq!(s.commit_fusions, 1);
        assert_eq!(s.slip_totals.exec2complete, 8);
    }
}
