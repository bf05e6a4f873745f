//! The macro-op: one executed x86 instruction.

use smallvec::SmallVec;

use crate::common::constants::{MAX_ILEN, TICK_T_MAX, TickT};
use crate::common::error::CoreError;

use super::uop::Uop;

/// Per-Mop slip-time statistics accumulated as its uops retire:
/// decode-to-alloc, alloc-to-ready, ready-to-issue, issue-to-exec,
/// exec-to-complete, and complete-to-commit latency, summed across
/// every uop in the Mop.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlipStats {
    pub decode2alloc: u64,
    pub alloc2ready: u64,
    pub ready2issue: u64,
    pub issue2exec: u64,
    pub exec2complete: u64,
    pub complete2commit: u64,
}

/// One executed x86 instruction and its child uops.
#[derive(Debug, Clone)]
pub struct Mop {
    /// Program-order sequence number, strictly increasing across the
    /// whole run (`oracle.seq`). Doubles as this Mop's identity key in
    /// the [`super::super::mopq::MopQueue`] ring.
    pub seq: u64,
    pub pc: u64,
    pub npc_pred: u64,
    pub npc_actual: Option<u64>,
    pub tpc: u64,

    pub is_ctrl: bool,
    pub is_trap: bool,
    pub is_rep: bool,
    pub branch_taken: bool,
    pub asid: u32,
    pub speculative: bool,

    pub raw_len: u8,
    pub raw_bytes: [u8; MAX_ILEN],

    pub uops: Vec<Uop>,
    pub flow_length: u32,
    pub num_eff_uops: u32,
    pub num_branches: u32,
    pub num_mem_refs: u32,
    pub num_loads: u32,

    /// Next uop index whose `when_completed` has not yet been
    /// observed by commit's completed-uop walk.
    pub complete_index: u32,
    /// Next uop index awaiting retirement.
    pub commit_index: u32,

    pub when_fetched: TickT,
    pub when_decoded: TickT,
    pub when_commit_started: TickT,

    /// Set while a delayed branch recovery is outstanding for this
    /// Mop; commit stalls on it with reason `JECLEAR_INFLIGHT`.
    pub jeclear_in_flight: bool,

    pub slip: SlipStats,

    /// Branch-predictor state-cache handle shuttled from fetch to
    /// retire; the predictor owns the memory, the core only carries
    /// the token.
    pub bp_state: Option<u64>,
}

impl Mop {
    /// Invariant: `0 ≤ commit_index ≤ complete_index ≤ flow_length`.
    pub fn validate_indices(&self) -> Result<(), CoreError> {
        if self.commit_index <= self.complete_index && self.complete_index <= self.flow_length {
            Ok(())
        } else {
            Err(CoreError::ContractViolation {
                component: "Mop",
                detail: format!(
                    "commit_index={} complete_index={} flow_length={} out of order (seq={})",
                    self.commit_index, self.complete_index, self.flow_length, self.seq
                ),
            })
        }
    }

    pub fn fully_retired(&self) -> bool {
        self.commit_index == self.flow_length
    }

    pub fn fully_completed(&self) -> bool {
        self.complete_index == self.flow_length
    }

    /// Index of the head uop of a fusion group starting at `idx`, or
    /// `idx` itself if not part of a fusion group. Used by commit to
    /// walk a whole group without consuming more than one ROB slot /
    /// `commit.width` credit.
    pub fn fusion_group_len(&self, head_idx: usize) -> usize {
        self.uops
            .get(head_idx)
            .filter(|u| u.flags.is_fusion_head)
            .map_or(1, |u| usize::from(u.fusion_size.max(1)))
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw_bytes[..self.raw_len as usize]
    }
}

/// A fixed small-vector alias kept for feeder-side memory operand lists
/// (`mem_buffer`); not on the Mop's hot path, so `SmallVec` trades a
/// little stack space to avoid heap churn for the common 0-2 operand
/// case.
pub type MemOperands = SmallVec<[(u64, u8); 2]>;

pub const UNSET_TICK: TickT = TICK_T_MAX;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FuClass;
    use crate::core::pipeline::model::uop::{Timing, UopFlags};
    use crate::common::constants::{MAX_IDEPS, MAX_ODEPS};

    fn empty_mop() -> Mop {
        Mop {
            seq: 1,
            pc: 0x1000,
            npc_pred: 0x1004,
            npc_actual: None,
            tpc: 0,
            is_ctrl: false,
            is_trap: false,
            is_rep: false,
            branch_taken: false,
            asid: 0,
            speculative: false,
            raw_len: 0,
            raw_bytes: [0; MAX_ILEN],
            uops: Vec::new(),
            flow_length: 0,
            num_eff_uops: 0,
            num_branches: 0,
            num_mem_refs: 0,
            num_loads: 0,
            complete_index: 0,
            commit_index: 0,
            when_fetched: 0,
            when_decoded: 0,
            when_commit_started: UNSET_TICK,
            jeclear_in_flight: false,
            slip: SlipStats::default(),
            bp_state: None,
        }
    }

    fn uop_stub(is_head: bool, fusion_size: u8) -> Uop {
        Uop {
            uop_seq: 0,
            mop_seq: 1,
            idx_in_mop: 0,
            fu_class: FuClass::Int,
            mem_size: 0,
            flags: UopFlags {
                is_fusion_head: is_head,
                ..UopFlags::default()
            },
            idep: [None; MAX_IDEPS],
            idep_regs: [None; MAX_IDEPS],
            ivalue_valid: [true; MAX_IDEPS],
            odep_regs: [None; MAX_ODEPS],
            odep_head: None,
            rob_index: None,
            ldq_index: None,
            stq_index: None,
            port_assignment: -1,
            action_id: 0,
            ovalue: 0,
            ovalue_valid: false,
            num_replays: 0,
            in_ready_q: false,
            fusion_size,
            fusion_next: None,
            timing: Timing::default(),
        }
    }

    #[test]
    fn index_invariant_rejects_out_of_order() {
        let mut m = empty_mop();
        m.flow_length = 3;
        m.complete_index = 1;
        m.commit_index = 2;
        assert!(m.validate_indices().is_err());
    }

    #[test]
    fn fusion_group_len_reads_head_size() {
        let mut m = empty_mop();
        m.uops.push(uop_stub(true, 3));
        assert_eq!(m.fusion_group_len(0), 3);
    }

    #[test]
    fn non_fusion_group_len_is_one() {
        let mut m = empty_mop();
        m.uops.push(uop_stub(false, 0));
        assert_eq!(m.fusion_group_len(0), 1);
    }
}
