//! The commit stage: in-order retirement, one ROB slot (a
//! single uop or a whole fusion group) at a time, plus the stall-
//! reason histogram.
//!
//! A per-cycle retire loop, fusion-aware and `commit.width`-wide,
//! shared by both back-ends: IO-DPM and STM retire identically — only
//! issue and execution differ between them.

use crate::common::error::CoreError;
use crate::core::pipeline::model::{Mop, SlipStats, UopLoc};
use crate::stats::StallReason;

use super::memory::drain_senior_stage;
use crate::sim::core_sim::Core;

/// Retire up to `commit.width` ROB slots this cycle, then
/// run the senior-store drain and the deadlock watchdog.
pub fn commit_stage(core: &mut Core) -> Result<(), CoreError> {
    drain_senior_stage(core);

    let width = core.config.commit.width;
    let branch_limit = core.config.commit.branch_limit;
    let mut branches_this_cycle = 0usize;
    let mut retired_any = false;

    for _ in 0..width {
        let Some(entry) = core.rob.head_entry() else {
            core.stats.note_stall(StallReason::Empty);
            break;
        };
        let mop_seq = entry.head.mop_seq;
        let head_idx = entry.head.uop_idx;
        let group_end = head_idx + entry.group_len;

        advance_complete_index(core, mop_seq);

        let Some(mop) = core.oracle.mopq.get(mop_seq) else {
            break;
        };
        if mop.jeclear_in_flight {
            core.stats.note_stall(StallReason::JeclearInflight);
            break;
        }
        if mop.complete_index < group_end {
            // The group hasn't finished executing yet.
            break;
        }
        let is_branch = mop.uops[head_idx as usize..group_end as usize]
            .iter()
            .any(|u| u.flags.is_ctrl);
        if is_branch && branches_this_cycle >= branch_limit {
            core.stats.note_stall(StallReason::MaxBranches);
            break;
        }

        retire_group(core, mop_seq, head_idx, group_end)?;
        retired_any = true;
        if is_branch {
            branches_this_cycle += 1;
        }

        if core.oracle.mopq.get(mop_seq).is_some_and(Mop::fully_retired) {
            retire_mop(core, mop_seq)?;
        }
    }

    if retired_any {
        core.last_retire_cycle = core.now;
    }
    deadlock_check(core);
    Ok(())
}

/// Walk `Mop.uop[complete_index]` forward while each uop has finished
/// executing (`when_completed <= now`), advancing `complete_index` past
/// it. The is_sta→STQ push this same walk performs in the commit-time
/// model happens eagerly in `alloc_stage` instead (`core_sim.rs`); by
/// the time a uop's completion is visible here, `resolve_memory_completions`
/// has already run for this cycle and pushed it, so there is nothing left
/// to do here beyond the index walk itself.
fn advance_complete_index(core: &mut Core, mop_seq: u64) {
    let Some(mop) = core.oracle.mopq.get(mop_seq) else {
        return;
    };
    let now = core.now;
    let mut idx = mop.complete_index as usize;
    while let Some(uop) = mop.uops.get(idx) {
        if uop.timing.when_completed > now {
            break;
        }
        idx += 1;
    }
    let advanced = idx as u32;
    if let Some(mop) = core.oracle.mopq.get_mut(mop_seq) {
        if advanced > mop.complete_index {
            mop.complete_index = advanced;
        }
    }
}

/// Retire every uop in `[head_idx, group_end)` of `mop_seq`'s Mop,
/// freeing its ROB slot and any LDQ/STQ occupancy, then tell the
/// oracle so rename-map/odep state can be released.
fn retire_group(core: &mut Core, mop_seq: u64, head_idx: u32, group_end: u32) -> Result<(), CoreError> {
    for idx in head_idx..group_end {
        let loc = UopLoc { mop_seq, uop_idx: idx };
        let Some(uop) = core
            .oracle
            .mopq
            .get(mop_seq)
            .and_then(|m| m.uops.get(idx as usize))
        else {
            continue;
        };
        let is_load = uop.flags.is_load;
        let is_std = uop.flags.is_std;

        if is_load {
            core.ldq.retire_head()?;
        }
        if is_std {
            // The store entry is promoted to senior at exactly this
            // point; it stays keyed by its sta/std uop
            // locations until the cache/TLB round-trip completes
            // (`memory::complete_senior_write`), which is what
            // actually detaches them.
            core.stq.begin_senior()?;
        }

        core.oracle.commit_uop(loc)?;
        if let Some(mop) = core.oracle.mopq.get_mut(mop_seq) {
            mop.commit_index = idx + 1;
        }
    }
    core.rob.retire_head()?;
    Ok(())
}

/// Pop the fully-retired Mop out of the MopQ, train the branch
/// predictor on control-flow Mops, and fold its slip stats in.
fn retire_mop(core: &mut Core, mop_seq: u64) -> Result<(), CoreError> {
    let now = core.now;
    let mop = core.oracle.commit(mop_seq)?;

    if mop.is_ctrl {
        if let (Some(raw_handle), Some(actual)) = (mop.bp_state, mop.npc_actual) {
            use crate::core::units::branch_predictor::StateCacheHandle;
            let handle = StateCacheHandle(raw_handle);
            core.bp.update(handle, actual, mop.branch_taken);
            core.bp.return_state_cache(handle);
        }
    }

    let fused = mop.uops.iter().any(|u| u.flags.is_fusion_head);
    let slip = compute_slip(&mop, now);
    core.stats.note_mop_committed(mop.is_trap, slip, fused);
    for u in &mop.uops {
        core.stats.note_uop_committed(u.flags.is_ctrl);
    }
    Ok(())
}

/// Worst-case (max across the Mop's uops) per-stage latency, folded
/// into `Stats::slip_totals` on retire.
fn compute_slip(mop: &Mop, now: u64) -> SlipStats {
    let mut s = SlipStats::default();
    for u in &mop.uops {
        let t = &u.timing;
        s.decode2alloc = s.decode2alloc.max(t.when_allocated.saturating_sub(t.when_decoded));
        s.alloc2ready = s.alloc2ready.max(t.when_ready.saturating_sub(t.when_allocated));
        s.ready2issue = s.ready2issue.max(t.when_issued.saturating_sub(t.when_ready));
        s.issue2exec = s.issue2exec.max(t.when_exec.saturating_sub(t.when_issued));
        s.exec2complete = s.exec2complete.max(t.when_completed.saturating_sub(t.when_exec));
        s.complete2commit = s.complete2commit.max(now.saturating_sub(t.when_completed));
    }
    s
}

/// Deadlock guard: no uop has retired in `deadlock_threshold` cycles.
/// Raising this is never itself a hard error — it only arms `Core`'s
/// grace-period watchdog (`Core::check_deadlock`), which gives the
/// pipeline `deadlock_grace_period` more cycles to recover on its own
/// before forcing a flush.
fn deadlock_check(core: &mut Core) {
    let stalled = core.now.saturating_sub(core.last_retire_cycle);
    core.deadlocked = stalled > core.config.deadlock_threshold;
    if core.deadlocked {
        core.deadlock_since.get_or_insert(core.now);
    } else {
        core.deadlock_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::model::{Timing, UopFlags};

    fn timed_uop(decoded: u64, allocated: u64, ready: u64, issued: u64, exec: u64, completed: u64) -> crate::core::pipeline::model::Uop {
        use crate::common::constants::{MAX_IDEPS, MAX_ODEPS};
        crate::core::pipeline::model::Uop {
            uop_seq: 0,
            mop_seq: 0,
            idx_in_mop: 0,
            fu_class: crate::config::FuClass::Int,
            mem_size: 0,
            flags: UopFlags::default(),
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
            fusion_size: 0,
            fusion_next: None,
            timing: Timing {
                when_decoded: decoded,
                when_allocated: allocated,
                when_ready: ready,
                when_issued: issued,
                when_exec: exec,
                when_completed: completed,
                when_otag_ready: completed,
                when_ival_ready: [0; MAX_IDEPS],
            },
        }
    }

    fn empty_mop() -> Mop {
        Mop {
            seq: 1,
            pc: 0,
            npc_pred: 0,
            npc_actual: None,
            tpc: 0,
            is_ctrl: false,
            is_trap: false,
            is_rep: false,
            branch_taken: false,
            asid: 0,
            speculative: false,
            raw_len: 0,
            raw_bytes: [0; crate::common::constants::MAX_ILEN],
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
            when_commit_started: u64::MAX,
            jeclear_in_flight: false,
            slip: SlipStats::default(),
            bp_state: None,
        }
    }

    #[test]
    fn slip_takes_the_worst_uop_per_stage() {
        let mut mop = empty_mop();
        mop.uops.push(timed_uop(0, 1, 2, 3, 4, 5));
        mop.uops.push(timed_uop(0, 2, 4, 6, 8, 10));
        let slip = compute_slip(&mop, 12);
        assert_eq!(slip.decode2alloc, 2);
        assert_eq!(slip.exec2complete, 2);
        assert_eq!(slip.complete2commit, 7);
    }
}
