//! In-order, fixed-stage payload-pipe scheduler (the IO-DPM
//! back-end).
//!
//! Each port is a fixed three-stage in-order pipe: AGEN / DL1-STQ /
//! writeback-select, with `can_issue_IO`'s cross-port completion-order
//! check gating entry into a port's functional unit.

use std::collections::VecDeque;

use tracing::trace;

use crate::common::constants::TickT;
use crate::common::error::CoreError;
use crate::config::Config;

use super::super::engine::ExecuteOutcome;
use super::super::model::UopLoc;
use super::ports::{FuBank, banks_per_port, bindings_for_port, pop_earliest_exit_across};
use super::shared::wake_dependents;
use crate::config::FuClass;
use crate::sim::core_sim::Core;

#[derive(Debug, Clone, Copy)]
struct StageSlot {
    uop: UopLoc,
    uop_seq: u64,
    action_id: u64,
}

#[derive(Debug)]
struct PayloadPipe {
    stages: Vec<Option<StageSlot>>,
}

impl PayloadPipe {
    fn new(depth: usize) -> Self {
        Self {
            stages: vec![None; depth.max(1)],
        }
    }
}

/// Bounded ring of completed-but-not-yet-retired uops, modeling finite
/// write-back/forwarding bandwidth between the execute and commit
/// stages, sized by `commit_buffer_size`. Self-cleans lazily: an entry is
/// dropped once its owning uop has retired or its Mop has been
/// squashed, rather than being actively notified by commit.
#[derive(Debug)]
struct CommitBuffer {
    entries: VecDeque<UopLoc>,
    capacity: usize,
}

impl CommitBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn purge_retired(&mut self, core: &Core) {
        self.entries.retain(|loc| {
            core.oracle
                .mopq
                .get(loc.mop_seq)
                .is_some_and(|m| loc.uop_idx >= m.commit_index)
        });
    }

    fn has_room(&self) -> bool {
        self.entries.len() < self.capacity
    }

    fn push(&mut self, loc: UopLoc) {
        self.entries.push_back(loc);
    }
}

#[derive(Debug)]
pub struct IoDpmState {
    ports: Vec<PayloadPipe>,
    fus: Vec<FuBank>,
    port_classes: Vec<Vec<FuClass>>,
    commit_buffer: CommitBuffer,
    next_port: usize,
}

impl IoDpmState {
    pub fn new(cfg: &Config) -> Self {
        let num_ports = cfg.exec.num_exec_ports.max(1);
        Self {
            ports: (0..num_ports).map(|_| PayloadPipe::new(cfg.exec.payload_depth)).collect(),
            fus: banks_per_port(&cfg.exec, num_ports),
            port_classes: (0..num_ports).map(|p| bindings_for_port(&cfg.exec, p)).collect(),
            commit_buffer: CommitBuffer::new(cfg.exec.commit_buffer_size),
            next_port: 0,
        }
    }

    /// Drop every in-flight payload-pipe/commit-buffer slot for a uop
    /// younger than `boundary_seq`. FU-bank entries self-clean
    /// via `action_id` mismatch at drain time instead.
    pub fn flush_after(&mut self, boundary_seq: u64) {
        for port in &mut self.ports {
            for stage in &mut port.stages {
                if stage.is_some_and(|s| s.uop.mop_seq > boundary_seq) {
                    *stage = None;
                }
            }
        }
        self.commit_buffer.entries.retain(|loc| loc.mop_seq <= boundary_seq);
    }
}

pub fn execute_stage(state: &mut IoDpmState, core: &mut Core) -> Result<ExecuteOutcome, CoreError> {
    let now = core.now;
    let mut outcome = ExecuteOutcome::default();

    state.commit_buffer.purge_retired(core);

    for port_idx in 0..state.ports.len() {
        advance_port(state, core, port_idx, now, &mut outcome);
    }

    Ok(outcome)
}

fn advance_port(state: &mut IoDpmState, core: &mut Core, port_idx: usize, now: TickT, outcome: &mut ExecuteOutcome) {
    let depth = state.ports[port_idx].stages.len();
    let exiting = state.ports[port_idx].stages[depth - 1];

    if let Some(slot) = exiting {
        match issue_exiting(state, core, port_idx, slot, now) {
            IssueResult::Stall => return,
            IssueResult::Issued | IssueResult::Dropped => {}
        }
    }

    for i in (1..depth).rev() {
        state.ports[port_idx].stages[i] = state.ports[port_idx].stages[i - 1];
    }
    state.ports[port_idx].stages[0] = None;

    if let Some(loc) = core.alloc_queue.front().copied() {
        let uop_class = core
            .oracle
            .mopq
            .get(loc.mop_seq)
            .and_then(|m| m.uops.get(loc.uop_idx as usize))
            .map(|u| (u.is_ready(now), u.fu_class));
        if let Some((ready, class)) = uop_class {
            if ready && state.port_classes[port_idx].contains(&class) {
                let _ = core.alloc_queue.pop_front();
                admit(state, core, port_idx, loc, now);
            }
        }
    }

    drain_fu_completions(state, core, now, outcome);
}

enum IssueResult {
    Issued,
    Dropped,
    Stall,
}

/// `can_issue_IO`: the uop clearing the last payload stage may
/// enter its class's FU only if doing so wouldn't let it complete
/// ahead of an older uop still resident in that FU.
fn issue_exiting(state: &mut IoDpmState, core: &mut Core, port_idx: usize, slot: StageSlot, now: TickT) -> IssueResult {
    let Some(uop) = core
        .oracle
        .mopq
        .get(slot.uop.mop_seq)
        .and_then(|m| m.uops.get(slot.uop.uop_idx as usize))
    else {
        return IssueResult::Dropped;
    };
    if uop.action_id != slot.action_id {
        return IssueResult::Dropped;
    }
    let class = uop.fu_class;
    let bank = &state.fus[port_idx];
    if !bank.hosts(class) {
        return IssueResult::Stall;
    }
    let fu = bank.unit(class);
    if !fu.can_issue(now) {
        return IssueResult::Stall;
    }
    let exit = now + fu.latency;
    if fu.would_reorder_completion(slot.uop_seq, exit) {
        return IssueResult::Stall;
    }

    let fu = state.fus[port_idx].unit_mut(class);
    let exit = fu.issue(slot.uop, slot.uop_seq, slot.action_id, now);
    trace!(uop_seq = slot.uop_seq, exit, "iodpm issue");
    if let Some(mop) = core.oracle.mopq.get_mut(slot.uop.mop_seq) {
        if let Some(uop) = mop.uops.get_mut(slot.uop.uop_idx as usize) {
            uop.timing.when_issued = now;
            uop.timing.when_exec = now;
        }
    }
    IssueResult::Issued
}

fn admit(state: &mut IoDpmState, core: &mut Core, port_idx: usize, loc: UopLoc, now: TickT) {
    let Some(mop) = core.oracle.mopq.get_mut(loc.mop_seq) else {
        return;
    };
    let Some(uop) = mop.uops.get_mut(loc.uop_idx as usize) else {
        return;
    };
    if uop.port_assignment < 0 {
        uop.port_assignment = port_idx as i32;
    }
    state.ports[port_idx].stages[0] = Some(StageSlot {
        uop: loc,
        uop_seq: uop.uop_seq,
        action_id: uop.action_id,
    });
    let _ = now;
}

fn drain_fu_completions(state: &mut IoDpmState, core: &mut Core, now: TickT, outcome: &mut ExecuteOutcome) {
    loop {
        if !state.commit_buffer.has_room() {
            break;
        }
        let Some(slot) = pop_earliest_exit_across(&mut state.fus, now) else {
            break;
        };
        complete_uop(state, core, slot.uop, slot.action_id, now, outcome);
    }
}

fn complete_uop(
    state: &mut IoDpmState,
    core: &mut Core,
    loc: UopLoc,
    action_id: u64,
    now: TickT,
    outcome: &mut ExecuteOutcome,
) {
    let Some(mop) = core.oracle.mopq.get_mut(loc.mop_seq) else {
        return;
    };
    let mop_seq = mop.seq;
    let Some(uop) = mop.uops.get_mut(loc.uop_idx as usize) else {
        return;
    };
    if uop.action_id != action_id {
        trace!(uop_seq = uop.uop_seq, "iodpm completion squashed, dropped");
        return;
    }
    if uop.flags.is_load {
        // Loads complete through the cache/TLB path
        // (`shared::memory::try_load_writeback`), not here — the FU
        // pipe only models port/issue-rate occupancy for a load.
        return;
    }
    uop.timing.when_completed = now;
    uop.timing.when_otag_ready = now;
    uop.ovalue_valid = true;
    let is_ctrl = uop.flags.is_ctrl;
    let odep_head = uop.odep_head;

    if is_ctrl {
        if let Some(actual) = mop.npc_actual {
            if actual != mop.npc_pred {
                outcome.mispredict = Some((mop_seq, actual));
            }
        }
    }

    state.commit_buffer.push(loc);
    // In-order issue still needs this: a dependent uop sitting behind
    // its producer in the same or a later payload pipe only becomes
    // `is_ready` once its idep slot is woken here (the fixed stages
    // gate entry, not readiness itself).
    let _ = wake_dependents(core, odep_head, now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_pipe_starts_empty() {
        let p = PayloadPipe::new(3);
        assert_eq!(p.stages.len(), 3);
        assert!(p.stages.iter().all(Option::is_none));
    }

    #[test]
    fn commit_buffer_rejects_past_capacity() {
        let mut cb = CommitBuffer::new(1);
        assert!(cb.has_room());
        cb.push(UopLoc { mop_seq: 1, uop_idx: 0 });
        assert!(!cb.has_room());
    }
}
