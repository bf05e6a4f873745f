//! Out-of-order, reservation-station-style scheduler (the STM
//! back-end).
//!
//! A per-port ready-list walk with age-ordered, out-of-order
//! admission: a uop enters a port's ready list the cycle its last
//! unresolved idep wakes (pushed from the producer's completion walk
//! over the odep list), and the oldest ready entry per port issues
//! first once its class's [`FuBank`] has a free pipe.

use tracing::trace;

use crate::common::constants::TickT;
use crate::common::error::CoreError;
use crate::config::Config;

use super::super::engine::ExecuteOutcome;
use super::super::model::UopLoc;
use super::ports::{FuBank, banks_per_port, bindings_for_port};
use super::shared::wake_dependents;
use crate::config::FuClass;
use crate::sim::core_sim::Core;

#[derive(Debug, Clone, Copy)]
struct ReadyEntry {
    uop: UopLoc,
    uop_seq: u64,
    action_id: u64,
}

/// One execution port's age-ordered ready list. Kept sorted by
/// `uop_seq` on insert so the oldest ready uop on this port is always
/// at the front and issues first.
#[derive(Debug, Default)]
struct Port {
    ready: Vec<ReadyEntry>,
}

impl Port {
    fn insert(&mut self, entry: ReadyEntry) {
        let pos = self.ready.partition_point(|e| e.uop_seq <= entry.uop_seq);
        self.ready.insert(pos, entry);
    }
}

#[derive(Debug)]
pub struct StmState {
    ports: Vec<Port>,
    fus: Vec<FuBank>,
    port_classes: Vec<Vec<FuClass>>,
    next_port: usize,
}

impl StmState {
    pub fn new(cfg: &Config) -> Self {
        let num_ports = cfg.exec.num_exec_ports.max(1);
        Self {
            ports: (0..num_ports).map(|_| Port::default()).collect(),
            fus: banks_per_port(&cfg.exec, num_ports),
            port_classes: (0..num_ports).map(|p| bindings_for_port(&cfg.exec, p)).collect(),
            next_port: 0,
        }
    }

    /// Round-robin among the ports bound to `class` (§4.2/§4.3's
    /// per-port FU binding); falls back to a plain round-robin across
    /// every port if none happen to be bound to it (a misconfiguration
    /// this scheduler tolerates rather than deadlocking on).
    fn assign_port(&mut self, class: FuClass) -> usize {
        let n = self.ports.len().max(1);
        let eligible: Vec<usize> = (0..n).filter(|&p| self.port_classes[p].contains(&class)).collect();
        let candidates: Vec<usize> = if eligible.is_empty() { (0..n).collect() } else { eligible };
        let pos = self.next_port % candidates.len();
        self.next_port = (self.next_port + 1) % n;
        candidates[pos]
    }

    /// Ready lists self-clean lazily: a stale `action_id` is silently
    /// dropped wherever it's next observed,
    /// so a squash only needs to drop the FU-bank entries that would
    /// otherwise sit in a pipe for their full latency before being
    /// discarded on drain; ready-list entries are checked against the
    /// live uop at issue time instead.
    pub fn flush_after(&mut self, _boundary_seq: u64) {}
}

/// The STM back-end's execute step: admit newly-ready uops, issue the
/// oldest ready entry per port into its class's FU, drain completions,
/// and propagate wakeups to dependents.
pub fn execute_stage(state: &mut StmState, core: &mut Core) -> Result<ExecuteOutcome, CoreError> {
    let now = core.now;
    let mut outcome = ExecuteOutcome::default();

    admit_newly_allocated(state, core, now);

    for port_idx in 0..state.ports.len() {
        issue_oldest_ready(state, core, port_idx, now);
    }

    let mut exits = Vec::new();
    for bank in &mut state.fus {
        exits.extend(bank.drain_exits(now));
    }
    for slot in exits {
        complete_uop(state, core, slot.uop, slot.action_id, now, &mut outcome);
    }

    Ok(outcome)
}

fn admit_newly_allocated(state: &mut StmState, core: &mut Core, now: TickT) {
    let pending: Vec<UopLoc> = core.alloc_queue.drain(..).collect();
    for loc in pending {
        let ready = core
            .oracle
            .mopq
            .get(loc.mop_seq)
            .and_then(|m| m.uops.get(loc.uop_idx as usize))
            .is_some_and(|u| u.is_ready(now));
        if ready {
            admit(state, core, loc, now);
        }
        // Not yet ready: no-op here. The producer's completion walk
        // (see `complete_uop`) admits it the cycle its last idep wakes.
    }
}

/// Assign a port (if not already bound) and push into that port's
/// ready list.
fn admit(state: &mut StmState, core: &mut Core, loc: UopLoc, _now: TickT) {
    let Some(mop) = core.oracle.mopq.get_mut(loc.mop_seq) else {
        return;
    };
    let Some(uop) = mop.uops.get_mut(loc.uop_idx as usize) else {
        return;
    };
    if uop.in_ready_q {
        return;
    }
    if uop.port_assignment < 0 {
        uop.port_assignment = state.assign_port(uop.fu_class) as i32;
    }
    let port_idx = uop.port_assignment as usize;
    uop.in_ready_q = true;
    let entry = ReadyEntry {
        uop: loc,
        uop_seq: uop.uop_seq,
        action_id: uop.action_id,
    };
    state.ports[port_idx].insert(entry);
}

fn issue_oldest_ready(state: &mut StmState, core: &mut Core, port_idx: usize, now: TickT) {
    let Some(entry) = state.ports[port_idx].ready.first().copied() else {
        return;
    };

    let Some(uop) = core
        .oracle
        .mopq
        .get(entry.uop.mop_seq)
        .and_then(|m| m.uops.get(entry.uop.uop_idx as usize))
    else {
        // Owning Mop is gone (squashed): drop the stale entry.
        state.ports[port_idx].ready.remove(0);
        return;
    };
    if uop.action_id != entry.action_id {
        state.ports[port_idx].ready.remove(0);
        return;
    }
    let class = uop.fu_class;
    if !state.fus[port_idx].hosts(class) {
        // Port binding misconfigured for this class: nothing else can
        // issue it either, so leave it queued rather than panic.
        return;
    }
    let fu = state.fus[port_idx].unit_mut(class);
    if !fu.can_issue(now) {
        return;
    }

    state.ports[port_idx].ready.remove(0);
    let fu = state.fus[port_idx].unit_mut(class);
    let exit = fu.issue(entry.uop, entry.uop_seq, entry.action_id, now);
    trace!(uop_seq = entry.uop_seq, port = port_idx, exit, "stm issue");

    if let Some(mop) = core.oracle.mopq.get_mut(entry.uop.mop_seq) {
        if let Some(uop) = mop.uops.get_mut(entry.uop.uop_idx as usize) {
            uop.timing.when_issued = now;
            uop.timing.when_exec = now;
        }
    }
}

fn complete_uop(
    state: &mut StmState,
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
        trace!(uop_seq = uop.uop_seq, "stm completion squashed, dropped");
        return;
    }
    if uop.flags.is_load {
        // Loads complete through the cache/TLB path
        // (`shared::memory::try_load_writeback`), not here — the FU
        // pipe only models port/issue-rate occupancy for a load.
        uop.in_ready_q = false;
        return;
    }
    uop.timing.when_completed = now;
    uop.timing.when_otag_ready = now;
    uop.ovalue_valid = true;
    uop.in_ready_q = false;
    let is_ctrl = uop.flags.is_ctrl;
    let odep_head = uop.odep_head;

    if is_ctrl {
        if let Some(actual) = mop.npc_actual {
            if actual != mop.npc_pred {
                outcome.mispredict = Some((mop_seq, actual));
            }
        }
    }

    // Admit every now-ready child right away unless it's already
    // sitting in a port's ready list from an earlier wakeup of a
    // different idep.
    let now_ready = wake_dependents(core, odep_head, now);
    for loc in now_ready {
        let already_queued = core
            .oracle
            .mopq
            .get(loc.mop_seq)
            .and_then(|m| m.uops.get(loc.uop_idx as usize))
            .is_some_and(|u| u.in_ready_q);
        if !already_queued {
            admit(state, core, loc, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    fn cfg(ports: usize) -> Config {
        let mut c = Config::default();
        c.backend = Backend::Stm;
        c.exec.num_exec_ports = ports;
        c
    }

    #[test]
    fn ports_assign_round_robin() {
        let mut s = StmState::new(&cfg(2));
        assert_eq!(s.assign_port(FuClass::Int), 0);
        assert_eq!(s.assign_port(FuClass::Int), 1);
        assert_eq!(s.assign_port(FuClass::Int), 0);
    }

    #[test]
    fn assign_port_respects_binding_restriction() {
        let mut c = cfg(2);
        c.exec.port_bindings = vec![vec![FuClass::Load], vec![FuClass::Int]];
        let mut s = StmState::new(&c);
        assert_eq!(s.assign_port(FuClass::Load), 0);
        assert_eq!(s.assign_port(FuClass::Load), 0);
        assert_eq!(s.assign_port(FuClass::Int), 1);
    }

    #[test]
    fn port_insert_keeps_age_order() {
        let mut p = Port::default();
        p.insert(ReadyEntry {
            uop: UopLoc { mop_seq: 2, uop_idx: 0 },
            uop_seq: 5,
            action_id: 0,
        });
        p.insert(ReadyEntry {
            uop: UopLoc { mop_seq: 1, uop_idx: 0 },
            uop_seq: 2,
            action_id: 0,
        });
        assert_eq!(p.ready[0].uop_seq, 2);
        assert_eq!(p.ready[1].uop_seq, 5);
    }
}
