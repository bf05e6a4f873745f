//! The oracle: sole source of truth for architectural state and for
//! the in-flight program graph.
//!
//! The allocation-ordering discipline throughout — capture a uop's
//! producer tag before its own rename-map write takes effect —
//! generalizes cleanly from a single-producer scoreboard to the
//! ordered-list [`RenameMap`].

use tracing::trace;

use crate::common::constants::{MAX_IDEPS, TICK_T_MAX, TickT};
use crate::common::error::CoreError;
use crate::config::{FuClass, FusionConfig};
use crate::external::feeder::{FeederRecord, HandshakeResult};

use super::cracker::{Cracker, UopTemplate};
use super::model::{Mop, OdepPool, SlipStats, Timing, Uop, UopLoc};
use super::mopq::MopQueue;
use super::rename_map::RenameMap;
use crate::core::units::branch_predictor::{BranchPredictor, OpFlags, StateCacheHandle};

/// The oracle's mutable state. Everything else (feeder cursor,
/// translator, cache hierarchy) is owned one layer up by
/// [`crate::sim::core_sim::Core`] and handed in per call — the oracle
/// owns Mops, and uops live inside Mops, nothing else; no owning
/// references back out to the caller's collaborators.
pub struct Oracle {
    pub mopq: MopQueue,
    pub rename_map: RenameMap,
    pub odep_pool: OdepPool,
    action_id_counter: u64,
    next_uop_seq: u64,
    /// True once fetch has diverged from the feeder's declared
    /// next-PC and we're manufacturing NOPs rather than consulting it.
    pub spec_mode: bool,
    /// Set when the absorbed Mop was a trap, so no further fetches
    /// happen until commit clears it.
    pub drain: bool,
    /// Records not yet turned into a Mop, staged by `buffer_handshake`
    /// ahead of `exec` — the shadow queue that buffers raw feeder
    /// records before they are turned into Mops.
    pending: std::collections::VecDeque<(FeederRecord, bool)>,
    /// Idep bindings computed by `install_dependencies` for the Mop
    /// currently being installed, consumed by the matching
    /// `finish_install` call. Staged here rather than threaded through
    /// return values because the bindings reference `UopLoc`s that
    /// only become resolvable once the Mop has a home in the `MopQueue`.
    pending_idep_bindings: Vec<(UopLoc, [Option<UopLoc>; MAX_IDEPS])>,
}

impl Oracle {
    pub fn new(mopq_capacity: usize) -> Self {
        Self {
            mopq: MopQueue::new(mopq_capacity),
            rename_map: RenameMap::new(),
            odep_pool: OdepPool::new(),
            action_id_counter: 0,
            next_uop_seq: 0,
            spec_mode: false,
            drain: false,
            pending: std::collections::VecDeque::new(),
            pending_idep_bindings: Vec::new(),
        }
    }

    pub fn action_id(&self) -> u64 {
        self.action_id_counter
    }

    fn fresh_uop_seq(&mut self) -> u64 {
        let s = self.next_uop_seq;
        self.next_uop_seq += 1;
        s
    }

    /// Receive one feeder record, routing it to the shadow queue or
    /// synthesizing a NOP as speculation requires.
    pub fn buffer_handshake(&mut self, record: FeederRecord) -> HandshakeResult {
        let want_speculative = self.spec_mode;
        if want_speculative && record.flags.real && !record.flags.speculative {
            // We want a speculative placeholder but the feeder gave a
            // committed, real instruction: synthesize a NOP instead
            // and ask for this record again later.
            self.pending.push_back((synth_nop_record(), true));
            trace!(pc = record.pc, "buffer_handshake: not consumed, synthesized NOP");
            return HandshakeResult::NotConsumed;
        }
        if !want_speculative && record.flags.speculative {
            trace!(pc = record.pc, "buffer_handshake: speculative record not needed");
            return HandshakeResult::NotNeeded;
        }
        self.pending.push_back((record, want_speculative));
        HandshakeResult::AllGood
    }

    /// Consume the next shadow-queue entry whose feeder PC matches
    /// `fetch_pc`, crack it, and install its dependency edges.
    #[allow(clippy::too_many_arguments)]
    pub fn exec(
        &mut self,
        fetch_pc: u64,
        now: TickT,
        cracker: &mut dyn Cracker,
        bp: &mut dyn BranchPredictor,
        fusion: &FusionConfig,
    ) -> Result<u64, CoreError> {
        let Some((record, speculative)) = self.pending.pop_front() else {
            return Err(CoreError::StructuralOverflow {
                resource: "shadow queue",
                capacity: 0,
            });
        };

        let desync = !speculative && record.pc != fetch_pc;
        if desync {
            trace!(fetch_pc, feeder_pc = record.pc, "feeder desync corrected");
        }

        let templates = cracker.crack(&record);
        let (pred_npc, bp_handle) = if record.flags.real || speculative {
            let opflags = OpFlags::default();
            bp.lookup(opflags, record.pc, record.pc + 4, record.tpc, record.npc, record.flags.br_taken)
        } else {
            (record.npc, bp.get_state_cache())
        };

        let seq = self.mopq.next_seq();
        let mut uops = self.build_uops(seq, &templates, now);
        apply_fusion(fusion, &mut uops);

        let mut raw_bytes = [0u8; crate::common::constants::MAX_ILEN];
        let copy_len = record.ins_len.min(crate::common::constants::MAX_ILEN as u8) as usize;
        raw_bytes[..copy_len].copy_from_slice(&record.ins[..copy_len]);

        let num_loads = uops.iter().filter(|u| u.flags.is_load).count() as u32;
        let num_mem_refs = uops
            .iter()
            .filter(|u| u.flags.is_load || u.flags.is_sta || u.flags.is_std)
            .count() as u32;
        let num_branches = u32::from(record.flags.valid && is_ctrl_record(&record));

        let mop = Mop {
            seq,
            pc: record.pc,
            npc_pred: pred_npc,
            // The oracle already knows the real outcome the feeder
            // reported; the backend just doesn't act on it until the
            // control uop completes and issues a pipe_recover then,
            // not at decode.
            npc_actual: Some(record.npc),
            tpc: record.tpc,
            is_ctrl: is_ctrl_record(&record),
            is_trap: false,
            is_rep: false,
            branch_taken: record.flags.br_taken,
            asid: record.asid,
            speculative,
            raw_len: copy_len as u8,
            raw_bytes,
            flow_length: uops.len() as u32,
            num_eff_uops: uops.len() as u32,
            num_branches,
            num_mem_refs,
            num_loads,
            complete_index: 0,
            commit_index: 0,
            when_fetched: now,
            when_decoded: now,
            when_commit_started: TICK_T_MAX,
            jeclear_in_flight: false,
            slip: SlipStats::default(),
            bp_state: Some(bp_handle.0),
            uops,
        };

        self.install_dependencies(&mop.uops);

        self.mopq.push(mop, record, speculative)?;
        self.finish_install(seq)?;
        Ok(seq)
    }

    fn build_uops(&mut self, mop_seq: u64, templates: &[UopTemplate], now: TickT) -> Vec<Uop> {
        templates
            .iter()
            .enumerate()
            .map(|(idx, tpl)| {
                let mut u = Uop {
                    uop_seq: self.fresh_uop_seq(),
                    mop_seq,
                    idx_in_mop: idx as u32,
                    fu_class: tpl.fu_class,
                    mem_size: tpl.mem_size,
                    flags: tpl.flags,
                    idep: [None; MAX_IDEPS],
                    idep_regs: tpl.idep_regs,
                    ivalue_valid: [true; MAX_IDEPS],
                    odep_regs: tpl.odep_regs,
                    odep_head: None,
                    rob_index: None,
                    ldq_index: None,
                    stq_index: None,
                    port_assignment: -1,
                    action_id: self.action_id_counter,
                    ovalue: 0,
                    ovalue_valid: false,
                    num_replays: 0,
                    in_ready_q: false,
                    fusion_size: 0,
                    fusion_next: None,
                    timing: Timing {
                        when_decoded: now,
                        ..Timing::default()
                    },
                };
                u.init_idep_arity(tpl.arity());
                u
            })
            .collect()
    }

    /// Graph construction: for each idep register name look up the
    /// youngest producer and store a back-pointer plus an odep edge;
    /// for each odep register name, append self to the rename map.
    fn install_dependencies(&mut self, uops: &[Uop]) {
        // Two passes over a borrowed copy of locations: the first
        // collects idep bindings (reads rename_map as-is, i.e. state
        // from *before* this Mop), the second installs odep mappings.
        // This preserves "look up the youngest producer" semantics
        // even for a Mop with internal producer/consumer pairs,
        // matching the oracle's per-uop, left-to-right crack order.
        let mut idep_bindings: Vec<(UopLoc, [Option<UopLoc>; MAX_IDEPS])> = Vec::with_capacity(uops.len());
        for u in uops {
            let mut binds = [None; MAX_IDEPS];
            for (i, reg) in u.idep_regs.iter().enumerate() {
                if let Some(reg) = reg {
                    binds[i] = self.rename_map.youngest_producer(*reg);
                }
            }
            idep_bindings.push((u.loc(), binds));
            for reg in u.odep_regs.iter().flatten() {
                self.rename_map.install(*reg, u.loc());
            }
        }
        self.pending_idep_bindings = idep_bindings;
    }

    /// After pushing a Mop, bind the idep back-pointers and odep
    /// edges computed by `install_dependencies`. Split into a
    /// second phase because `Mop::uops` needs to already live in the
    /// `MopQueue` before the oracle can hand out stable `UopLoc`
    /// references that survive past this call.
    fn finish_install(&mut self, seq: u64) -> Result<(), CoreError> {
        let bindings = std::mem::take(&mut self.pending_idep_bindings);
        let mop = self.mopq.get_mut(seq).ok_or(CoreError::ContractViolation {
            component: "Oracle::finish_install",
            detail: format!("Mop seq {seq} missing after push"),
        })?;
        for (loc, binds) in bindings {
            let uop = &mut mop.uops[loc.uop_idx as usize];
            uop.idep = binds;
            // A named idep with no producer in the rename map reads an
            // architectural value older than anything this core is
            // tracking — already resolved, not waiting on anyone.
            for slot in 0..MAX_IDEPS {
                if uop.idep_regs[slot].is_some() && uop.idep[slot].is_none() {
                    uop.ivalue_valid[slot] = true;
                    uop.timing.when_ival_ready[slot] = 0;
                }
            }
            uop.timing.recompute_ready();
        }
        for i in 0..mop.uops.len() {
            for slot in 0..MAX_IDEPS {
                if let Some(parent_loc) = mop.uops[i].idep[slot] {
                    // Parent lives in an earlier Mop or earlier in this
                    // same Mop; either way its odep list gets a new
                    // head pushed in the owning uop's free-pool chain.
                    let child_loc = UopLoc {
                        mop_seq: seq,
                        uop_idx: i as u32,
                    };
                    if parent_loc.mop_seq == seq {
                        let parent_head = mop.uops[parent_loc.uop_idx as usize].odep_head;
                        let new_head = self.odep_pool.push_front(parent_head, child_loc, slot as u8);
                        mop.uops[parent_loc.uop_idx as usize].odep_head = Some(new_head);
                    } else if let Some(parent_mop) = self.mopq.get_mut(parent_loc.mop_seq) {
                        let parent_head = parent_mop.uops[parent_loc.uop_idx as usize].odep_head;
                        let new_head = self.odep_pool.push_front(parent_head, child_loc, slot as u8);
                        parent_mop.uops[parent_loc.uop_idx as usize].odep_head = Some(new_head);
                    }
                }
            }
        }
        Ok(())
    }

    /// Acknowledge that the front end has absorbed `Mop`.
    pub fn consume(&mut self, seq: u64) -> Result<(), CoreError> {
        let mop = self.mopq.get(seq).ok_or(CoreError::ContractViolation {
            component: "Oracle::consume",
            detail: format!("Mop seq {seq} not found"),
        })?;
        if mop.is_trap {
            self.drain = true;
        }
        Ok(())
    }

    /// Retire one uop: remove its outgoing dependency edges and its
    /// rename-map entries.
    pub fn commit_uop(&mut self, loc: UopLoc) -> Result<(), CoreError> {
        let mop = self.mopq.get_mut(loc.mop_seq).ok_or(CoreError::ContractViolation {
            component: "Oracle::commit_uop",
            detail: format!("Mop seq {} not found", loc.mop_seq),
        })?;
        let uop = mop.uops.get_mut(loc.uop_idx as usize).ok_or(CoreError::ContractViolation {
            component: "Oracle::commit_uop",
            detail: "uop index out of range".to_string(),
        })?;
        let head = uop.odep_head.take();
        let odep_regs = uop.odep_regs;
        self.odep_pool.release_chain(head);
        for reg in odep_regs.into_iter().flatten() {
            self.rename_map.commit(reg, loc)?;
        }
        Ok(())
    }

    /// Retire the head Mop once its last uop has committed.
    pub fn commit(&mut self, seq: u64) -> Result<Mop, CoreError> {
        if self.mopq.head_seq() != seq {
            return Err(CoreError::ContractViolation {
                component: "Oracle::commit",
                detail: format!("commit seq {seq} is not the MopQ head ({})", self.mopq.head_seq()),
            });
        }
        let mop = self.mopq.commit_head()?;
        if mop.is_trap {
            self.drain = false;
        }
        Ok(mop)
    }

    /// Undo everything younger than `boundary_seq`, youngest first.
    pub fn recover(&mut self, boundary_seq: u64, bp: &mut dyn BranchPredictor) -> Result<(), CoreError> {
        let popped = self.mopq.pop_tail_after(boundary_seq);
        for mop in popped {
            for uop in mop.uops.iter().rev() {
                for reg in uop.odep_regs.into_iter().flatten() {
                    self.rename_map.undo(reg, uop.loc())?;
                }
                for (slot, idep) in uop.idep.iter().enumerate().filter_map(|(s, d)| d.map(|d| (s, d))) {
                    if let Some(parent_mop) = self.mopq.get_mut(idep.mop_seq) {
                        if let Some(parent) = parent_mop.uops.get_mut(idep.uop_idx as usize) {
                            let head = parent.odep_head.take();
                            let remaining = self.odep_pool.remove(head, uop.loc(), slot as u8);
                            parent.odep_head = remaining;
                        }
                    }
                }
                self.action_id_counter += 1;
            }
            if let Some(h) = mop.bp_state {
                bp.return_state_cache(StateCacheHandle(h));
            }
        }
        self.spec_mode = self
            .mopq
            .get(self.mopq.next_seq().saturating_sub(1))
            .is_some_and(|m| m.speculative);
        Ok(())
    }

    /// Recover from a branch mispredict. The caller is responsible
    /// for resteering fetch to `new_pc` (or enqueuing a delayed
    /// jeclear); the oracle's half is the state recovery to
    /// just-after-`Mop`.
    pub fn pipe_recover(&mut self, boundary_seq: u64, bp: &mut dyn BranchPredictor) -> Result<(), CoreError> {
        self.recover(boundary_seq, bp)
    }

    /// Recover from a memory-order nuke: squash everything including
    /// `Mop` (recover to its predecessor).
    pub fn pipe_flush(&mut self, mop_seq: u64, bp: &mut dyn BranchPredictor) -> Result<(), CoreError> {
        self.recover(mop_seq.saturating_sub(1), bp)
    }

    /// Empty both queues for a context switch or checkpoint restore.
    pub fn complete_flush(&mut self, bp: &mut dyn BranchPredictor) {
        self.mopq.complete_flush();
        self.rename_map.clear();
        self.pending.clear();
        self.spec_mode = false;
        self.drain = false;
        bp.flush();
    }

    pub fn is_drained_ready_to_fetch(&self) -> bool {
        !self.drain
    }
}

fn synth_nop_record() -> FeederRecord {
    FeederRecord {
        pc: 0,
        npc: 0,
        tpc: 0,
        flags: crate::external::feeder::FeederFlags {
            speculative: true,
            valid: true,
            ..crate::external::feeder::FeederFlags::default()
        },
        asid: 0,
        ins: [0; crate::common::constants::MAX_ILEN],
        ins_len: 1,
        mem_buffer: Vec::new(),
        profile_id: 0,
    }
}

fn is_ctrl_record(record: &FeederRecord) -> bool {
    record.npc != record.pc.wrapping_add(u64::from(record.ins_len.max(1)))
}

/// Fusion: walk the cracked uop vector and mark consecutive
/// uops as a fusion group per the configured rules. Only the simplest
/// adjacent load-op and op-store pairs are modeled; a three-way
/// load-op-store fusion additionally requires `fusion.load_op_store`.
fn apply_fusion(cfg: &FusionConfig, uops: &mut [Uop]) {
    let mut i = 0;
    while i + 1 < uops.len() {
        let can_load_op = cfg.load_op && uops[i].flags.is_load && uops[i + 1].fu_class == FuClass::Int;
        let can_op_store = cfg.op_store && uops[i].fu_class == FuClass::Int && uops[i + 1].flags.is_sta;
        if !can_load_op && !can_op_store {
            i += 1;
            continue;
        }
        let mut group_len = 2usize;
        if cfg.load_op_store && can_load_op && i + 2 < uops.len() && uops[i + 2].flags.is_sta {
            group_len = 3;
        }
        uops[i].flags.is_fusion_head = true;
        uops[i].flags.in_fusion = true;
        uops[i].fusion_size = group_len as u8;
        for (k, idx) in (i + 1..i + group_len).enumerate() {
            uops[idx].flags.in_fusion = true;
            uops[i + k].fusion_next = Some((i + k + 1) as u32);
        }
        i += group_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::branch_predictor::StaticNotTakenPredictor;
    use crate::external::feeder::FeederFlags;

    fn record(pc: u64, real: bool, speculative: bool) -> FeederRecord {
        FeederRecord {
            pc,
            npc: pc + 4,
            tpc: 0,
            flags: FeederFlags {
                real,
                speculative,
                valid: true,
                ..FeederFlags::default()
            },
            asid: 0,
            ins: [0; crate::common::constants::MAX_ILEN],
            ins_len: 4,
            mem_buffer: Vec::new(),
            profile_id: 0,
        }
    }

    #[test]
    fn handshake_all_good_on_matching_expectation() {
        let mut o = Oracle::new(16);
        let r = record(0x1000, true, false);
        assert_eq!(o.buffer_handshake(r), HandshakeResult::AllGood);
    }

    #[test]
    fn speculative_record_dropped_when_not_wanted() {
        let mut o = Oracle::new(16);
        let r = record(0x1000, false, true);
        assert_eq!(o.buffer_handshake(r), HandshakeResult::NotNeeded);
    }

    #[test]
    fn idep_with_no_producer_is_immediately_ready() {
        let mut o = Oracle::new(16);
        let mut cracker = crate::core::pipeline::cracker::StubCracker;
        let mut bp = StaticNotTakenPredictor::default();
        let fusion = FusionConfig::default();

        o.buffer_handshake(record(0x1000, true, false));
        let seq0 = o.exec(0x1000, 0, &mut cracker, &mut bp, &fusion).unwrap();

        let mop = o.mopq.get(seq0).unwrap();
        assert!(mop.uops[0].is_ready(0));
    }

    #[test]
    fn exec_then_finish_install_links_alu_chain() {
        let mut o = Oracle::new(16);
        let mut cracker = crate::core::pipeline::cracker::StubCracker;
        let mut bp = StaticNotTakenPredictor::default();
        let fusion = FusionConfig::default();

        o.buffer_handshake(record(0x1000, true, false));
        let _seq0 = o.exec(0x1000, 0, &mut cracker, &mut bp, &fusion).unwrap();

        o.buffer_handshake(record(0x1004, true, false));
        let seq1 = o.exec(0x1004, 1, &mut cracker, &mut bp, &fusion).unwrap();

        let producer = o.rename_map.youngest_producer(super::super::model::RegName(2));
        assert_eq!(
            producer,
            Some(UopLoc {
                mop_seq: seq1,
                uop_idx: 0
            })
        );
    }

    #[test]
    fn recover_undoes_youngest_mop_rename_entries() {
        let mut o = Oracle::new(16);
        let mut cracker = crate::core::pipeline::cracker::StubCracker;
        let mut bp = StaticNotTakenPredictor::default();
        let fusion = FusionConfig::default();

        o.buffer_handshake(record(0x1000, true, false));
        let seq0 = o.exec(0x1000, 0, &mut cracker, &mut bp, &fusion).unwrap();

        o.buffer_handshake(record(0x1004, true, false));
        let _seq1 = o.exec(0x1004, 1, &mut cracker, &mut bp, &fusion).unwrap();

        o.recover(seq0, &mut bp).unwrap();
        assert_eq!(o.mopq.num(), 1);
        let producer = o.rename_map.youngest_producer(super::super::model::RegName(2));
        assert_eq!(
            producer,
            Some(UopLoc {
                mop_seq: seq0,
                uop_idx: 0
            })
        );
    }
}
