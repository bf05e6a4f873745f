//! The per-core simulation loop: owns every structure the
//! pipeline stages above operate on and drives them in "backward"
//! per-cycle order — commit, then execute, then alloc,
//! then decode/fetch — so no stage observes a same-cycle write made
//! by a stage that logically comes after it.
//!
//! `Core` owns the oracle, the three structural queues, the selected
//! back-end, and the opaque collaborators.

use std::collections::VecDeque;

use tracing::trace;

use crate::common::constants::TickT;
use crate::common::error::CoreError;
use crate::config::Config;
use crate::core::pipeline::backend::shared::{commit, memory};
use crate::core::pipeline::cracker::Cracker;
use crate::core::pipeline::engine::BackendState;
use crate::core::pipeline::model::UopLoc;
use crate::core::pipeline::oracle::Oracle;
use crate::core::pipeline::{ldq::Ldq, rob::Rob, stq::Stq};
use crate::core::units::branch_predictor::BranchPredictor;
use crate::core::units::cache::CacheTlbPort;
use crate::core::units::repeater::Repeater;
use crate::core::units::translate::Translator;
use crate::external::feeder::{Feeder, FeederRecord, HandshakeResult};
use crate::stats::Stats;

/// One simulated core: the oracle's architectural state, the
/// structural queues (ROB/LDQ/STQ), the selected back-end, and the
/// opaque collaborators it drives each cycle. Every field besides
/// the collaborators is owned outright — no shared/interior-mutable
/// state crosses the `Core` boundary.
pub struct Core {
    pub now: TickT,
    pub config: Config,

    pub oracle: Oracle,
    pub rob: Rob,
    pub ldq: Ldq,
    pub stq: Stq,

    /// `None` only while a backend method is mid-call inside `step`
    /// (taken out so it can borrow `Core` mutably alongside itself);
    /// always `Some` otherwise.
    pub backend: Option<BackendState>,

    pub cracker: Box<dyn Cracker>,
    pub bp: Box<dyn BranchPredictor>,
    pub cache: Box<dyn CacheTlbPort>,
    pub repeater: Box<dyn Repeater>,
    pub translator: Box<dyn Translator>,
    pub feeder: Box<dyn Feeder>,

    pub stats: Stats,

    pub fetch_pc: u64,
    /// Uops that have cleared the alloc stage and are waiting to be
    /// admitted into a back-end's scheduling structures.
    pub alloc_queue: VecDeque<UopLoc>,
    /// Mop seq of the oldest not-yet-fully-allocated Mop.
    pub alloc_cursor: u64,
    /// A delayed branch recovery armed by `commit.jeclear_delay`
    /// (mop_seq, corrected_pc, fire_at_cycle).
    pub pending_jeclear: Option<(u64, u64, TickT)>,
    /// A feeder record `buffer_handshake` asked to see again later
    /// (`HandshakeResult::NotConsumed`).
    pub pending_feeder_record: Option<FeederRecord>,

    /// Last cycle any uop retired, for the deadlock watchdog.
    pub last_retire_cycle: TickT,
    /// Set by `commit::deadlock_check` whenever commit has been stalled
    /// past `config.deadlock_threshold`; cleared the cycle anything
    /// next retires. Never itself a hard error — `check_deadlock` is
    /// what actually acts on it, once it has held for
    /// `config.deadlock_grace_period` more cycles.
    pub deadlocked: bool,
    /// The cycle `deadlocked` most recently became true; `None` while
    /// clear.
    pub deadlock_since: Option<TickT>,
}

impl Core {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        feeder: Box<dyn Feeder>,
        cracker: Box<dyn Cracker>,
        bp: Box<dyn BranchPredictor>,
        cache: Box<dyn CacheTlbPort>,
        repeater: Box<dyn Repeater>,
        translator: Box<dyn Translator>,
        entry_pc: u64,
    ) -> Self {
        let backend = BackendState::new(&config);
        let oracle = Oracle::new(config.queues.rob_size.max(1));
        let rob = Rob::new(config.queues.rob_size);
        let ldq = Ldq::new(config.queues.ldq_size);
        let stq = Stq::new(config.queues.stq_size);
        Self {
            now: 0,
            config,
            oracle,
            rob,
            ldq,
            stq,
            backend: Some(backend),
            cracker,
            bp,
            cache,
            repeater,
            translator,
            feeder,
            stats: Stats::default(),
            fetch_pc: entry_pc,
            alloc_queue: VecDeque::new(),
            alloc_cursor: 0,
            pending_jeclear: None,
            pending_feeder_record: None,
            last_retire_cycle: 0,
            deadlocked: false,
            deadlock_since: None,
        }
    }

    /// One simulated cycle. Stages run in reverse pipeline order
    /// so that, e.g., commit frees a ROB slot before execute tries to
    /// issue into it, and alloc sees this cycle's completions before
    /// handing new uops to the back-end.
    pub fn step(&mut self) -> Result<(), CoreError> {
        self.apply_pending_jeclear()?;

        commit::commit_stage(self)?;
        self.check_deadlock()?;

        memory::agen_stage(self);
        schedule_loads(self);
        memory::issue_loads_to_cache(self);

        let mut backend = self.backend.take().ok_or(CoreError::ContractViolation {
            component: "Core::step",
            detail: "backend taken re-entrantly".to_string(),
        })?;
        let outcome = backend.execute(self)?;
        self.backend = Some(backend);

        let resolve_nuke = resolve_memory_completions(self);
        let nuke = outcome.nuke.or(resolve_nuke);
        if let Some(boundary) = nuke {
            trace!(boundary, now = self.now, "memory-order nuke");
            memory_nuke_recover(self, boundary)?;
            self.stats.note_load_nuke();
        } else if let Some((mop_seq, new_pc)) = outcome.mispredict {
            self.handle_mispredict(mop_seq, new_pc)?;
        }

        alloc_stage(self);
        self.fetch_decode_stage()?;

        self.now += 1;
        Ok(())
    }

    fn apply_pending_jeclear(&mut self) -> Result<(), CoreError> {
        if let Some((mop_seq, new_pc, fire_at)) = self.pending_jeclear {
            if self.now >= fire_at {
                self.pending_jeclear = None;
                branch_recover(self, mop_seq, new_pc)?;
            }
        }
        Ok(())
    }

    /// If a control uop's oracle-determined next-PC differs from its
    /// predicted NPC, immediately issue a `pipe_recover` — delayed by
    /// `commit.jeclear_delay` cycles if configured
    /// (`JECLEAR_INFLIGHT`).
    fn handle_mispredict(&mut self, mop_seq: u64, new_pc: u64) -> Result<(), CoreError> {
        let delay = self.config.commit.jeclear_delay;
        if delay == 0 {
            branch_recover(self, mop_seq, new_pc)?;
        } else {
            if let Some(mop) = self.oracle.mopq.get_mut(mop_seq) {
                mop.jeclear_in_flight = true;
            }
            self.pending_jeclear = Some((mop_seq, new_pc, self.now + delay));
        }
        Ok(())
    }

    /// Fetch/decode: pull one record from the feeder (or retry a
    /// previously-deferred one), hand it through the oracle's
    /// handshake/exec pair, and re-steer `fetch_pc` to the new Mop's
    /// predicted next PC. One Mop decoded per cycle — the x86 decoder
    /// itself is an external collaborator; `cracker` here is
    /// whatever stand-in the embedder supplied.
    fn fetch_decode_stage(&mut self) -> Result<(), CoreError> {
        if !self.oracle.is_drained_ready_to_fetch() {
            return Ok(());
        }
        if self.oracle.mopq.is_full() {
            return Ok(());
        }

        let record = match self.pending_feeder_record.take() {
            Some(r) => r,
            None => match self.feeder.next_record() {
                Some(r) => r,
                None => return Ok(()),
            },
        };

        let buffered = match self.oracle.buffer_handshake(record.clone()) {
            HandshakeResult::AllGood => true,
            HandshakeResult::NotConsumed => {
                self.pending_feeder_record = Some(record);
                true
            }
            HandshakeResult::NotNeeded => false,
        };
        if !buffered {
            return Ok(());
        }

        let now = self.now;
        let fetch_pc = self.fetch_pc;
        let fusion = self.config.exec.fusion;
        let seq = self
            .oracle
            .exec(fetch_pc, now, self.cracker.as_mut(), self.bp.as_mut(), &fusion)?;
        if let Some(mop) = self.oracle.mopq.get(seq) {
            self.fetch_pc = mop.npc_pred;
        }
        Ok(())
    }

    /// Grace-period deadlock watchdog: once `commit::deadlock_check`
    /// has flagged `deadlocked` for `config.deadlock_grace_period`
    /// cycles straight, force a flush from the oldest still-live Mop so
    /// the pipeline has a chance to make progress again, rather than
    /// reporting a hard error out of `step`.
    fn check_deadlock(&mut self) -> Result<(), CoreError> {
        if !self.deadlocked {
            return Ok(());
        }
        let Some(since) = self.deadlock_since else {
            return Ok(());
        };
        if self.now.saturating_sub(since) < self.config.deadlock_grace_period {
            return Ok(());
        }
        if self.oracle.mopq.num() == 0 {
            // Nothing live to flush; the watchdog can't help here.
            self.deadlocked = false;
            self.deadlock_since = None;
            return Ok(());
        }
        let oldest = self.oracle.mopq.head_seq();
        let refetch_pc = self.oracle.mopq.get(oldest).map_or(self.fetch_pc, |m| m.pc);
        trace!(oldest, now = self.now, "deadlock grace period expired, forcing recovery");
        super::super::core::pipeline::backend::shared::recovery::recover(self, oldest.saturating_sub(1), refetch_pc)?;
        self.stats.note_deadlock_flush();
        self.deadlocked = false;
        self.deadlock_since = None;
        self.last_retire_cycle = self.now;
        Ok(())
    }
}

fn branch_recover(core: &mut Core, mop_seq: u64, new_pc: u64) -> Result<(), CoreError> {
    super::super::core::pipeline::backend::shared::recovery::recover(core, mop_seq, new_pc)
}

fn memory_nuke_recover(core: &mut Core, boundary_seq: u64) -> Result<(), CoreError> {
    // A memory-order nuke squashes everything from the offending load
    // onward and refetches from that load's own Mop, so the refetch
    // PC is simply the next Mop's pc.
    let refetch_pc = core
        .oracle
        .mopq
        .get(boundary_seq + 1)
        .map_or(core.fetch_pc, |m| m.pc);
    super::super::core::pipeline::backend::shared::recovery::recover(core, boundary_seq, refetch_pc)
}

/// Per-cycle load-issue gate: wake idep slot 1 (reserved for the
/// memory-order check, never bound to a register by the cracker) once
/// `may_issue_load` clears a load to enter its functional unit. Slot 0
/// still carries the uop's real register idep, if any.
fn schedule_loads(core: &mut Core) {
    let now = core.now;
    for idx in core.ldq.indices_oldest_first() {
        let Some(entry) = core.ldq.get(idx) else { continue };
        if !entry.addr_valid() {
            continue;
        }
        let loc = entry.uop;
        let already_woken = core
            .oracle
            .mopq
            .get(loc.mop_seq)
            .and_then(|m| m.uops.get(loc.uop_idx as usize))
            .is_some_and(|u| u.ivalue_valid[1]);
        if already_woken {
            continue;
        }
        if memory::may_issue_load(core, loc) {
            if let Some(mop) = core.oracle.mopq.get_mut(loc.mop_seq) {
                if let Some(u) = mop.uops.get_mut(loc.uop_idx as usize) {
                    u.wake_idep(1, now);
                }
            }
        }
    }
}

/// STA/STD resolution: drive address/value resolution for every
/// live store whose owning uop completed this cycle, returning a
/// memory-order nuke boundary if one fired.
fn resolve_memory_completions(core: &mut Core) -> Option<u64> {
    let start = core.stq.youngest_live_index()?;
    let mut nuke = None;
    for idx in core.stq.walk_back_from(start) {
        let Some(entry) = core.stq.get(idx) else { continue };
        let sta = entry.sta;
        let std = entry.std;
        let addr_valid = entry.addr_valid;
        let value_valid = entry.value_valid;

        if !addr_valid {
            if let Some(loc) = sta {
                if uop_completed_now(core, loc) {
                    let mut outcome = crate::core::pipeline::engine::ExecuteOutcome::default();
                    memory::on_sta_resolved(core, loc, &mut outcome);
                    if outcome.nuke.is_some() {
                        nuke = outcome.nuke;
                    }
                }
            }
        }
        if !value_valid {
            if let Some(loc) = std {
                if uop_completed_now(core, loc) {
                    memory::on_std_resolved(core, loc);
                }
            }
        }
    }
    nuke
}

fn uop_completed_now(core: &Core, loc: UopLoc) -> bool {
    core.oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .is_some_and(|u| u.timing.when_completed == core.now)
}

/// Alloc: walk newly-decoded Mops in program order, handing each
/// uop an ROB slot (one per fusion group) and, for loads/stores, an
/// LDQ/STQ slot, then push it onto `alloc_queue` for the back-end to
/// pick up. Stalls (structural overflow) stop the whole walk at the
/// first blocked Mop, preserving program order.
fn alloc_stage(core: &mut Core) {
    loop {
        let seq = core.alloc_cursor;
        if seq >= core.oracle.mopq.next_seq() {
            break;
        }
        let Some(flow_length) = core.oracle.mopq.get(seq).map(|m| m.flow_length) else {
            core.alloc_cursor += 1;
            continue;
        };

        let mut idx = 0u32;
        let mut stalled = false;
        while idx < flow_length {
            let already = core
                .oracle
                .mopq
                .get(seq)
                .and_then(|m| m.uops.get(idx as usize))
                .is_some_and(|u| u.rob_index.is_some());
            if already {
                let group_len = core.oracle.mopq.get(seq).map_or(1, |m| m.fusion_group_len(idx as usize) as u32);
                idx += group_len.max(1);
                continue;
            }
            match alloc_one_group(core, seq, idx) {
                Ok(advance) => idx += advance.max(1),
                Err(_) => {
                    stalled = true;
                    break;
                }
            }
        }

        if stalled {
            break;
        }
        core.alloc_cursor += 1;
    }
}

struct MemberSnapshot {
    is_load: bool,
    is_sta: bool,
    mem_size: u8,
    uop_seq: u64,
}

fn snapshot(core: &Core, seq: u64, idx: u32) -> Option<MemberSnapshot> {
    core.oracle.mopq.get(seq).and_then(|m| m.uops.get(idx as usize)).map(|u| MemberSnapshot {
        is_load: u.flags.is_load,
        is_sta: u.flags.is_sta,
        mem_size: u.mem_size,
        uop_seq: u.uop_seq,
    })
}

/// Allocate one fusion group's worth of uops starting at `idx`,
/// atomically: either every structural resource the group needs is
/// free and everything is written back, or nothing is (so a stall
/// never leaves partial state for the resume check to trip over).
fn alloc_one_group(core: &mut Core, seq: u64, idx: u32) -> Result<u32, CoreError> {
    let now = core.now;
    let group_len = core
        .oracle
        .mopq
        .get(seq)
        .map_or(1, |m| m.fusion_group_len(idx as usize) as u32);
    let head_loc = UopLoc { mop_seq: seq, uop_idx: idx };

    if core.rob.is_full() {
        return Err(CoreError::StructuralOverflow {
            resource: "ROB",
            capacity: core.rob.capacity(),
        });
    }

    let members: Vec<MemberSnapshot> = (idx..idx + group_len).filter_map(|i| snapshot(core, seq, i)).collect();
    for m in &members {
        if m.is_load && core.ldq.is_full() {
            return Err(CoreError::StructuralOverflow {
                resource: "LDQ",
                capacity: core.ldq.capacity(),
            });
        }
        if m.is_sta && core.stq.is_full() {
            core.stats.note_stall(crate::stats::StallReason::Stq);
            return Err(CoreError::StructuralOverflow {
                resource: "STQ",
                capacity: core.stq.capacity(),
            });
        }
    }

    let rob_slot = core.rob.allocate(head_loc, group_len)? as u32;
    let action_id = core.oracle.action_id();

    for (offset, m) in members.iter().enumerate() {
        let i = idx + offset as u32;
        let loc = UopLoc { mop_seq: seq, uop_idx: i };
        let mut ldq_index = None;
        let mut stq_index = None;

        if m.is_load {
            let store_color = core.stq.youngest_live_index().map(|i| i as u32);
            ldq_index = Some(core.ldq.allocate(loc, m.mem_size, store_color, action_id)? as u32);
        }
        if m.is_sta {
            let std_idx = i + 1;
            let std_loc = UopLoc { mop_seq: seq, uop_idx: std_idx };
            let slot = core.stq.allocate(loc, std_loc, m.uop_seq, m.mem_size, action_id)? as u32;
            stq_index = Some(slot);
            if let Some(mop) = core.oracle.mopq.get_mut(seq) {
                if let Some(u) = mop.uops.get_mut(std_idx as usize) {
                    u.stq_index = Some(slot);
                }
            }
        }

        if let Some(mop) = core.oracle.mopq.get_mut(seq) {
            if let Some(u) = mop.uops.get_mut(i as usize) {
                u.rob_index = Some(rob_slot);
                if ldq_index.is_some() {
                    u.ldq_index = ldq_index;
                }
                if stq_index.is_some() {
                    u.stq_index = stq_index;
                }
                if m.is_load {
                    // Reserve idep slot 1 as the memory-order gate;
                    // `schedule_loads` wakes it once `may_issue_load`
                    // clears this load against the STQ.
                    u.rearm_idep(1);
                }
                u.timing.when_allocated = now;
            }
        }
        core.alloc_queue.push_back(loc);
    }
    Ok(group_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::pipeline::cracker::StubCracker;
    use crate::core::units::branch_predictor::StaticNotTakenPredictor;
    use crate::core::units::cache::FixedLatencyPort;
    use crate::core::units::repeater::NullRepeater;
    use crate::core::units::translate::FlatTranslator;
    use crate::external::feeder::{FeederFlags, FeederRecord, TraceFeeder};

    fn record(pc: u64) -> FeederRecord {
        FeederRecord {
            pc,
            npc: pc + 4,
            tpc: 0,
            flags: FeederFlags {
                real: true,
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

    fn new_core(records: Vec<FeederRecord>) -> Core {
        Core::new(
            Config::default(),
            Box::new(TraceFeeder::new(records)),
            Box::new(StubCracker),
            Box::new(StaticNotTakenPredictor::default()),
            Box::new(FixedLatencyPort::new(1)),
            Box::new(NullRepeater::default()),
            Box::new(FlatTranslator::new()),
            0x1000,
        )
    }

    #[test]
    fn a_fetched_alu_mop_retires_within_a_few_cycles() {
        let mut core = new_core(vec![record(0x1000), record(0x1004), record(0x1008)]);
        for _ in 0..32 {
            core.step().unwrap();
        }
        assert!(core.stats.num_insn_committed >= 1);
    }

    #[test]
    fn deadlock_flag_raises_without_erroring_the_cycle() {
        let mut core = new_core(vec![]);
        core.config.deadlock_threshold = 4;
        for _ in 0..10 {
            core.step().unwrap();
        }
        assert!(core.deadlocked);
        assert!(core.deadlock_since.is_some());
    }

    #[test]
    fn deadlock_grace_period_clears_the_flag_once_it_expires() {
        let mut core = new_core(vec![]);
        core.config.deadlock_threshold = 2;
        core.config.deadlock_grace_period = 3;
        for _ in 0..20 {
            core.step().unwrap();
        }
        // Nothing was ever fetched, so there's no live Mop to flush;
        // the watchdog still clears itself rather than spinning forever.
        assert!(!core.deadlocked);
        assert!(core.deadlock_since.is_none());
    }
}
