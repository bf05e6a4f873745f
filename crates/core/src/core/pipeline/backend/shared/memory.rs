//! Memory-ordering logic shared by both back-ends: load scheduling
//! against the STQ, store-to-load forwarding, the STA-unknown
//! memory-dependence policy, and the cache/TLB round-trip for both
//! loads and senior stores, addressed through the ring-addressed
//! [`Stq`]/[`Ldq`] pair and the opaque [`CacheTlbPort`]/[`Repeater`]/
//! [`Translator`] collaborators.
//!
//! A real variable-latency cache hierarchy is someone else's problem;
//! this module only decides *when* a load may issue, routes it and a
//! senior store through [`CacheTlbPort`]/[`Repeater`], and reacts to
//! whatever they report back — not how long an access actually takes.

use crate::common::addr::{ByteRange, VirtAddr};
use crate::common::constants::{LINE_BYTES, TickT, TICK_T_MAX};
use crate::common::data::MemOp;
use crate::config::{Backend, MemDepPolicy};
use crate::core::pipeline::model::UopLoc;
use crate::core::units::cache::CacheEvent;
use crate::core::units::repeater::RepeaterEvent;
use crate::external::feeder::MemOperand;

use super::super::engine::ExecuteOutcome;
use super::{snatch_back_dependents, wake_dependents};
use crate::sim::core_sim::Core;

/// DTLB translation queue.
const DTLB_LEVEL: u8 = 0;
/// DL1 data queue.
const DL1_LEVEL: u8 = 1;

/// The memory operand a load/store uop corresponds to, recovered from
/// the Mop's shadow feeder record by counting how many earlier
/// `mem_buffer` entries are already fully accounted for by preceding
/// uops — the cracker emits one uop per `mem_buffer` entry for a load
/// record, or one sta/std pair per entry for a store record, so
/// counting completions (`is_load` or `is_std`)
/// rather than starts gives an sta the same ordinal as its paired std.
fn mem_operand_for(core: &Core, loc: UopLoc) -> Option<MemOperand> {
    let mop = core.oracle.mopq.get(loc.mop_seq)?;
    let record = core.oracle.mopq.shadow_record(loc.mop_seq)?;
    let ordinal = mop.uops[..loc.uop_idx as usize]
        .iter()
        .filter(|u| u.flags.is_load || u.flags.is_std)
        .count();
    record.mem_buffer.get(ordinal).copied()
}

/// AGEN: resolve address + physical translation for every
/// not-yet-addressed LDQ entry, oldest first.
pub fn agen_stage(core: &mut Core) {
    for idx in core.ldq.indices_oldest_first() {
        resolve_one(core, idx);
    }
}

fn resolve_one(core: &mut Core, idx: usize) {
    let Some(entry) = core.ldq.get(idx) else { return };
    if entry.vaddr.is_some() {
        return;
    }
    let loc = entry.uop;
    let Some(operand) = mem_operand_for(core, loc) else {
        return;
    };
    let Some(mop) = core.oracle.mopq.get(loc.mop_seq) else {
        return;
    };
    let asid = mop.asid;
    let vaddr = VirtAddr::new(operand.vaddr);
    let Ok(paddr) = core.translator.v2p_translate(asid, vaddr) else {
        return;
    };
    if let Some(entry) = core.ldq.get_mut(idx) {
        entry.vaddr = Some(vaddr);
        entry.paddr = Some(paddr);
        entry.mem_size = operand.size;
    }
}

/// `check_load_issue_conditions`: may the load at `loc` issue
/// into its Load functional unit this cycle? Walks the STQ backward
/// from the load's captured `store_color`.
pub fn may_issue_load(core: &mut Core, loc: UopLoc) -> bool {
    let Some(ldq_idx) = core
        .oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .and_then(|u| u.ldq_index)
    else {
        return false;
    };
    let Some(entry) = core.ldq.get(ldq_idx as usize) else {
        return true;
    };
    let Some(load_range) = entry.range() else {
        return false;
    };
    let Some(start) = entry.store_color else {
        return true;
    };
    let policy = core.config.exec.memdep;
    let mut speculative = false;
    for s_idx in core.stq.walk_back_from(start) {
        let Some(store) = core.stq.get(s_idx) else { continue };
        if !store.addr_valid {
            match policy {
                MemDepPolicy::Conservative => return false,
                MemDepPolicy::AlwaysSpeculate | MemDepPolicy::StoreSet => {
                    speculative = true;
                    continue;
                }
            }
        }
        let Some(store_range) = store.range() else { continue };
        if !store_range.overlaps(&load_range) {
            continue;
        }
        if store_range.covers(&load_range) {
            if !store.value_valid {
                return false; // STD-missing: the blocking store hasn't produced its value yet
            }
            if let Some(e) = core.ldq.get_mut(ldq_idx as usize) {
                e.hit_in_stq = true;
            }
            return true;
        }
        // Partial overlap: can't forward, and can't skip past it either.
        return false;
    }
    if speculative {
        if let Some(e) = core.ldq.get_mut(ldq_idx as usize) {
            e.speculative_broadcast = true;
        }
    }
    true
}

/// STA resolves: once a store's address becomes known, check
/// whether any younger load already broadcast past it speculatively
/// (`speculative_broadcast`) and would now disagree — a partial
/// overlap in that situation triggers a memory-order nuke.
pub fn on_sta_resolved(core: &mut Core, loc: UopLoc, outcome: &mut ExecuteOutcome) {
    let Some(stq_idx) = core
        .oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .and_then(|u| u.stq_index)
    else {
        return;
    };
    let Some(operand) = mem_operand_for(core, loc) else { return };
    let Some(mop) = core.oracle.mopq.get(loc.mop_seq) else { return };
    let asid = mop.asid;
    let vaddr = VirtAddr::new(operand.vaddr);
    let Ok(paddr) = core.translator.v2p_translate(asid, vaddr) else { return };
    if let Some(entry) = core.stq.get_mut(stq_idx as usize) {
        entry.vaddr = Some(vaddr);
        entry.paddr = Some(paddr);
        entry.mem_size = operand.size;
        entry.addr_valid = true;
    }
    let store_range = ByteRange::new(vaddr.val(), u64::from(operand.size));
    for idx in core.ldq.indices_oldest_first() {
        let Some(entry) = core.ldq.get(idx) else { continue };
        if !entry.speculative_broadcast {
            continue;
        }
        if entry.uop.mop_seq <= loc.mop_seq {
            continue;
        }
        let Some(load_range) = entry.range() else { continue };
        if store_range.overlaps(&load_range) {
            outcome.nuke = Some(entry.uop.mop_seq.saturating_sub(1));
            return;
        }
    }
}

/// STD resolves: the store's value is now known.
pub fn on_std_resolved(core: &mut Core, loc: UopLoc) {
    let Some(stq_idx) = core
        .oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .and_then(|u| u.stq_index)
    else {
        return;
    };
    if let Some(entry) = core.stq.get_mut(stq_idx as usize) {
        entry.value_valid = true;
    }
}

/// Submit every LDQ entry that has cleared `may_issue_load` this cycle
/// and hasn't been issued yet into the DTLB/DL1/repeater, step 4 of the
/// LDQ schedule. A load that hit fully inside the STQ never touches the
/// cache at all — its value already came from `may_issue_load`'s
/// forward check.
pub fn issue_loads_to_cache(core: &mut Core) {
    let now = core.now;
    for idx in core.ldq.indices_oldest_first() {
        issue_one_load(core, idx, now);
    }
}

fn issue_one_load(core: &mut Core, idx: usize, now: TickT) {
    let Some(entry) = core.ldq.get(idx).copied() else { return };
    if !entry.addr_valid() || entry.when_issued != TICK_T_MAX {
        return;
    }
    let loc = entry.uop;
    let ready = core
        .oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .is_some_and(|u| u.ivalue_valid[1]);
    if !ready {
        return;
    }
    if entry.hit_in_stq {
        // Fully forwarded from the STQ: the value is already known, so
        // this access never touches the DTLB or DL1 at all.
        complete_stq_forward(core, idx, now);
        return;
    }
    let Some(paddr) = entry.paddr else { return };
    let Some(mop) = core.oracle.mopq.get(loc.mop_seq) else { return };
    let asid = mop.asid;
    let action_id = entry.action_id;
    let crosses_line = entry.crosses_line(LINE_BYTES);

    if !core.cache.enqueuable(DTLB_LEVEL, MemOp::Translate, asid) || !core.cache.enqueuable(DL1_LEVEL, MemOp::Load, asid) {
        return;
    }
    if core
        .cache
        .enqueue(DTLB_LEVEL, MemOp::Translate, asid, paddr, action_id, loc, false, now)
        .is_err()
    {
        return;
    }
    if core
        .cache
        .enqueue(DL1_LEVEL, MemOp::Load, asid, paddr, action_id, loc, false, now)
        .is_err()
    {
        return;
    }
    core.repeater.enqueue(asid, paddr, action_id, loc, false, now);

    if crosses_line
        && core.cache.enqueuable(DL1_LEVEL, MemOp::Load, asid)
        && core
            .cache
            .enqueue(DL1_LEVEL, MemOp::Load, asid, paddr, action_id, loc, true, now)
            .is_ok()
    {
        core.repeater.enqueue(asid, paddr, action_id, loc, true, now);
        core.stats.note_split_access();
    }

    if let Some(e) = core.ldq.get_mut(idx) {
        e.when_issued = now;
        e.arrivals.first_byte_requested = true;
        e.arrivals.last_byte_requested = true;
        e.arrivals.first_repeated = true;
        e.arrivals.last_repeated = true;
    }

    // Step 4: speculatively broadcast assuming a DL1 hit, so dependents
    // don't wait for the round trip to actually land.
    let expected = now
        .saturating_add(core.config.exec.load.latency)
        .saturating_sub(core.config.exec.payload_depth as u64);
    let odep_head = core.oracle.mopq.get_mut(loc.mop_seq).and_then(|mop| {
        mop.uops.get_mut(loc.uop_idx as usize).map(|u| {
            u.timing.when_otag_ready = expected;
            u.odep_head
        })
    });
    if let Some(odep_head) = odep_head {
        wake_dependents(core, odep_head, expected);
    }
}

fn complete_stq_forward(core: &mut Core, idx: usize, now: TickT) {
    if let Some(e) = core.ldq.get_mut(idx) {
        e.when_issued = now;
        e.translation_complete = true;
        e.arrivals.first_byte_arrived = true;
        e.arrivals.last_byte_arrived = true;
    }
    try_load_writeback(core, idx);
}

fn ldq_index_for(core: &Core, loc: UopLoc) -> Option<usize> {
    core.oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .and_then(|u| u.ldq_index)
        .map(|i| i as usize)
}

/// `Some(true)` for a load, `Some(false)` for a store, `None` if the
/// owning Mop is already gone (squashed) — in which case neither
/// side's owner-match would find anything to do anyway.
fn is_load_event(core: &Core, loc: UopLoc) -> Option<bool> {
    core.oracle
        .mopq
        .get(loc.mop_seq)
        .and_then(|m| m.uops.get(loc.uop_idx as usize))
        .map(|u| u.flags.is_load)
}

/// Whether an arriving half of a (possibly split-line) load covers
/// the first byte, the last byte, or both — a single, non-split access
/// covers both ends.
fn mark_half_arrived(entry_crosses_line: bool, is_split: bool, first: &mut bool, last: &mut bool) {
    if entry_crosses_line {
        if is_split {
            *last = true;
        } else {
            *first = true;
        }
    } else {
        *first = true;
        *last = true;
    }
}

fn complete_load_translation(core: &mut Core, loc: UopLoc, action_id: u64) {
    let Some(idx) = ldq_index_for(core, loc) else { return };
    let Some(entry) = core.ldq.get(idx) else { return };
    if entry.uop != loc || entry.action_id != action_id {
        return;
    }
    if let Some(e) = core.ldq.get_mut(idx) {
        e.translation_complete = true;
    }
    try_load_writeback(core, idx);
}

fn complete_load_access(core: &mut Core, loc: UopLoc, action_id: u64, is_split: bool) {
    let Some(idx) = ldq_index_for(core, loc) else { return };
    let Some(entry) = core.ldq.get(idx) else { return };
    if entry.uop != loc || entry.action_id != action_id {
        return;
    }
    let crosses_line = entry.crosses_line(LINE_BYTES);
    if let Some(e) = core.ldq.get_mut(idx) {
        mark_half_arrived(
            crosses_line,
            is_split,
            &mut e.arrivals.first_byte_arrived,
            &mut e.arrivals.last_byte_arrived,
        );
    }
    try_load_writeback(core, idx);
}

fn complete_repeater_hit(core: &mut Core, loc: UopLoc, action_id: u64, is_split: bool) {
    let Some(idx) = ldq_index_for(core, loc) else { return };
    let Some(entry) = core.ldq.get(idx) else { return };
    if entry.uop != loc || entry.action_id != action_id {
        return;
    }
    let crosses_line = entry.crosses_line(LINE_BYTES);
    if let Some(e) = core.ldq.get_mut(idx) {
        mark_half_arrived(
            crosses_line,
            is_split,
            &mut e.arrivals.repeater_first_arrived,
            &mut e.arrivals.repeater_last_arrived,
        );
    }
    try_load_writeback(core, idx);
}

/// Load miss reschedule: the DL1 access actually missed (the callback
/// carries the next level's latency). Snatch back any dependent
/// already speculatively woken by `issue_one_load`'s step-4 broadcast
/// and push `when_otag_ready` out to the real latency; the port's
/// eventual `Done` for this same access drives the real writeback.
fn handle_load_miss(core: &mut Core, loc: UopLoc, action_id: u64, latency: TickT) {
    let Some(idx) = ldq_index_for(core, loc) else { return };
    let Some(entry) = core.ldq.get(idx) else { return };
    if entry.uop != loc || entry.action_id != action_id {
        return;
    }
    let now = core.now;
    let odep_head = core.oracle.mopq.get_mut(loc.mop_seq).and_then(|mop| {
        mop.uops.get_mut(loc.uop_idx as usize).map(|u| {
            u.timing.when_otag_ready = now.saturating_add(latency);
            u.odep_head
        })
    });
    core.stats.note_load_miss();
    // STM snatches back speculatively-woken dependents and re-wakes them
    // once the real latency is known. IO-DPM's in-order issue never woke
    // them early in the first place (no speculative otag broadcast ahead
    // of a fixed payload pipe), so there is nothing to snatch back — the
    // stall is already propagated by the pipe simply not advancing.
    if core.config.backend == Backend::Stm {
        if let Some(odep_head) = odep_head {
            snatch_back_dependents(core, odep_head);
        }
    }
}

/// Load writeback: fires once DTLB translation has arrived and both
/// halves of a (possibly split) load have arrived from the winning
/// path (cache or repeater). A load feeding an indirect branch's
/// target has no `ExecuteOutcome` channel back to `Core::step` from
/// this commit-adjacent context, so a mispredict on that path isn't
/// driven here — see DESIGN.md.
fn try_load_writeback(core: &mut Core, idx: usize) {
    let Some(entry) = core.ldq.get(idx).copied() else { return };
    if !entry.translation_complete || !entry.arrivals.all_arrived() {
        return;
    }
    let loc = entry.uop;
    let now = core.now;
    let Some(mop) = core.oracle.mopq.get_mut(loc.mop_seq) else { return };
    let Some(uop) = mop.uops.get_mut(loc.uop_idx as usize) else { return };
    if uop.ovalue_valid {
        return;
    }
    uop.timing.when_completed = now;
    if uop.timing.when_otag_ready > now {
        uop.timing.when_otag_ready = now;
    }
    uop.ovalue_valid = true;
    let odep_head = uop.odep_head;
    wake_dependents(core, odep_head, now);
}

/// Senior-store drain: at most one in-flight translate/write per
/// cycle, matching [`crate::core::pipeline::stq::Stq::drain_senior`]'s
/// "at most one per cycle" contract.
pub fn drain_senior_stage(core: &mut Core) {
    drive_senior_head(core);
    route_cache_events(core);
    if let Some(entry) = core.stq.drain_senior() {
        core.stats.note_stq_drain();
        let _ = entry;
    }
}

fn drive_senior_head(core: &mut Core) {
    let Some(idx) = core.stq.indices_first_senior() else {
        return;
    };
    let Some(entry) = core.stq.get(idx) else { return };
    if entry.pending_drain {
        return;
    }
    if !entry.addr_valid || !entry.value_valid {
        return;
    }
    let Some(paddr) = entry.paddr else { return };
    let Some(vaddr) = entry.vaddr else { return };
    let action_id = entry.action_id;
    let loc = entry.sta.or(entry.std).unwrap_or(UopLoc { mop_seq: 0, uop_idx: 0 });
    let now = core.now;
    if !core.cache.enqueuable(DTLB_LEVEL, MemOp::Translate, 0) || !core.cache.enqueuable(DL1_LEVEL, MemOp::Store, 0) {
        return;
    }
    if core
        .cache
        .enqueue(DTLB_LEVEL, MemOp::Translate, 0, paddr, action_id, loc, false, now)
        .is_err()
    {
        return;
    }
    if core
        .cache
        .enqueue(DL1_LEVEL, MemOp::Store, 0, paddr, action_id, loc, false, now)
        .is_err()
    {
        return;
    }
    if let Some(e) = core.stq.get_mut(idx) {
        e.pending_drain = true;
    }
    core.translator.notify_write(0, vaddr);
}

fn route_cache_events(core: &mut Core) {
    let now = core.now;
    let mut events = core.cache.process(DTLB_LEVEL, now);
    events.extend(core.cache.process(DL1_LEVEL, now));
    for event in events {
        match event {
            CacheEvent::Translated { action_id, uop } => match is_load_event(core, uop) {
                Some(true) => complete_load_translation(core, uop, action_id),
                Some(false) => complete_senior_translation(core, uop, action_id),
                None => {}
            },
            CacheEvent::Done { action_id, uop, is_split } => match is_load_event(core, uop) {
                Some(true) => complete_load_access(core, uop, action_id, is_split),
                Some(false) => complete_senior_write(core, uop, action_id),
                None => {}
            },
            CacheEvent::Miss { action_id, uop, latency } => {
                if is_load_event(core, uop) == Some(true) {
                    handle_load_miss(core, uop, action_id, latency);
                }
                // A senior store's miss has no caller-visible
                // reschedule in this model: the drain simply waits for
                // the port's own escalation to eventually yield Done.
            }
        }
    }

    for revent in core.repeater.process(now) {
        match revent {
            RepeaterEvent::Hit { action_id, uop, is_split } => {
                core.stats.note_repeater_hit();
                complete_repeater_hit(core, uop, action_id, is_split);
            }
            RepeaterEvent::Miss { .. } => {
                core.stats.note_repeater_miss();
            }
        }
    }
}

fn complete_senior_translation(core: &mut Core, loc: UopLoc, action_id: u64) {
    let Some(idx) = core.stq.indices_first_senior() else { return };
    let Some(entry) = core.stq.get(idx) else { return };
    let owner = entry.sta.or(entry.std);
    if owner != Some(loc) || entry.action_id != action_id {
        return;
    }
    core.stq.set_translation_complete(idx);
    deallocate_if_fully_drained(core, idx);
}

fn complete_senior_write(core: &mut Core, loc: UopLoc, action_id: u64) {
    let Some(idx) = core.stq.indices_first_senior() else { return };
    let Some(entry) = core.stq.get(idx) else { return };
    let owner = entry.sta.or(entry.std);
    if owner != Some(loc) || entry.action_id != action_id {
        return;
    }
    core.stq.set_write_complete(idx);
    deallocate_if_fully_drained(core, idx);
}

/// The sta/std uop pointers stay put until *both* the DTLB and DL1
/// callbacks have landed — detaching either one early would break the
/// other's still-pending owner-match lookup above.
fn deallocate_if_fully_drained(core: &mut Core, idx: usize) {
    let Some(entry) = core.stq.get(idx) else { return };
    if entry.translation_complete && entry.write_complete {
        let _ = core.stq.deallocate_sta(idx);
        let _ = core.stq.deallocate_std(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_overlap_range_forwards() {
        let store = ByteRange::new(0x100, 8);
        let load = ByteRange::new(0x100, 4);
        assert!(store.covers(&load));
    }

    #[test]
    fn partial_overlap_is_not_coverage() {
        let store = ByteRange::new(0x100, 4);
        let load = ByteRange::new(0x102, 4);
        assert!(store.overlaps(&load));
        assert!(!store.covers(&load));
    }

    #[test]
    fn mark_half_arrived_single_access_sets_both_ends() {
        let mut first = false;
        let mut last = false;
        mark_half_arrived(false, false, &mut first, &mut last);
        assert!(first && last);
    }

    #[test]
    fn mark_half_arrived_split_access_sets_one_end_at_a_time() {
        let mut first = false;
        let mut last = false;
        mark_half_arrived(true, false, &mut first, &mut last);
        assert!(first && !last);
        mark_half_arrived(true, true, &mut first, &mut last);
        assert!(first && last);
    }
}
