//! The store queue: sta/std halves, senior region, and forwarding.
//!
//! A store occupies one STQ slot from allocation until
//! [`Stq::drain_senior`] frees it. The slot passes through three
//! regions as the ring rotates: `[tail-1 .. head)` live (not yet
//! committed), `[head-1 .. senior_head)` senior (committed
//! architecturally, still writing to the cache hierarchy), and
//! anything before `senior_head` is free.

use crate::common::addr::{ByteRange, PhysAddr, VirtAddr};
use crate::common::error::CoreError;

use super::model::UopLoc;

#[derive(Debug, Clone, Copy)]
pub struct StqEntry {
    pub sta: Option<UopLoc>,
    pub std: Option<UopLoc>,
    pub store_seq: u64,
    pub vaddr: Option<VirtAddr>,
    pub paddr: Option<PhysAddr>,
    pub mem_size: u8,
    pub value: u64,
    pub addr_valid: bool,
    pub value_valid: bool,
    /// LDQ index of the first load inserted after this store, used
    /// when a late-resolving STA must walk forward to rewake loads
    /// that depend on it (the STD-missing and nuke scenarios).
    pub next_load: Option<usize>,
    pub translation_complete: bool,
    pub write_complete: bool,
    /// Set once a cache/TLB write has been enqueued for this senior
    /// entry, so the drain stage doesn't resubmit it every cycle while
    /// it's in flight.
    pub pending_drain: bool,
    pub action_id: u64,
    pub senior: bool,
}

impl StqEntry {
    pub fn range(&self) -> Option<ByteRange> {
        self.vaddr.map(|v| ByteRange::new(v.val(), u64::from(self.mem_size)))
    }

    /// Has entered the senior region and fully drained to the cache
    /// hierarchy.
    pub fn fully_drained(&self) -> bool {
        self.senior && self.translation_complete && self.write_complete
    }
}

fn fresh_entry(store_seq: u64, mem_size: u8, action_id: u64) -> StqEntry {
    StqEntry {
        sta: None,
        std: None,
        store_seq,
        vaddr: None,
        paddr: None,
        mem_size,
        value: 0,
        addr_valid: false,
        value_valid: false,
        next_load: None,
        translation_complete: false,
        write_complete: false,
        pending_drain: false,
        action_id,
        senior: false,
    }
}

#[derive(Debug)]
pub struct Stq {
    capacity: usize,
    slots: Vec<Option<StqEntry>>,
    head: usize,
    senior_head: usize,
    tail: usize,
    live_count: usize,
    senior_count: usize,
}

impl Stq {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: vec![None; capacity],
            head: 0,
            senior_head: 0,
            tail: 0,
            live_count: 0,
            senior_count: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.live_count == self.capacity
    }

    pub fn num(&self) -> usize {
        self.live_count - self.senior_count
    }

    pub fn senior_num(&self) -> usize {
        self.senior_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn allocate(
        &mut self,
        sta: UopLoc,
        std: UopLoc,
        store_seq: u64,
        mem_size: u8,
        action_id: u64,
    ) -> Result<usize, CoreError> {
        if self.is_full() {
            return Err(CoreError::StructuralOverflow {
                resource: "STQ",
                capacity: self.capacity,
            });
        }
        let slot = self.tail;
        let mut entry = fresh_entry(store_seq, mem_size, action_id);
        entry.sta = Some(sta);
        entry.std = Some(std);
        self.slots[slot] = Some(entry);
        self.tail = (self.tail + 1) % self.capacity;
        self.live_count += 1;
        Ok(slot)
    }

    pub fn get(&self, idx: usize) -> Option<&StqEntry> {
        self.slots[idx].as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut StqEntry> {
        self.slots[idx].as_mut()
    }

    /// The AGEN half has handed its address off to the entry; detach
    /// the STA uop pointer.
    pub fn deallocate_sta(&mut self, idx: usize) -> Result<(), CoreError> {
        let entry = self.slots[idx].as_mut().ok_or(CoreError::ContractViolation {
            component: "Stq::deallocate_sta",
            detail: format!("slot {idx} empty"),
        })?;
        entry.sta = None;
        Ok(())
    }

    /// Detach the STD uop once its value has been handed to the entry
    /// and DTLB/DL1 enqueue has been accepted by the caller (which
    /// drives those enqueues externally via the cache/TLB port).
    pub fn deallocate_std(&mut self, idx: usize) -> Result<(), CoreError> {
        let entry = self.slots[idx].as_mut().ok_or(CoreError::ContractViolation {
            component: "Stq::deallocate_std",
            detail: format!("slot {idx} empty"),
        })?;
        entry.std = None;
        Ok(())
    }

    /// The entry must currently be at `head` (commit processes stores
    /// in program order). Transitions it into the senior region.
    pub fn begin_senior(&mut self) -> Result<usize, CoreError> {
        if self.head == self.tail && self.live_count == self.senior_count {
            return Err(CoreError::ContractViolation {
                component: "Stq::begin_senior",
                detail: "no live (non-senior) entry to commit".to_string(),
            });
        }
        let idx = self.head;
        let entry = self.slots[idx].as_mut().ok_or(CoreError::ContractViolation {
            component: "Stq::begin_senior",
            detail: format!("slot {idx} empty"),
        })?;
        entry.senior = true;
        self.head = (self.head + 1) % self.capacity;
        self.senior_count += 1;
        Ok(idx)
    }

    pub fn set_translation_complete(&mut self, idx: usize) {
        if let Some(e) = self.slots[idx].as_mut() {
            e.translation_complete = true;
        }
    }

    pub fn set_write_complete(&mut self, idx: usize) {
        if let Some(e) = self.slots[idx].as_mut() {
            e.write_complete = true;
        }
    }

    /// At most one per cycle. Frees the oldest senior slot once both
    /// DTLB and DL1 have acknowledged, bumping `action_id` so stale
    /// in-flight callbacks drop.
    pub fn drain_senior(&mut self) -> Option<StqEntry> {
        if self.senior_count == 0 {
            return None;
        }
        let idx = self.senior_head;
        let ready = self.slots[idx].is_some_and(StqEntry::fully_drained);
        if !ready {
            return None;
        }
        let mut entry = self.slots[idx].take()?;
        entry.action_id = entry.action_id.wrapping_add(1);
        self.senior_head = (self.senior_head + 1) % self.capacity;
        self.senior_count -= 1;
        self.live_count -= 1;
        Some(entry)
    }

    /// Index of the youngest live (non-senior) entry, if any — the
    /// seed for a newly-allocated load's backward STQ search
    /// (`store_color`).
    pub fn youngest_live_index(&self) -> Option<usize> {
        if self.num() == 0 {
            return None;
        }
        Some((self.tail + self.capacity - 1) % self.capacity)
    }

    /// Index of the oldest senior entry, if any — the one
    /// `drain_senior_stage` drives toward the cache/TLB hierarchy.
    pub fn indices_first_senior(&self) -> Option<usize> {
        if self.senior_count == 0 {
            return None;
        }
        Some(self.senior_head)
    }

    /// Walk backward (youngest-to-oldest) from `start_idx` down to
    /// (and including) the oldest live entry, for a load's
    /// `check_load_issue_conditions` / STQ search pipe.
    pub fn walk_back_from(&self, start_idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut idx = start_idx;
        loop {
            if self.slots[idx].is_none() {
                break;
            }
            out.push(idx);
            if idx == self.senior_head {
                break;
            }
            idx = (idx + self.capacity - 1) % self.capacity;
        }
        out
    }

    /// Discard every entry, senior or not, unconditionally — a
    /// complete flush.
    pub fn complete_flush(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.senior_head = 0;
        self.tail = 0;
        self.live_count = 0;
        self.senior_count = 0;
    }

    /// Drop every *non-senior* entry younger than `boundary_seq`.
    /// Senior entries have already committed architecturally and are
    /// never squashed.
    pub fn flush_after(&mut self, boundary_seq: u64) -> Vec<StqEntry> {
        let mut flushed = Vec::new();
        loop {
            if self.head == self.tail && self.live_count == self.senior_count {
                break;
            }
            let last = (self.tail + self.capacity - 1) % self.capacity;
            let keep = self.slots[last].is_some_and(|e| e.store_seq <= boundary_seq);
            if keep {
                break;
            }
            if let Some(e) = self.slots[last].take() {
                flushed.push(e);
                self.tail = last;
                self.live_count -= 1;
            } else {
                break;
            }
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(seq: u64) -> UopLoc {
        UopLoc {
            mop_seq: seq,
            uop_idx: 0,
        }
    }

    #[test]
    fn allocate_commit_drain_lifecycle() {
        let mut stq = Stq::new(4);
        let idx = stq.allocate(loc(1), loc(1), 1, 8, 0).unwrap();
        assert_eq!(stq.num(), 1);
        stq.deallocate_sta(idx).unwrap();
        stq.deallocate_std(idx).unwrap();
        let senior_idx = stq.begin_senior().unwrap();
        assert_eq!(senior_idx, idx);
        assert_eq!(stq.num(), 0);
        assert_eq!(stq.senior_num(), 1);
        assert!(stq.drain_senior().is_none()); // not yet both-complete
        stq.set_translation_complete(idx);
        stq.set_write_complete(idx);
        let drained = stq.drain_senior().unwrap();
        assert_eq!(drained.store_seq, 1);
        assert_eq!(stq.senior_num(), 0);
    }

    #[test]
    fn complete_flush_empties_queue_including_senior_entries() {
        let mut stq = Stq::new(4);
        let a = stq.allocate(loc(1), loc(1), 1, 8, 0).unwrap();
        stq.deallocate_sta(a).unwrap();
        stq.deallocate_std(a).unwrap();
        stq.begin_senior().unwrap();
        stq.allocate(loc(2), loc(2), 2, 8, 0).unwrap();
        stq.complete_flush();
        assert_eq!(stq.num(), 0);
        assert_eq!(stq.senior_num(), 0);
        assert!(!stq.is_full());
    }

    #[test]
    fn full_stq_rejects_allocation() {
        let mut stq = Stq::new(1);
        stq.allocate(loc(1), loc(1), 1, 8, 0).unwrap();
        assert!(stq.allocate(loc(2), loc(2), 2, 8, 0).is_err());
    }

    #[test]
    fn walk_back_from_covers_senior_region() {
        let mut stq = Stq::new(4);
        let a = stq.allocate(loc(1), loc(1), 1, 8, 0).unwrap();
        let b = stq.allocate(loc(2), loc(2), 2, 8, 0).unwrap();
        stq.deallocate_sta(a).unwrap();
        stq.deallocate_std(a).unwrap();
        stq.begin_senior().unwrap();
        let walk = stq.walk_back_from(b);
        assert_eq!(walk, vec![b, a]);
    }

    #[test]
    fn flush_after_never_touches_senior_entries() {
        let mut stq = Stq::new(4);
        let a = stq.allocate(loc(1), loc(1), 1, 8, 0).unwrap();
        stq.deallocate_sta(a).unwrap();
        stq.deallocate_std(a).unwrap();
        stq.begin_senior().unwrap();
        stq.allocate(loc(2), loc(2), 2, 8, 0).unwrap();
        let flushed = stq.flush_after(0);
        assert_eq!(flushed.len(), 1);
        assert_eq!(stq.senior_num(), 1);
    }
}
