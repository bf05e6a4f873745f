//! The load queue: in-flight load bookkeeping and its schedule.

use crate::common::addr::{ByteRange, PhysAddr, VirtAddr};
use crate::common::constants::TICK_T_MAX;
use crate::common::error::CoreError;

use super::model::UopLoc;

/// Per-access arrival bookkeeping for a (possibly split-line) load.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrivalFlags {
    pub first_byte_requested: bool,
    pub last_byte_requested: bool,
    pub first_byte_arrived: bool,
    pub last_byte_arrived: bool,
    pub repeater_first_arrived: bool,
    pub repeater_last_arrived: bool,
    pub first_repeated: bool,
    pub last_repeated: bool,
}

impl ArrivalFlags {
    /// Both halves have arrived from the winning path (cache or
    /// repeater).
    pub fn all_arrived(&self) -> bool {
        (self.first_byte_arrived || self.repeater_first_arrived)
            && (self.last_byte_arrived || self.repeater_last_arrived)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LdqEntry {
    pub uop: UopLoc,
    pub vaddr: Option<VirtAddr>,
    pub paddr: Option<PhysAddr>,
    pub mem_size: u8,
    /// STQ index of the youngest store older than this load, captured
    /// at allocation time; the backward STQ search starts here.
    pub store_color: Option<u32>,
    pub arrivals: ArrivalFlags,
    pub when_issued: u64,
    pub hit_in_stq: bool,
    pub speculative_broadcast: bool,
    pub partial_forward: bool,
    /// DTLB translation for this access has completed, independent of
    /// whether the DL1 data access has.
    pub translation_complete: bool,
    pub action_id: u64,
}

impl LdqEntry {
    pub fn addr_valid(&self) -> bool {
        self.vaddr.is_some()
    }

    pub fn range(&self) -> Option<ByteRange> {
        self.vaddr.map(|v| ByteRange::new(v.val(), u64::from(self.mem_size)))
    }

    pub fn crosses_line(&self, line_bytes: u64) -> bool {
        self.vaddr
            .is_some_and(|v| v.crosses_line(u64::from(self.mem_size), line_bytes))
    }
}

fn fresh_entry(uop: UopLoc, mem_size: u8, store_color: Option<u32>, action_id: u64) -> LdqEntry {
    LdqEntry {
        uop,
        vaddr: None,
        paddr: None,
        mem_size,
        store_color,
        arrivals: ArrivalFlags::default(),
        when_issued: TICK_T_MAX,
        hit_in_stq: false,
        speculative_broadcast: false,
        partial_forward: false,
        translation_complete: false,
        action_id,
    }
}

/// Fixed-capacity FIFO ring of in-flight loads, addressable by index
/// (the index a uop's `ldq_index` names) so writeback callbacks and
/// the STQ search pipe can resolve an entry in O(1).
#[derive(Debug)]
pub struct Ldq {
    capacity: usize,
    slots: Vec<Option<LdqEntry>>,
    head: usize,
    tail: usize,
    count: usize,
}

impl Ldq {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: vec![None; capacity],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn num(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn allocate(
        &mut self,
        uop: UopLoc,
        mem_size: u8,
        store_color: Option<u32>,
        action_id: u64,
    ) -> Result<usize, CoreError> {
        if self.is_full() {
            return Err(CoreError::StructuralOverflow {
                resource: "LDQ",
                capacity: self.capacity,
            });
        }
        let slot = self.tail;
        self.slots[slot] = Some(fresh_entry(uop, mem_size, store_color, action_id));
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
        Ok(slot)
    }

    pub fn get(&self, idx: usize) -> Option<&LdqEntry> {
        self.slots[idx].as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut LdqEntry> {
        self.slots[idx].as_mut()
    }

    /// Retire the head entry (called when its owning uop commits).
    pub fn retire_head(&mut self) -> Result<LdqEntry, CoreError> {
        let entry = self.slots[self.head].take().ok_or(CoreError::ContractViolation {
            component: "Ldq::retire_head",
            detail: "retire called on empty LDQ".to_string(),
        })?;
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        Ok(entry)
    }

    /// Oldest-first index order, matching the per-cycle LDQ schedule
    /// walk.
    pub fn indices_oldest_first(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count);
        let mut i = self.head;
        for _ in 0..self.count {
            out.push(i);
            i = (i + 1) % self.capacity;
        }
        out
    }

    /// Discard every entry unconditionally — a complete flush.
    pub fn complete_flush(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// Remove every entry younger than `boundary_seq`, for recovery.
    pub fn flush_after(&mut self, boundary_seq: u64) -> Vec<LdqEntry> {
        let mut flushed = Vec::new();
        for idx in self.indices_oldest_first().into_iter().rev() {
            let keep = self.slots[idx].is_some_and(|e| e.uop.mop_seq <= boundary_seq);
            if keep {
                break;
            }
            if let Some(e) = self.slots[idx].take() {
                flushed.push(e);
                self.count -= 1;
                self.tail = idx;
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
    fn allocate_then_retire_is_fifo() {
        let mut ldq = Ldq::new(2);
        let a = ldq.allocate(loc(1), 4, None, 0).unwrap();
        let b = ldq.allocate(loc(2), 4, None, 0).unwrap();
        assert_ne!(a, b);
        let retired = ldq.retire_head().unwrap();
        assert_eq!(retired.uop, loc(1));
    }

    #[test]
    fn complete_flush_empties_queue_regardless_of_age() {
        let mut ldq = Ldq::new(2);
        ldq.allocate(loc(1), 4, None, 0).unwrap();
        ldq.allocate(loc(2), 4, None, 0).unwrap();
        ldq.complete_flush();
        assert_eq!(ldq.num(), 0);
        assert!(!ldq.is_full());
    }

    #[test]
    fn full_ldq_rejects_allocation() {
        let mut ldq = Ldq::new(1);
        ldq.allocate(loc(1), 4, None, 0).unwrap();
        assert!(ldq.allocate(loc(2), 4, None, 0).is_err());
    }

    #[test]
    fn all_arrived_accepts_repeater_or_dl1_path() {
        let mut f = ArrivalFlags::default();
        assert!(!f.all_arrived());
        f.first_byte_arrived = true;
        f.last_byte_arrived = true;
        assert!(f.all_arrived());
        let mut g = ArrivalFlags::default();
        g.repeater_first_arrived = true;
        g.repeater_last_arrived = true;
        assert!(g.all_arrived());
    }
}
