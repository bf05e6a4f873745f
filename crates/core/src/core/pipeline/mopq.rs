//! The Mop queue and its shadow queue.
//!
//! `seq` is assigned by exactly-one increment per allocated Mop, so a
//! Mop's ring slot is `seq % capacity` — an arena addressed by index,
//! never by pointer. The shadow queue mirrors the same ring discipline
//! one level behind: it holds the raw feeder record each Mop was
//! synthesized from, so a recovery can roll the MopQ back without
//! re-consulting the feeder.

use crate::common::error::CoreError;
use crate::external::feeder::FeederRecord;

use super::model::Mop;

#[derive(Debug)]
pub struct MopQueue {
    capacity: usize,
    slots: Vec<Option<Mop>>,
    shadow: Vec<Option<FeederRecord>>,
    shadow_speculative: Vec<bool>,
    head_seq: u64,
    next_seq: u64,
    spec_count: usize,
}

impl MopQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: vec![None; capacity],
            shadow: (0..capacity).map(|_| None).collect(),
            shadow_speculative: vec![false; capacity],
            head_seq: 0,
            next_seq: 0,
            spec_count: 0,
        }
    }

    fn slot_of(&self, seq: u64) -> usize {
        (seq % self.capacity as u64) as usize
    }

    pub fn is_full(&self) -> bool {
        self.next_seq - self.head_seq == self.capacity as u64
    }

    /// `MopQ_num`: total live Mops, speculative and non-speculative.
    pub fn num(&self) -> usize {
        (self.next_seq - self.head_seq) as usize
    }

    /// `MopQ_spec_num`: speculative Mops only.
    pub fn spec_num(&self) -> usize {
        self.spec_count
    }

    /// Allocate the next sequence number and install `mop` (whose
    /// `seq` must equal it) along with the shadow-queue record it was
    /// synthesized from.
    pub fn push(&mut self, mop: Mop, record: FeederRecord, speculative: bool) -> Result<u64, CoreError> {
        if self.is_full() {
            return Err(CoreError::StructuralOverflow {
                resource: "MopQ",
                capacity: self.capacity,
            });
        }
        let seq = self.next_seq;
        if mop.seq != seq {
            return Err(CoreError::ContractViolation {
                component: "MopQueue::push",
                detail: format!("expected seq {seq}, Mop carries {}", mop.seq),
            });
        }
        let slot = self.slot_of(seq);
        self.slots[slot] = Some(mop);
        self.shadow[slot] = Some(record);
        self.shadow_speculative[slot] = speculative;
        if speculative {
            self.spec_count += 1;
        }
        self.next_seq += 1;
        Ok(seq)
    }

    pub fn get(&self, seq: u64) -> Option<&Mop> {
        if seq < self.head_seq || seq >= self.next_seq {
            return None;
        }
        self.slots[self.slot_of(seq)].as_ref()
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut Mop> {
        if seq < self.head_seq || seq >= self.next_seq {
            return None;
        }
        let slot = self.slot_of(seq);
        self.slots[slot].as_mut()
    }

    pub fn head_seq(&self) -> u64 {
        self.head_seq
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// The raw feeder record a live Mop was synthesized from, used by
    /// the alloc stage to recover a load/store uop's memory operand
    /// (vaddr, size) without threading it through `UopTemplate`.
    pub fn shadow_record(&self, seq: u64) -> Option<&FeederRecord> {
        if seq < self.head_seq || seq >= self.next_seq {
            return None;
        }
        self.shadow[self.slot_of(seq)].as_ref()
    }

    pub fn is_speculative(&self, seq: u64) -> bool {
        if seq < self.head_seq || seq >= self.next_seq {
            return false;
        }
        self.shadow_speculative[self.slot_of(seq)]
    }

    /// Free the MopQ head and the matching shadow-queue head once the
    /// whole Mop has retired.
    pub fn commit_head(&mut self) -> Result<Mop, CoreError> {
        if self.head_seq == self.next_seq {
            return Err(CoreError::ContractViolation {
                component: "MopQueue::commit_head",
                detail: "commit called on empty MopQ".to_string(),
            });
        }
        let slot = self.slot_of(self.head_seq);
        let mop = self.slots[slot].take().ok_or(CoreError::ContractViolation {
            component: "MopQueue::commit_head",
            detail: format!("head slot for seq {} is empty", self.head_seq),
        })?;
        if self.shadow_speculative[slot] {
            self.spec_count = self.spec_count.saturating_sub(1);
        }
        self.shadow[slot] = None;
        self.shadow_speculative[slot] = false;
        self.head_seq += 1;
        Ok(mop)
    }

    /// Pop every entry younger than `boundary_seq` from the tail,
    /// youngest first. Returns the popped Mops in that order so the
    /// caller can undo their rename-map/odep edges before discarding
    /// them.
    pub fn pop_tail_after(&mut self, boundary_seq: u64) -> Vec<Mop> {
        let mut popped = Vec::new();
        while self.next_seq > 0 && self.next_seq - 1 > boundary_seq && self.next_seq - 1 >= self.head_seq {
            let seq = self.next_seq - 1;
            let slot = self.slot_of(seq);
            if let Some(m) = self.slots[slot].take() {
                if self.shadow_speculative[slot] {
                    self.spec_count = self.spec_count.saturating_sub(1);
                }
                self.shadow[slot] = None;
                self.shadow_speculative[slot] = false;
                popped.push(m);
            }
            self.next_seq -= 1;
        }
        popped
    }

    pub fn complete_flush(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.shadow.iter_mut().for_each(|s| *s = None);
        self.shadow_speculative.iter_mut().for_each(|s| *s = false);
        self.head_seq = 0;
        self.next_seq = 0;
        self.spec_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::MAX_ILEN;
    use crate::core::pipeline::model::SlipStats;
    use crate::external::feeder::{FeederFlags, MemOperand};

    fn stub_record(pc: u64) -> FeederRecord {
        FeederRecord {
            pc,
            npc: pc + 4,
            tpc: 0,
            flags: FeederFlags::default(),
            asid: 0,
            ins: [0; MAX_ILEN],
            ins_len: 1,
            mem_buffer: Vec::<MemOperand>::new(),
            profile_id: 0,
        }
    }

    fn stub_mop(seq: u64) -> Mop {
        Mop {
            seq,
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
            raw_bytes: [0; MAX_ILEN],
            uops: Vec::new(),
            flow_length: 1,
            num_eff_uops: 1,
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
    fn push_then_commit_advances_head() {
        let mut q = MopQueue::new(4);
        q.push(stub_mop(0), stub_record(0x1000), false).unwrap();
        assert_eq!(q.num(), 1);
        let committed = q.commit_head().unwrap();
        assert_eq!(committed.seq, 0);
        assert_eq!(q.num(), 0);
    }

    #[test]
    fn spec_num_tracks_speculative_pushes() {
        let mut q = MopQueue::new(4);
        q.push(stub_mop(0), stub_record(0x1000), false).unwrap();
        q.push(stub_mop(1), stub_record(0x1004), true).unwrap();
        assert_eq!(q.spec_num(), 1);
        assert_eq!(q.num(), 2);
    }

    #[test]
    fn pop_tail_after_returns_youngest_first() {
        let mut q = MopQueue::new(4);
        q.push(stub_mop(0), stub_record(0x1000), false).unwrap();
        q.push(stub_mop(1), stub_record(0x1004), true).unwrap();
        q.push(stub_mop(2), stub_record(0x1008), true).unwrap();
        let popped = q.pop_tail_after(0);
        assert_eq!(popped.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(q.num(), 1);
        assert_eq!(q.spec_num(), 0);
    }

    #[test]
    fn full_queue_rejects_push() {
        let mut q = MopQueue::new(1);
        q.push(stub_mop(0), stub_record(0x1000), false).unwrap();
        assert!(q.push(stub_mop(1), stub_record(0x1004), false).is_err());
    }
}
