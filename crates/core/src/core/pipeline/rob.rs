//! The reorder buffer: an in-order ring of allocation slots, one per
//! fusion group (a group's members share the head's slot but still
//! count toward the "effective occupancy" used by structural-hazard
//! accounting).

use crate::common::error::CoreError;

use super::model::UopLoc;

/// One physical ROB slot: the head uop of a (possibly single-uop)
/// fusion group.
#[derive(Debug, Clone, Copy)]
pub struct RobEntry {
    pub head: UopLoc,
    /// Number of uops retired as part of this slot (1 for a non-fused
    /// uop, `fusion_size` for a fusion head).
    pub group_len: u32,
}

/// Fixed-capacity ring buffer of [`RobEntry`] slots.
#[derive(Debug)]
pub struct Rob {
    capacity: usize,
    entries: Vec<Option<RobEntry>>,
    head: usize,
    tail: usize,
    count: usize,
    /// Each fusion member counts toward an effective occupancy
    /// counter; for example a three-uop fusion group occupying one
    /// physical slot makes `eff_num == num + 2`.
    eff_count: usize,
}

impl Rob {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: vec![None; capacity],
            head: 0,
            tail: 0,
            count: 0,
            eff_count: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn num(&self) -> usize {
        self.count
    }

    pub fn eff_num(&self) -> usize {
        self.eff_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a new tail slot for a fusion group of `group_len`
    /// uops (1 for a non-fused uop).
    pub fn allocate(&mut self, head: UopLoc, group_len: u32) -> Result<usize, CoreError> {
        if self.is_full() {
            return Err(CoreError::StructuralOverflow {
                resource: "ROB",
                capacity: self.capacity,
            });
        }
        let slot = self.tail;
        self.entries[slot] = Some(RobEntry { head, group_len });
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
        self.eff_count += group_len as usize;
        Ok(slot)
    }

    pub fn head_entry(&self) -> Option<RobEntry> {
        if self.is_empty() {
            None
        } else {
            self.entries[self.head]
        }
    }

    /// Retire the head slot. Must be called only once the whole group
    /// has been walked by commit — fusion members share a slot and
    /// retire together.
    pub fn retire_head(&mut self) -> Result<RobEntry, CoreError> {
        let entry = self.entries[self.head].take().ok_or(CoreError::ContractViolation {
            component: "Rob::retire_head",
            detail: "retire called on empty ROB".to_string(),
        })?;
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        self.eff_count -= entry.group_len as usize;
        Ok(entry)
    }

    /// Flush every slot from the tail back down to (but not including)
    /// the slot holding `boundary`, in reverse allocation order, for
    /// recovery. Returns the flushed entries, youngest first.
    pub fn flush_after(&mut self, boundary_seq: u64) -> Vec<RobEntry> {
        let mut flushed = Vec::new();
        while self.count > 0 {
            let last = (self.tail + self.capacity - 1) % self.capacity;
            let entry = match self.entries[last] {
                Some(e) => e,
                None => break,
            };
            if entry.head.mop_seq <= boundary_seq {
                break;
            }
            self.entries[last] = None;
            self.tail = last;
            self.count -= 1;
            self.eff_count -= entry.group_len as usize;
            flushed.push(entry);
        }
        flushed
    }

    pub fn complete_flush(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.head = 0;
        self.tail = 0;
        self.count = 0;
        self.eff_count = 0;
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
    fn fusion_group_inflates_eff_num_only() {
        let mut rob = Rob::new(4);
        rob.allocate(loc(1), 3).unwrap();
        assert_eq!(rob.num(), 1);
        assert_eq!(rob.eff_num(), 3);
    }

    #[test]
    fn full_rob_rejects_allocation() {
        let mut rob = Rob::new(1);
        rob.allocate(loc(1), 1).unwrap();
        assert!(matches!(
            rob.allocate(loc(2), 1),
            Err(CoreError::StructuralOverflow { resource: "ROB", .. })
        ));
    }

    #[test]
    fn retire_head_frees_slot_and_eff_count() {
        let mut rob = Rob::new(4);
        rob.allocate(loc(1), 2).unwrap();
        rob.allocate(loc(2), 1).unwrap();
        let retired = rob.retire_head().unwrap();
        assert_eq!(retired.head, loc(1));
        assert_eq!(rob.num(), 1);
        assert_eq!(rob.eff_num(), 1);
    }

    #[test]
    fn flush_after_boundary_pops_youngest_first() {
        let mut rob = Rob::new(4);
        rob.allocate(loc(1), 1).unwrap();
        rob.allocate(loc(2), 1).unwrap();
        rob.allocate(loc(3), 1).unwrap();
        let flushed = rob.flush_after(1);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].head, loc(3));
        assert_eq!(flushed[1].head, loc(2));
        assert_eq!(rob.num(), 1);
    }
}
