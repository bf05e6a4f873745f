//! Logic shared by both backends: memory-order resolution
//! and in-order commit/retirement. Neither IO-DPM nor STM reimplements
//! these — they differ only in how uops get ready and issue, not in
//! how loads/stores resolve addresses or how the ROB drains.

pub mod commit;
pub mod memory;
pub mod recovery;

use crate::common::constants::TickT;
use crate::core::pipeline::model::UopLoc;
use crate::sim::core_sim::Core;

/// Walk a just-completed uop's odep chain and wake each child's
/// matching idep slot, re-deriving each child's `when_ready`. Shared
/// by both back-ends' `complete_uop`:
/// STM additionally re-admits a child that becomes fully ready into its
/// port's ready list; IO-DPM's in-order alloc-queue walk picks up
/// newly-ready uops lazily the next time it inspects the front entry,
/// so it only needs the wakeup itself.
pub fn wake_dependents(core: &mut Core, odep_head: Option<u32>, now: TickT) -> Vec<UopLoc> {
    let mut cur = odep_head;
    let mut now_ready = Vec::new();
    while let Some(idx) = cur {
        let node = *core.oracle.odep_pool.node(idx);
        cur = core.oracle.odep_pool.next(idx);
        let Some(mop) = core.oracle.mopq.get_mut(node.child.mop_seq) else {
            continue;
        };
        let Some(child) = mop.uops.get_mut(node.child.uop_idx as usize) else {
            continue;
        };
        child.wake_idep(node.op_num as usize, now);
        if child.is_ready(now) {
            now_ready.push(node.child);
        }
    }
    now_ready
}

/// The inverse of [`wake_dependents`]: a speculative wakeup (a load's
/// early, DL1-hit-assuming broadcast) turned out wrong, so snatch each
/// dependent's matching idep slot back to not-ready.
pub fn snatch_back_dependents(core: &mut Core, odep_head: Option<u32>) {
    let mut cur = odep_head;
    while let Some(idx) = cur {
        let node = *core.oracle.odep_pool.node(idx);
        cur = core.oracle.odep_pool.next(idx);
        let Some(mop) = core.oracle.mopq.get_mut(node.child.mop_seq) else {
            continue;
        };
        let Some(child) = mop.uops.get_mut(node.child.uop_idx as usize) else {
            continue;
        };
        child.rearm_idep(node.op_num as usize);
    }
}
