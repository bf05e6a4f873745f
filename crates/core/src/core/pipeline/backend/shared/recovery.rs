//! The recovery protocol. A branch mispredict, a memory-order nuke,
//! and a complete flush are all the same operation at different
//! boundaries: discard every Mop younger than a cutoff, rewind every
//! structure that cached per-Mop/per-uop state, and re-point fetch.

use crate::common::error::CoreError;
use crate::sim::core_sim::Core;

/// Roll back every Mop younger than `boundary_seq` and resume fetch at
/// `refetch_pc`.
///
/// `boundary_seq` is kept; everything younger is discarded. A branch
/// mispredict passes the mispredicting branch's own seq (it already
/// executed correctly — only its speculative successors are wrong); a
/// memory-order nuke passes the nuked Mop's seq minus one (the nuked
/// Mop itself must be re-fetched and re-executed).
pub fn recover(core: &mut Core, boundary_seq: u64, refetch_pc: u64) -> Result<(), CoreError> {
    core.oracle.recover(boundary_seq, core.bp.as_mut())?;
    let _ = core.rob.flush_after(boundary_seq);
    let _ = core.ldq.flush_after(boundary_seq);
    let _ = core.stq.flush_after(boundary_seq);
    let mut backend = core.backend.take().ok_or(CoreError::ContractViolation {
        component: "recovery::recover",
        detail: "backend taken re-entrantly".to_string(),
    })?;
    backend.recover(boundary_seq);
    core.backend = Some(backend);
    core.alloc_queue.retain(|loc| loc.mop_seq <= boundary_seq);
    core.alloc_cursor = core.alloc_cursor.min(core.oracle.mopq.next_seq());
    core.pending_jeclear = None;
    core.pending_feeder_record = None;
    core.fetch_pc = refetch_pc;
    Ok(())
}

/// Complete flush: discard all in-flight state unconditionally
/// and resume fetch at `new_pc`.
pub fn complete_flush(core: &mut Core, new_pc: u64) -> Result<(), CoreError> {
    core.oracle.complete_flush(core.bp.as_mut());
    core.rob.complete_flush();
    core.ldq.complete_flush();
    core.stq.complete_flush();
    let mut backend = core.backend.take().ok_or(CoreError::ContractViolation {
        component: "recovery::complete_flush",
        detail: "backend taken re-entrantly".to_string(),
    })?;
    backend.recover(0);
    core.backend = Some(backend);
    core.alloc_queue.clear();
    core.alloc_cursor = 0;
    core.pending_jeclear = None;
    core.pending_feeder_record = None;
    core.fetch_pc = new_pc;
    Ok(())
}
