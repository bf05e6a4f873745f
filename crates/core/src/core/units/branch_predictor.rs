//! The branch-predictor interface — an opaque collaborator; only its
//! contract shape lives in the core. `lookup`/`update`/`recover`/
//! `flush` plus a state-cache handle the predictor hands back and the
//! core only ever stores and returns, so the predictor owns its own
//! memory and the core never reads predictor-internal state.

/// A token naming one entry in the predictor's private side table.
/// The core only ever stores and returns this handle — it never reads
/// predictor-internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateCacheHandle(pub u64);

/// Decode-time hints a predictor may use (whether the uop is an
/// indirect branch, a call, a return, ...). Opaque bits the core just
/// threads through.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpFlags(pub u32);

pub trait BranchPredictor {
    /// Look up a prediction for a control-flow uop at `pc`, recording
    /// whatever side-information the predictor wants to recall at
    /// `update`/`recover` time in a fresh [`StateCacheHandle`].
    fn lookup(
        &mut self,
        opflags: OpFlags,
        pc: u64,
        fallthrough_pc: u64,
        target_pc: u64,
        oracle_npc: u64,
        taken: bool,
    ) -> (u64, StateCacheHandle);

    /// Train on the outcome once it's known, at uop completion.
    fn update(&mut self, handle: StateCacheHandle, actual_npc: u64, taken: bool);

    /// Roll predictor-internal speculative state back to what it was
    /// before `handle` was issued, for branch mispredict recovery.
    fn recover(&mut self, handle: StateCacheHandle);

    /// Discard all speculative predictor state, for a complete flush.
    fn flush(&mut self);

    /// Allocate a fresh state-cache slot without producing a
    /// prediction (used when the core needs to pre-reserve a handle).
    fn get_state_cache(&mut self) -> StateCacheHandle;

    /// Return a handle to the predictor's free pool once its owning
    /// Mop has retired or been squashed.
    fn return_state_cache(&mut self, handle: StateCacheHandle);
}

/// A static not-taken predictor: every `lookup` predicts fallthrough.
/// Useful as a default/test double; a real predictor (gshare,
/// perceptron, TAGE, ...) is an external collaborator.
#[derive(Debug, Default)]
pub struct StaticNotTakenPredictor {
    next_handle: u64,
}

impl BranchPredictor for StaticNotTakenPredictor {
    fn lookup(
        &mut self,
        _opflags: OpFlags,
        _pc: u64,
        fallthrough_pc: u64,
        _target_pc: u64,
        _oracle_npc: u64,
        _taken: bool,
    ) -> (u64, StateCacheHandle) {
        let h = self.get_state_cache();
        (fallthrough_pc, h)
    }

    fn update(&mut self, _handle: StateCacheHandle, _actual_npc: u64, _taken: bool) {}

    fn recover(&mut self, _handle: StateCacheHandle) {}

    fn flush(&mut self) {}

    fn get_state_cache(&mut self) -> StateCacheHandle {
        let h = StateCacheHandle(self.next_handle);
        self.next_handle += 1;
        h
    }

    fn return_state_cache(&mut self, _handle: StateCacheHandle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_predictor_always_predicts_fallthrough() {
        let mut bp = StaticNotTakenPredictor::default();
        let (pred, _h) = bp.lookup(OpFlags::default(), 0x1000, 0x1004, 0x2000, 0x1004, false);
        assert_eq!(pred, 0x1004);
    }

    #[test]
    fn handles_are_distinct() {
        let mut bp = StaticNotTakenPredictor::default();
        let a = bp.get_state_cache();
        let b = bp.get_state_cache();
        assert_ne!(a, b);
    }
}
