//! The micro-op: the scheduling and execution unit.

use crate::common::constants::{MAX_IDEPS, MAX_ODEPS, TICK_T_MAX, TickT};
use crate::config::FuClass;

/// An architectural register name. Opaque to the core — the feeder and
/// decoder assign these; the core only compares them for identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegName(pub u16);

/// A stable address for one uop: which Mop it belongs to (by the
/// Mop's `seq`) and its index within that Mop's uop vector. Used
/// instead of a raw pointer so that a dependency edge survives the
/// owning Mop moving within its ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UopLoc {
    pub mop_seq: u64,
    pub uop_idx: u32,
}

/// Decode-time flags carried by a uop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UopFlags {
    pub is_load: bool,
    pub is_sta: bool,
    pub is_std: bool,
    pub is_ctrl: bool,
    pub is_nop: bool,
    pub is_lfence: bool,
    pub is_light_fence: bool,
    pub is_pf: bool,
    pub in_fusion: bool,
    pub is_fusion_head: bool,
    pub bom: bool,
    pub eom: bool,
    pub has_imm: bool,
    pub is_repeated: bool,
}

/// The fixed vector of `when_*` timestamps — a named struct rather
/// than a reflective set-field-by-name map. Every field starts at
/// [`TICK_T_MAX`] and is assigned monotonically exactly once, except
/// `when_ival_ready`, which can regress back to `TICK_T_MAX` on a
/// speculative-wakeup snatch-back after a load miss reschedule.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub when_decoded: TickT,
    pub when_allocated: TickT,
    pub when_ready: TickT,
    pub when_issued: TickT,
    pub when_exec: TickT,
    pub when_completed: TickT,
    pub when_otag_ready: TickT,
    pub when_ival_ready: [TickT; MAX_IDEPS],
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            when_decoded: TICK_T_MAX,
            when_allocated: TICK_T_MAX,
            when_ready: TICK_T_MAX,
            when_issued: TICK_T_MAX,
            when_exec: TICK_T_MAX,
            when_completed: TICK_T_MAX,
            when_otag_ready: TICK_T_MAX,
            when_ival_ready: [TICK_T_MAX; MAX_IDEPS],
        }
    }
}

impl Timing {
    /// `when_ready` is re-derived as `max_i when_ival_ready[i]` whenever
    /// an idep slot wakes.
    pub fn recompute_ready(&mut self) {
        self.when_ready = self
            .when_ival_ready
            .iter()
            .copied()
            .fold(0, TickT::max);
    }

    /// Invariant: decoded ≤ allocated ≤ ready ≤ issued ≤ exec ≤
    /// completed, for any uop that has completed.
    pub fn monotone_if_completed(&self) -> bool {
        if self.when_completed == TICK_T_MAX {
            return true;
        }
        self.when_decoded <= self.when_allocated
            && self.when_allocated <= self.when_ready
            && self.when_ready <= self.when_issued
            && self.when_issued <= self.when_exec
            && self.when_exec <= self.when_completed
    }
}

/// The micro-op itself.
#[derive(Debug, Clone)]
pub struct Uop {
    /// Global, monotonically increasing across the whole core; doubles
    /// as the age-ordering key for ready lists.
    pub uop_seq: u64,
    pub mop_seq: u64,
    pub idx_in_mop: u32,

    pub fu_class: FuClass,
    pub mem_size: u8,
    pub flags: UopFlags,

    /// Back-pointers to the producer of each input. `None` means the
    /// value was already architecturally known (e.g. an immediate)
    /// when the uop was installed.
    pub idep: [Option<UopLoc>; MAX_IDEPS],
    pub idep_regs: [Option<RegName>; MAX_IDEPS],
    pub ivalue_valid: [bool; MAX_IDEPS],

    pub odep_regs: [Option<RegName>; MAX_ODEPS],
    /// Head of this uop's odep list in the owning core's [`super::odep::OdepPool`].
    pub odep_head: Option<u32>,

    pub rob_index: Option<u32>,
    pub ldq_index: Option<u32>,
    pub stq_index: Option<u32>,
    /// `-1` when not yet bound to a port.
    pub port_assignment: i32,

    pub action_id: u64,
    pub ovalue: u64,
    pub ovalue_valid: bool,
    pub num_replays: u32,
    pub in_ready_q: bool,

    /// Fusion linkage. `fusion_size` is meaningful only on the head
    /// (`flags.is_fusion_head`); `fusion_next` links to the next
    /// member's index within the same Mop's uop vector.
    pub fusion_size: u8,
    pub fusion_next: Option<u32>,

    pub timing: Timing,
}

impl Uop {
    pub fn loc(&self) -> UopLoc {
        UopLoc {
            mop_seq: self.mop_seq,
            uop_idx: self.idx_in_mop,
        }
    }

    /// A uop becomes ready when every idep has woken and the derived
    /// `when_ready` has arrived.
    pub fn is_ready(&self, now: TickT) -> bool {
        self.ivalue_valid.iter().all(|v| *v) && self.timing.when_ready <= now
    }

    /// Snatch-back on a load miss reschedule or an STQ STD-missing
    /// rearm: undoes the wake of input `op_num`.
    pub fn rearm_idep(&mut self, op_num: usize) {
        self.ivalue_valid[op_num] = false;
        self.timing.when_ival_ready[op_num] = TICK_T_MAX;
        self.timing.when_ready = TICK_T_MAX;
    }

    pub fn wake_idep(&mut self, op_num: usize, now: TickT) {
        self.ivalue_valid[op_num] = true;
        self.timing.when_ival_ready[op_num] = now;
        self.timing.recompute_ready();
    }

    /// Initializes the idep-readiness slots at install time: slots
    /// `0..arity` start unresolved (`TICK_T_MAX`, waiting on a
    /// producer or an immediate graph edge), slots beyond `arity` are
    /// vacuously ready so [`Timing::recompute_ready`] never stalls on
    /// an idep the uop doesn't actually have.
    pub fn init_idep_arity(&mut self, arity: usize) {
        for i in 0..MAX_IDEPS {
            if i < arity {
                self.ivalue_valid[i] = false;
                self.timing.when_ival_ready[i] = TICK_T_MAX;
            } else {
                self.ivalue_valid[i] = true;
                self.timing.when_ival_ready[i] = 0;
            }
        }
        self.timing.recompute_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_uop() -> Uop {
        Uop {
            uop_seq: 0,
            mop_seq: 0,
            idx_in_mop: 0,
            fu_class: FuClass::Int,
            mem_size: 0,
            flags: UopFlags::default(),
            idep: [None; MAX_IDEPS],
            idep_regs: [None; MAX_IDEPS],
            ivalue_valid: [true; MAX_IDEPS],
            odep_regs: [None; MAX_ODEPS],
            odep_head: None,
            rob_index: None,
            ldq_index: None,
            stq_index: None,
            port_assignment: -1,
            action_id: 0,
            ovalue: 0,
            ovalue_valid: false,
            num_replays: 0,
            in_ready_q: false,
            fusion_size: 0,
            fusion_next: None,
            timing: Timing::default(),
        }
    }

    #[test]
    fn fresh_timing_is_monotone_trivially() {
        assert!(Timing::default().monotone_if_completed());
    }

    #[test]
    fn completed_timing_must_be_ordered() {
        let mut t = Timing::default();
        t.when_decoded = 1;
        t.when_allocated = 2;
        t.when_ready = 3;
        t.when_issued = 4;
        t.when_exec = 5;
        t.when_completed = 6;
        assert!(t.monotone_if_completed());
        t.when_exec = 7;
        assert!(!t.monotone_if_completed());
    }

    #[test]
    fn rearm_then_wake_round_trips_readiness() {
        let mut u = base_uop();
        u.init_idep_arity(1);
        u.wake_idep(0, 5);
        assert!(u.is_ready(5));
        u.rearm_idep(0);
        assert!(!u.ivalue_valid[0]);
        assert_eq!(u.timing.when_ready, TICK_T_MAX);
    }
}
