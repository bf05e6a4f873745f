//! The repeater (HELIX critical-section memory) opaque interface:
//! a short-circuit path that can answer a `is_repeated` access without
//! going through DL1 at all, mirroring [`super::cache::CacheTlbPort`]'s
//! pull-based event-queue shape so both hierarchies drain identically
//! from `memory.rs`.
//!
//! Disabled (`RepeaterConfig::enabled == false`, the default) means
//! every access misses immediately — [`NullRepeater`] is the inert
//! default every `Core` carries until an embedder supplies a real one.

use crate::common::addr::PhysAddr;
use crate::common::constants::TickT;
use crate::core::pipeline::model::UopLoc;

/// One resolved (or missed) repeater access, yielded by
/// [`Repeater::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeaterEvent {
    /// The repeater held this line; short-circuits the DL1 path.
    Hit { action_id: u64, uop: UopLoc, is_split: bool },
    /// The repeater doesn't have this line; the caller must fall
    /// through to DL1.
    Miss { action_id: u64, uop: UopLoc, is_split: bool },
}

pub trait Repeater {
    /// Submit an access at cycle `now`. `is_split` marks the trailing
    /// half of a split-line access, same convention as
    /// [`super::cache::CacheTlbPort::enqueue`].
    #[allow(clippy::too_many_arguments)]
    fn enqueue(&mut self, asid: u32, addr: PhysAddr, action_id: u64, uop: UopLoc, is_split: bool, now: TickT);

    /// Yield every access resolved as of cycle `now`.
    fn process(&mut self, now: TickT) -> Vec<RepeaterEvent>;
}

/// The default repeater: every access misses on the same cycle it's
/// submitted, so `memory.rs`'s repeater path is a no-op until an
/// embedder or test supplies a real implementation.
#[derive(Debug, Default)]
pub struct NullRepeater {
    pending: Vec<RepeaterEvent>,
}

impl Repeater for NullRepeater {
    fn enqueue(&mut self, _asid: u32, _addr: PhysAddr, action_id: u64, uop: UopLoc, is_split: bool, _now: TickT) {
        self.pending.push(RepeaterEvent::Miss { action_id, uop, is_split });
    }

    fn process(&mut self, _now: TickT) -> Vec<RepeaterEvent> {
        std::mem::take(&mut self.pending)
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
    fn null_repeater_always_misses_same_cycle() {
        let mut r = NullRepeater::default();
        r.enqueue(0, PhysAddr::new(0x100), 1, loc(1), false, 5);
        let events = r.process(5);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RepeaterEvent::Miss { action_id: 1, .. }));
        assert!(r.process(5).is_empty());
    }
}
