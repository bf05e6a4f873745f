//! The cache/TLB opaque interface: a trait the core depends on, not a
//! concrete hierarchy — the actual DL1/DTLB/DRAM/prefetcher stack is
//! an external collaborator reached only through `enqueue`/`process`.
//!
//! Raw callback plumbing doesn't translate idiomatically; instead this
//! is a pull-based event queue drained once per cycle by `process`,
//! with completions tagged by `action_id` so a caller whose uop has
//! since been squashed can recognize and drop a stale event.

use crate::common::addr::PhysAddr;
use crate::common::constants::TickT;
use crate::common::data::MemOp;
use crate::common::error::CoreError;
use crate::core::pipeline::model::UopLoc;

/// One completed (or failed) cache/TLB operation, yielded by
/// [`CacheTlbPort::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// The access completed at this level.
    Done {
        action_id: u64,
        uop: UopLoc,
        is_split: bool,
    },
    /// The access missed; retry at the next level after `latency`
    /// cycles.
    Miss {
        action_id: u64,
        uop: UopLoc,
        latency: u64,
    },
    /// A DTLB translation completed.
    Translated { action_id: u64, uop: UopLoc },
}

pub trait CacheTlbPort {
    /// Whether `level` currently has a free MSHR/queue slot for this
    /// access. A `false` return signals structural overflow — the
    /// caller must stall, never retry within the same cycle.
    fn enqueuable(&self, level: u8, op: MemOp, asid: u32) -> bool;

    /// Submit an access at cycle `now`. `is_split` marks the trailing
    /// half of a split-line access.
    #[allow(clippy::too_many_arguments)]
    fn enqueue(
        &mut self,
        level: u8,
        op: MemOp,
        asid: u32,
        addr: PhysAddr,
        action_id: u64,
        uop: UopLoc,
        is_split: bool,
        now: TickT,
    ) -> Result<(), CoreError>;

    /// Yield every event `level` has produced as of cycle `now`. The
    /// caller passes the same `now` every cycle — there is no
    /// internal clock to fall out of step with it.
    fn process(&mut self, level: u8, now: TickT) -> Vec<CacheEvent>;
}

/// A fixed-latency single-level cache/TLB double, useful for tests and
/// as a conservative default: every access completes after `latency`
/// cycles with unbounded capacity.
#[derive(Debug)]
pub struct FixedLatencyPort {
    latency: u64,
    inflight: Vec<(u64, CacheEvent)>, // (fire_at_cycle, event)
}

impl FixedLatencyPort {
    pub fn new(latency: u64) -> Self {
        Self {
            latency,
            inflight: Vec::new(),
        }
    }
}

impl CacheTlbPort for FixedLatencyPort {
    fn enqueuable(&self, _level: u8, _op: MemOp, _asid: u32) -> bool {
        true
    }

    fn enqueue(
        &mut self,
        _level: u8,
        op: MemOp,
        _asid: u32,
        _addr: PhysAddr,
        action_id: u64,
        uop: UopLoc,
        is_split: bool,
        now: TickT,
    ) -> Result<(), CoreError> {
        let event = match op {
            MemOp::Translate => CacheEvent::Translated { action_id, uop },
            MemOp::Load | MemOp::Store => CacheEvent::Done {
                action_id,
                uop,
                is_split,
            },
        };
        self.inflight.push((now + self.latency, event));
        Ok(())
    }

    fn process(&mut self, _level: u8, now: TickT) -> Vec<CacheEvent> {
        let (ready, pending): (Vec<_>, Vec<_>) =
            self.inflight.drain(..).partition(|(fire_at, _)| *fire_at <= now);
        self.inflight = pending;
        ready.into_iter().map(|(_, ev)| ev).collect()
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
    fn fixed_latency_port_fires_after_latency_cycles() {
        let mut port = FixedLatencyPort::new(2);
        port.enqueue(0, MemOp::Load, 0, PhysAddr::new(0), 7, loc(1), false, 0)
            .unwrap();
        assert!(port.process(0, 0).is_empty());
        assert!(port.process(0, 1).is_empty());
        let events = port.process(0, 2);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CacheEvent::Done { action_id: 7, .. }));
    }
}
