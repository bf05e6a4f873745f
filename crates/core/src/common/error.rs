//! Core error kinds.
//!
//! None of these are exceptions in the panicking sense — every
//! fallible operation on the hot per-cycle path returns a `Result`, and
//! only [`CoreError::ContractViolation`] is meant to propagate out of
//! `main`/the harness; everything else is recovered from at the call
//! site (a stall, a dropped callback, a logged correction, a watchdog
//! flag).

use thiserror::Error;

use super::addr::PhysAddr;

/// The five error kinds the core can signal.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A core-level invariant was broken (e.g. `commit_index >
    /// complete_index`, a rename-map list found out of program order).
    /// Fatal: the caller should dump the in-flight Mop history for the
    /// affected core and abort. No recovery is attempted.
    #[error("contract violation in {component}: {detail}")]
    ContractViolation {
        component: &'static str,
        detail: String,
    },

    /// A structural resource (ROB/LDQ/STQ slot, execution port, FU
    /// capacity) was full. Never retried within the same cycle — the
    /// caller must stall and try again next cycle.
    #[error("{resource} full (capacity {capacity})")]
    StructuralOverflow {
        resource: &'static str,
        capacity: usize,
    },

    /// A callback's `action_id` no longer matches the uop's current
    /// tag. The callback must silently drop its work and return its
    /// scratch uop to the pool; this variant exists so call sites can
    /// log it at `trace` level without treating it as a real error.
    #[error("squashed: expected action_id {expected}, found {found}")]
    Squashed { expected: u64, found: u64 },

    /// `now - last_completed > deadlock_threshold`. Reported to the
    /// harness, which may force a pipe-flush.
    #[error("deadlock: no uop has completed in {stalled_cycles} cycles")]
    Deadlock { stalled_cycles: u64 },

    /// The feeder's PC disagreed with fetch PC on the non-speculative
    /// path. The core corrects fetch PC to the feeder's PC; this is
    /// logged, not propagated as a hard failure.
    #[error("feeder desync: fetch pc {fetch_pc:#x} != feeder pc {feeder_pc:#x}")]
    FeederDesync { fetch_pc: u64, feeder_pc: u64 },
}

/// Result of a virtual-to-physical address translation.
#[derive(Debug, Clone, Copy)]
pub struct TranslationResult {
    /// The translated physical address, meaningful only when `fault`
    /// is `None`.
    pub paddr: PhysAddr,
    /// Cycles consumed by the walk.
    pub cycles: u64,
    /// Set when translation faulted; the core treats this as a trap on
    /// the owning uop's Mop rather than as a `CoreError`.
    pub fault: Option<CoreError>,
}

impl TranslationResult {
    #[inline]
    pub fn success(paddr: PhysAddr, cycles: u64) -> Self {
        Self {
            paddr,
            cycles,
            fault: None,
        }
    }

    #[inline]
    pub fn fault(fault: CoreError, cycles: u64) -> Self {
        Self {
            paddr: PhysAddr(0),
            cycles,
            fault: Some(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_overflow_displays_resource_and_capacity() {
        let err = CoreError::StructuralOverflow {
            resource: "STQ",
            capacity: 32,
        };
        assert_eq!(err.to_string(), "STQ full (capacity 32)");
    }

    #[test]
    fn translation_success_has_no_fault() {
        let r = TranslationResult::success(PhysAddr::new(0x1000), 4);
        assert!(r.fault.is_none());
        assert_eq!(r.paddr.val(), 0x1000);
    }
}
