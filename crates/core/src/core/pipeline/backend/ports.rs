//! Functional-unit execution pipes shared by both back-ends. Each
//! FU's ALU pipe is a binary min-heap keyed on `pipe_exit_time`. The
//! STM scheduler issues directly into a [`FuBank`]; the IO-DPM
//! backend's fixed payload pipe feeds the same bank once a uop clears
//! `can_issue_IO`, so both back-ends share one latency/issue-rate/
//! capacity model per [`FuClass`].

use crate::common::constants::TICK_T_MAX;
use crate::common::constants::TickT;
use crate::config::{ALL_FU_CLASSES, ExecConfig, FuClass, FuConfig};
use crate::core::pipeline::model::UopLoc;

/// One in-flight uop inside an FU's pipe, keyed for the min-heap by
/// `pipe_exit_time`.
#[derive(Debug, Clone, Copy)]
pub struct PipeSlot {
    pub uop: UopLoc,
    /// Global age key, carried alongside `uop` so age comparisons
    /// (`can_issue_IO`) don't need a round-trip through the `MopQueue`.
    pub uop_seq: u64,
    pub action_id: u64,
    pub pipe_exit_time: TickT,
}

/// A binary min-heap of [`PipeSlot`]s, keyed on `pipe_exit_time`, fixed
/// at `capacity` live slots; the root is always the slot with the
/// smallest `pipe_exit_time`.
#[derive(Debug, Default)]
pub struct AluHeap {
    slots: Vec<PipeSlot>,
    capacity: usize,
}

impl AluHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `ALU_heap_balance`: insert at the end and sift up.
    pub fn insert(&mut self, slot: PipeSlot) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots.push(slot);
        let mut i = self.slots.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.slots[parent].pipe_exit_time <= self.slots[i].pipe_exit_time {
                break;
            }
            self.slots.swap(parent, i);
            i = parent;
        }
        true
    }

    pub fn peek_root(&self) -> Option<&PipeSlot> {
        self.slots.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipeSlot> {
        self.slots.iter()
    }

    /// `ALU_heap_remove`: replace the root with the last entry and sift
    /// down, returning the removed root.
    pub fn pop_root(&mut self) -> Option<PipeSlot> {
        if self.slots.is_empty() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.slots.swap(0, last);
        let root = self.slots.pop();
        let mut i = 0;
        loop {
            let l = 2 * i + 1;
            let r = 2 * i + 2;
            let mut smallest = i;
            if l < self.slots.len() && self.slots[l].pipe_exit_time < self.slots[smallest].pipe_exit_time {
                smallest = l;
            }
            if r < self.slots.len() && self.slots[r].pipe_exit_time < self.slots[smallest].pipe_exit_time {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.slots.swap(i, smallest);
            i = smallest;
        }
        root
    }
}

/// One functional-unit class's execution pipe: latency, issue
/// throttling, and its [`AluHeap`] of in-flight uops.
#[derive(Debug)]
pub struct FuUnit {
    pub class: FuClass,
    pub latency: TickT,
    pub issue_rate: TickT,
    /// Next cycle this FU can accept an issue, advanced by its
    /// `issue_rate` on each one; models non-pipelined or throttled ALUs.
    pub when_executable: TickT,
    pub heap: AluHeap,
}

impl FuUnit {
    fn new(class: FuClass, cfg: FuConfig, extra_latency: TickT) -> Self {
        Self {
            class,
            latency: cfg.latency + extra_latency,
            issue_rate: cfg.issue_rate.max(1),
            when_executable: 0,
            heap: AluHeap::new(cfg.capacity),
        }
    }

    pub fn can_issue(&self, now: TickT) -> bool {
        self.when_executable <= now && !self.heap.is_full()
    }

    /// Issue `uop` into this FU's pipe; returns the cycle it will exit
    /// at. Caller must have already checked [`Self::can_issue`].
    pub fn issue(&mut self, uop: UopLoc, uop_seq: u64, action_id: u64, now: TickT) -> TickT {
        let exit = now + self.latency;
        let inserted = self.heap.insert(PipeSlot {
            uop,
            uop_seq,
            action_id,
            pipe_exit_time: exit,
        });
        debug_assert!(inserted, "issue called without a free FU slot");
        self.when_executable = now + self.issue_rate;
        exit
    }

    /// `can_issue_IO`: an in-order back-end may not let a younger
    /// uop's completion overtake an older uop still resident in the
    /// same class's pipe.
    pub fn would_reorder_completion(&self, candidate_uop_seq: u64, candidate_exit: TickT) -> bool {
        self.heap
            .iter()
            .any(|s| s.uop_seq < candidate_uop_seq && s.pipe_exit_time > candidate_exit)
    }
}

/// One bank of FU pipes, scoped to a single execution port: only the
/// classes that port is bound to (§4.2/§4.3's per-port FU binding) get
/// a unit here, so a uop's class being absent from a port's bank is
/// what makes that port ineligible for it.
#[derive(Debug)]
pub struct FuBank {
    units: Vec<FuUnit>,
}

fn fu_config_for(cfg: &ExecConfig, class: FuClass) -> (FuConfig, TickT) {
    match class {
        FuClass::Int => (cfg.int, 0),
        FuClass::Load => (cfg.load, 0),
        FuClass::Store => (cfg.store, 0),
        FuClass::Fp => (cfg.fp, cfg.fp_penalty),
        FuClass::Branch => (cfg.branch, 0),
        FuClass::Magic => (cfg.magic, 0),
    }
}

impl FuBank {
    /// Build a bank hosting every [`FuClass`] — the full crossbar,
    /// used directly by tests and as the per-port bank when a port's
    /// bindings resolve to [`ALL_FU_CLASSES`].
    pub fn from_exec_config(cfg: &ExecConfig) -> Self {
        Self::for_classes(cfg, &ALL_FU_CLASSES)
    }

    /// Build a bank hosting only `classes` — one `FuUnit` per class
    /// named, in the order given.
    pub fn for_classes(cfg: &ExecConfig, classes: &[FuClass]) -> Self {
        Self {
            units: classes
                .iter()
                .map(|&class| {
                    let (fu_cfg, extra_latency) = fu_config_for(cfg, class);
                    FuUnit::new(class, fu_cfg, extra_latency)
                })
                .collect(),
        }
    }

    pub fn hosts(&self, class: FuClass) -> bool {
        self.units.iter().any(|u| u.class == class)
    }

    /// # Panics
    /// If `class` isn't one this bank was built for — callers must
    /// only route a uop to a port whose bank `hosts` its class.
    pub fn unit_mut(&mut self, class: FuClass) -> &mut FuUnit {
        self.units
            .iter_mut()
            .find(|u| u.class == class)
            .expect("caller must only issue a class this port's bank hosts")
    }

    /// # Panics
    /// See [`Self::unit_mut`].
    pub fn unit(&self, class: FuClass) -> &FuUnit {
        self.units
            .iter()
            .find(|u| u.class == class)
            .expect("caller must only issue a class this port's bank hosts")
    }

    /// Drain every FU whose root has exited by `now`, across all
    /// classes. Squashed entries (`action_id` mismatch, checked by the
    /// caller against the live uop) are still returned here — the
    /// caller is responsible for the mismatch check and silent drop.
    pub fn drain_exits(&mut self, now: TickT) -> Vec<PipeSlot> {
        let mut out = Vec::new();
        for unit in &mut self.units {
            while unit.heap.peek_root().is_some_and(|s| s.pipe_exit_time <= now) {
                if let Some(slot) = unit.heap.pop_root() {
                    out.push(slot);
                }
            }
        }
        out
    }

    /// The smallest ready `pipe_exit_time` (`<= now`) across every
    /// class's heap, without popping anything.
    fn peek_earliest_ready(&self, now: TickT) -> Option<TickT> {
        self.units
            .iter()
            .filter_map(|u| u.heap.peek_root().filter(|s| s.pipe_exit_time <= now).map(|s| s.pipe_exit_time))
            .min()
    }

    /// Pop at most one ready exit (the globally-earliest `pipe_exit_time`
    /// across every class's heap that is `<= now`), leaving every other
    /// ready exit untouched in its heap. Lets a caller gate completion
    /// draining on a downstream resource (the IO-DPM commit buffer)
    /// one slot at a time without losing the rest of a same-cycle batch.
    pub fn pop_earliest_exit(&mut self, now: TickT) -> Option<PipeSlot> {
        let winner = self
            .units
            .iter()
            .enumerate()
            .filter_map(|(i, u)| u.heap.peek_root().filter(|s| s.pipe_exit_time <= now).map(|s| (i, s.pipe_exit_time)))
            .min_by_key(|&(_, exit)| exit)
            .map(|(i, _)| i)?;
        self.units[winner].heap.pop_root()
    }
}

/// The classes port `port_idx` is bound to, per `cfg.port_bindings`,
/// falling back to [`ALL_FU_CLASSES`] when the config doesn't name
/// that port (including the common case of an empty/absent
/// `port_bindings` entirely — a full crossbar).
pub fn bindings_for_port(cfg: &ExecConfig, port_idx: usize) -> Vec<FuClass> {
    cfg.port_bindings.get(port_idx).cloned().unwrap_or_else(|| ALL_FU_CLASSES.to_vec())
}

/// One [`FuBank`] per execution port, built from `cfg.port_bindings`.
pub fn banks_per_port(cfg: &ExecConfig, num_ports: usize) -> Vec<FuBank> {
    (0..num_ports).map(|p| FuBank::for_classes(cfg, &bindings_for_port(cfg, p))).collect()
}

/// Pop the globally-earliest ready exit (`<= now`) across every port's
/// bank, leaving every other ready exit untouched — the multi-port
/// generalization of [`FuBank::pop_earliest_exit`].
pub fn pop_earliest_exit_across(banks: &mut [FuBank], now: TickT) -> Option<PipeSlot> {
    let winner = banks
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.peek_earliest_ready(now).map(|exit| (i, exit)))
        .min_by_key(|&(_, exit)| exit)
        .map(|(i, _)| i)?;
    banks[winner].pop_earliest_exit(now)
}

pub const UNSET: TickT = TICK_T_MAX;

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(seq: u64) -> UopLoc {
        UopLoc {
            mop_seq: seq,
            uop_idx: 0,
        }
    }

    fn slot(seq: u64, exit: TickT) -> PipeSlot {
        PipeSlot {
            uop: loc(seq),
            uop_seq: seq,
            action_id: 0,
            pipe_exit_time: exit,
        }
    }

    #[test]
    fn heap_pops_smallest_exit_time_first() {
        let mut h = AluHeap::new(4);
        h.insert(slot(1, 10));
        h.insert(slot(2, 3));
        h.insert(slot(3, 7));
        assert_eq!(h.pop_root().unwrap().uop, loc(2));
        assert_eq!(h.pop_root().unwrap().uop, loc(3));
        assert_eq!(h.pop_root().unwrap().uop, loc(1));
        assert!(h.pop_root().is_none());
    }

    #[test]
    fn heap_rejects_insert_past_capacity() {
        let mut h = AluHeap::new(1);
        assert!(h.insert(slot(1, 1)));
        assert!(!h.insert(slot(2, 1)));
    }

    #[test]
    fn fu_unit_throttles_by_issue_rate() {
        let mut fu = FuUnit::new(
            FuClass::Int,
            FuConfig {
                latency: 1,
                issue_rate: 3,
                capacity: 4,
            },
            0,
        );
        assert!(fu.can_issue(0));
        fu.issue(loc(1), 1, 0, 0);
        assert!(!fu.can_issue(1));
        assert!(!fu.can_issue(2));
        assert!(fu.can_issue(3));
    }

    #[test]
    fn would_reorder_completion_flags_younger_overtaking_older() {
        let mut fu = FuUnit::new(
            FuClass::Fp,
            FuConfig {
                latency: 4,
                issue_rate: 1,
                capacity: 4,
            },
            0,
        );
        fu.issue(loc(1), 1, 0, 0); // exits at 4
        assert!(fu.would_reorder_completion(2, 2)); // younger, exits sooner
        assert!(!fu.would_reorder_completion(2, 10)); // younger, exits later: fine
    }

    #[test]
    fn pop_earliest_exit_drains_one_at_a_time_across_classes() {
        let cfg = FuConfig {
            latency: 1,
            issue_rate: 1,
            capacity: 4,
        };
        let mut bank = FuBank::from_exec_config(&ExecConfig {
            int: cfg,
            load: cfg,
            store: cfg,
            fp: cfg,
            branch: cfg,
            magic: cfg,
            ..ExecConfig::default()
        });
        bank.unit_mut(FuClass::Int).issue(loc(1), 1, 0, 0); // exits at 1
        bank.unit_mut(FuClass::Load).issue(loc(2), 2, 0, 0); // exits at 1
        assert!(bank.pop_earliest_exit(0).is_none());
        let first = bank.pop_earliest_exit(1).unwrap();
        let second = bank.pop_earliest_exit(1).unwrap();
        assert_ne!(first.uop_seq, second.uop_seq);
        assert!(bank.pop_earliest_exit(1).is_none());
    }

    #[test]
    fn fp_unit_gets_extra_latency() {
        let fu = FuUnit::new(
            FuClass::Fp,
            FuConfig {
                latency: 4,
                issue_rate: 1,
                capacity: 1,
            },
            2,
        );
        assert_eq!(fu.latency, 6);
    }

    #[test]
    fn bindings_default_to_full_crossbar() {
        let cfg = ExecConfig::default();
        let classes = bindings_for_port(&cfg, 3);
        assert_eq!(classes.len(), ALL_FU_CLASSES.len());
    }

    #[test]
    fn bindings_honor_explicit_per_port_restriction() {
        let mut cfg = ExecConfig::default();
        cfg.port_bindings = vec![vec![FuClass::Load], vec![FuClass::Int, FuClass::Store]];
        let bank0 = FuBank::for_classes(&cfg, &bindings_for_port(&cfg, 0));
        assert!(bank0.hosts(FuClass::Load));
        assert!(!bank0.hosts(FuClass::Int));
        // A port past the configured entries falls back to the full crossbar.
        let bank2 = FuBank::for_classes(&cfg, &bindings_for_port(&cfg, 2));
        assert!(bank2.hosts(FuClass::Fp));
    }

    #[test]
    fn pop_earliest_exit_across_finds_the_winner_in_any_port() {
        let cfg = ExecConfig::default();
        let mut banks = banks_per_port(&cfg, 2);
        banks[0].unit_mut(FuClass::Int).issue(loc(1), 1, 0, 0);
        banks[1].unit_mut(FuClass::Load).issue(loc(2), 2, 0, 0);
        let first = pop_earliest_exit_across(&mut banks, 2).unwrap();
        assert_eq!(first.uop_seq, 1); // Int latency 1 exits before Load latency 2
    }
}
