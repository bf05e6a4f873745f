//! The rename map: for each architectural register name, an ordered
//! list of the uops currently holding it as an output, oldest producer
//! first.
//!
//! A per-register ordered list rather than a single-producer
//! scoreboard slot, since x86 fusion and speculative re-execution can
//! leave more than one live producer of the same architectural
//! register in flight at once.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::common::error::CoreError;

use super::model::{RegName, UopLoc};

/// Ordered-producer-list rename map.
#[derive(Debug, Default)]
pub struct RenameMap {
    producers: HashMap<RegName, VecDeque<UopLoc>>,
}

impl RenameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `uop` as the new youngest producer of `reg`.
    pub fn install(&mut self, reg: RegName, uop: UopLoc) {
        self.producers.entry(reg).or_default().push_back(uop);
    }

    /// Undo the installation of `uop` as a producer of `reg`; it must
    /// currently be the youngest (back) entry.
    pub fn undo(&mut self, reg: RegName, uop: UopLoc) -> Result<(), CoreError> {
        let list = self.producers.get_mut(&reg).ok_or(CoreError::ContractViolation {
            component: "RenameMap::undo",
            detail: format!("register {reg:?} has no producer list"),
        })?;
        match list.back() {
            Some(back) if *back == uop => {
                list.pop_back();
                if list.is_empty() {
                    self.producers.remove(&reg);
                }
                Ok(())
            }
            Some(back) => Err(CoreError::ContractViolation {
                component: "RenameMap::undo",
                detail: format!(
                    "register {reg:?}: undo expected youngest producer {uop:?}, found {back:?}"
                ),
            }),
            None => Err(CoreError::ContractViolation {
                component: "RenameMap::undo",
                detail: format!("register {reg:?} has empty producer list"),
            }),
        }
    }

    /// Retire `uop` as the producer of `reg`; it must currently be the
    /// oldest (front) entry.
    pub fn commit(&mut self, reg: RegName, uop: UopLoc) -> Result<(), CoreError> {
        let list = self.producers.get_mut(&reg).ok_or(CoreError::ContractViolation {
            component: "RenameMap::commit",
            detail: format!("register {reg:?} has no producer list"),
        })?;
        match list.front() {
            Some(front) if *front == uop => {
                list.pop_front();
                if list.is_empty() {
                    self.producers.remove(&reg);
                }
                Ok(())
            }
            Some(front) => Err(CoreError::ContractViolation {
                component: "RenameMap::commit",
                detail: format!(
                    "register {reg:?}: commit expected oldest producer {uop:?}, found {front:?}"
                ),
            }),
            None => Err(CoreError::ContractViolation {
                component: "RenameMap::commit",
                detail: format!("register {reg:?} has empty producer list"),
            }),
        }
    }

    /// The uop an idep edge should bind to: the youngest current
    /// producer of `reg`, if any.
    pub fn youngest_producer(&self, reg: RegName) -> Option<UopLoc> {
        self.producers.get(&reg).and_then(|l| l.back().copied())
    }

    /// The full producer list for `reg`, oldest first, for testing
    /// program-order invariants.
    pub fn producers_of(&self, reg: RegName) -> Vec<UopLoc> {
        self.producers
            .get(&reg)
            .map(|l| l.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.producers.clear();
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
    fn install_then_undo_is_identity() {
        let mut m = RenameMap::new();
        let r = RegName(1);
        m.install(r, loc(1));
        m.install(r, loc(2));
        m.undo(r, loc(2)).unwrap();
        assert_eq!(m.producers_of(r), vec![loc(1)]);
    }

    #[test]
    fn undo_rejects_non_youngest() {
        let mut m = RenameMap::new();
        let r = RegName(1);
        m.install(r, loc(1));
        m.install(r, loc(2));
        assert!(m.undo(r, loc(1)).is_err());
    }

    #[test]
    fn commit_pops_oldest_in_program_order() {
        let mut m = RenameMap::new();
        let r = RegName(1);
        m.install(r, loc(1));
        m.install(r, loc(2));
        m.commit(r, loc(1)).unwrap();
        assert_eq!(m.producers_of(r), vec![loc(2)]);
        assert_eq!(m.youngest_producer(r), Some(loc(2)));
    }

    #[test]
    fn commit_rejects_non_oldest() {
        let mut m = RenameMap::new();
        let r = RegName(1);
        m.install(r, loc(1));
        m.install(r, loc(2));
        assert!(m.commit(r, loc(2)).is_err());
    }
}
