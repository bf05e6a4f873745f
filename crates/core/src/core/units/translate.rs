//! Virtual-to-physical translation: a process-wide `v2p_translate`
//! contract, asid-keyed. First-touch allocates a fresh physical frame
//! from a monotonic counter; threads are meant to coordinate through a
//! single lock, modeled here as `&mut self` since the core drives one
//! core's worth of calls per cycle and the embedder is responsible for
//! any cross-core synchronization.

use std::collections::HashMap;

use crate::common::addr::{PhysAddr, VirtAddr};
use crate::common::error::CoreError;

const PAGE_SHIFT: u64 = 12;
const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

pub trait Translator {
    /// Translate `vaddr` in address space `asid`; first touch of a
    /// page allocates a fresh physical frame.
    fn v2p_translate(&mut self, asid: u32, vaddr: VirtAddr) -> Result<PhysAddr, CoreError>;

    /// Notify the translator that `vaddr` was just written (dirty-bit
    /// bookkeeping for an external coherence model, out of scope here).
    fn notify_write(&mut self, asid: u32, vaddr: VirtAddr);

    fn mmap(&mut self, asid: u32, vaddr: VirtAddr, len: u64);
    fn munmap(&mut self, asid: u32, vaddr: VirtAddr, len: u64);
    fn brk(&mut self, asid: u32, new_brk: VirtAddr);
}

/// A monotonic first-touch page allocator, one page table per `asid`.
#[derive(Debug, Default)]
pub struct FlatTranslator {
    tables: HashMap<u32, HashMap<u64, u64>>,
    next_frame: u64,
}

impl FlatTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    fn page_of(vaddr: VirtAddr) -> u64 {
        vaddr.val() >> PAGE_SHIFT
    }
}

impl Translator for FlatTranslator {
    fn v2p_translate(&mut self, asid: u32, vaddr: VirtAddr) -> Result<PhysAddr, CoreError> {
        let page = Self::page_of(vaddr);
        let offset = vaddr.val() & (PAGE_SIZE - 1);
        let existing = self.tables.get(&asid).and_then(|t| t.get(&page).copied());
        let frame = match existing {
            Some(f) => f,
            None => {
                let f = self.next_frame;
                self.next_frame += 1;
                self.tables.entry(asid).or_default().insert(page, f);
                f
            }
        };
        Ok(PhysAddr::new((frame << PAGE_SHIFT) | offset))
    }

    fn notify_write(&mut self, _asid: u32, _vaddr: VirtAddr) {}

    fn mmap(&mut self, _asid: u32, _vaddr: VirtAddr, _len: u64) {}

    fn munmap(&mut self, asid: u32, vaddr: VirtAddr, len: u64) {
        if let Some(table) = self.tables.get_mut(&asid) {
            let start = Self::page_of(vaddr);
            let pages = len.div_ceil(PAGE_SIZE);
            for p in start..start + pages {
                table.remove(&p);
            }
        }
    }

    fn brk(&mut self, _asid: u32, _new_brk: VirtAddr) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_page_maps_to_same_frame() {
        let mut t = FlatTranslator::new();
        let a = t.v2p_translate(0, VirtAddr::new(0x1000)).unwrap();
        let b = t.v2p_translate(0, VirtAddr::new(0x1004)).unwrap();
        assert_eq!(a.val() & !0xfff, b.val() & !0xfff);
    }

    #[test]
    fn different_asids_get_independent_tables() {
        let mut t = FlatTranslator::new();
        let a = t.v2p_translate(0, VirtAddr::new(0x1000)).unwrap();
        let b = t.v2p_translate(1, VirtAddr::new(0x1000)).unwrap();
        assert_ne!(a.val(), b.val());
    }
}
