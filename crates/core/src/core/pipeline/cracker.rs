//! The macro-op-to-micro-op cracker interface. A real implementation
//! walks the x86 ISA's encoding tables and is supplied by the embedder
//! — the decoder itself is not this core's problem. What belongs to
//! the core is the *shape* it hands back: one [`UopTemplate`] per
//! micro-op, ready for the oracle to install dependency edges over.

use crate::common::constants::{MAX_IDEPS, MAX_ODEPS};
use crate::config::FuClass;
use crate::external::feeder::FeederRecord;

use super::model::{RegName, UopFlags};

/// Everything the oracle needs about one not-yet-installed uop, before
/// it has a `uop_seq`, ROB/LDQ/STQ index, or dependency edges.
#[derive(Debug, Clone)]
pub struct UopTemplate {
    pub fu_class: FuClass,
    pub mem_size: u8,
    pub flags: UopFlags,
    pub idep_regs: [Option<RegName>; MAX_IDEPS],
    pub odep_regs: [Option<RegName>; MAX_ODEPS],
}

impl UopTemplate {
    pub fn arity(&self) -> usize {
        self.idep_regs.iter().filter(|r| r.is_some()).count()
    }
}

pub trait Cracker {
    /// Crack one executed instruction into its constituent uops, in
    /// program order within the Mop.
    fn crack(&mut self, record: &FeederRecord) -> Vec<UopTemplate>;
}

/// A minimal cracker sufficient to exercise the pipeline end to end:
/// recognizes the magic profiling markers and otherwise infers a uop
/// shape from the record's `mem_buffer` (load/store/ALU), one uop per
/// memory operand plus a closing ALU uop when none are present. Not a
/// real x86 decoder — that collaborator is supplied by the embedder in
/// production.
#[derive(Debug, Default)]
pub struct StubCracker;

impl Cracker for StubCracker {
    fn crack(&mut self, record: &FeederRecord) -> Vec<UopTemplate> {
        if record.flags.is_profiling_start || record.flags.is_profiling_stop {
            return vec![UopTemplate {
                fu_class: FuClass::Magic,
                mem_size: 0,
                flags: UopFlags {
                    is_nop: true,
                    bom: true,
                    eom: true,
                    ..UopFlags::default()
                },
                idep_regs: [None; MAX_IDEPS],
                odep_regs: [None; MAX_ODEPS],
            }];
        }

        if record.mem_buffer.is_empty() {
            return vec![UopTemplate {
                fu_class: FuClass::Int,
                mem_size: 0,
                flags: UopFlags {
                    bom: true,
                    eom: true,
                    ..UopFlags::default()
                },
                idep_regs: [Some(RegName(1)), None, None],
                odep_regs: [Some(RegName(2)), None],
            }];
        }

        // Without a real decoder we can't tell load from store operands
        // apart from the raw bytes; `helix_op`/`in_critical_section` is
        // the closest proxy the feeder record offers, so a record
        // carrying either flag is treated as an all-store instruction
        // (one sta/std uop pair per memory operand) and everything else
        // as an all-load one.
        let is_store = record.flags.helix_op || record.flags.in_critical_section;
        let mut uops = Vec::new();
        let last = record.mem_buffer.len() - 1;
        for (i, operand) in record.mem_buffer.iter().enumerate() {
            let bom = i == 0;
            let eom = i == last;
            if is_store {
                uops.push(UopTemplate {
                    fu_class: FuClass::Store,
                    mem_size: operand.size,
                    flags: UopFlags {
                        is_sta: true,
                        bom,
                        eom: false,
                        ..UopFlags::default()
                    },
                    idep_regs: [Some(RegName(1)), None, None],
                    odep_regs: [None, None],
                });
                uops.push(UopTemplate {
                    fu_class: FuClass::Int,
                    mem_size: operand.size,
                    flags: UopFlags {
                        is_std: true,
                        bom: false,
                        eom,
                        ..UopFlags::default()
                    },
                    idep_regs: [Some(RegName(3)), None, None],
                    odep_regs: [None, None],
                });
            } else {
                uops.push(UopTemplate {
                    fu_class: FuClass::Load,
                    mem_size: operand.size,
                    flags: UopFlags {
                        is_load: true,
                        bom,
                        eom,
                        is_repeated: record.flags.helix_op,
                        ..UopFlags::default()
                    },
                    idep_regs: [Some(RegName(1)), None, None],
                    odep_regs: [Some(RegName(2)), None],
                });
            }
        }
        uops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::constants::MAX_ILEN;
    use crate::external::feeder::FeederFlags;

    fn base_record() -> FeederRecord {
        FeederRecord {
            pc: 0x1000,
            npc: 0x1004,
            tpc: 0,
            flags: FeederFlags::default(),
            asid: 0,
            ins: [0; MAX_ILEN],
            ins_len: 1,
            mem_buffer: Vec::new(),
            profile_id: 0,
        }
    }

    #[test]
    fn profiling_marker_becomes_magic_nop() {
        let mut c = StubCracker;
        let mut r = base_record();
        r.flags.is_profiling_start = true;
        let uops = c.crack(&r);
        assert_eq!(uops.len(), 1);
        assert_eq!(uops[0].fu_class, FuClass::Magic);
    }

    #[test]
    fn no_memory_operands_yields_single_alu_uop() {
        let mut c = StubCracker;
        let r = base_record();
        let uops = c.crack(&r);
        assert_eq!(uops.len(), 1);
        assert_eq!(uops[0].fu_class, FuClass::Int);
    }

    #[test]
    fn memory_operands_yield_one_uop_each() {
        let mut c = StubCracker;
        let mut r = base_record();
        r.mem_buffer.push(crate::external::feeder::MemOperand {
            vaddr: 0x2000,
            size: 4,
        });
        let uops = c.crack(&r);
        assert_eq!(uops.len(), 1);
        assert!(uops[0].flags.bom && uops[0].flags.eom);
    }

    #[test]
    fn store_marked_record_yields_sta_std_pair() {
        let mut c = StubCracker;
        let mut r = base_record();
        r.flags.helix_op = true;
        r.mem_buffer.push(crate::external::feeder::MemOperand {
            vaddr: 0x2000,
            size: 4,
        });
        let uops = c.crack(&r);
        assert_eq!(uops.len(), 2);
        assert!(uops[0].flags.is_sta && uops[0].flags.bom);
        assert!(uops[1].flags.is_std && uops[1].flags.eom);
    }
}
