//! The feeder handshake record and the [`Feeder`] trait the
//! oracle pulls from. The feeder itself — parsing a trace file or
//! talking to a live functional emulator — is the embedder's problem;
//! only this contract matters to the core.

use serde::{Deserialize, Serialize};

use crate::common::constants::MAX_ILEN;

/// Flow-control flags carried on every feeder record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeederFlags {
    pub br_taken: bool,
    pub speculative: bool,
    pub real: bool,
    pub valid: bool,
    pub helix_op: bool,
    pub in_critical_section: bool,
    pub is_profiling_start: bool,
    pub is_profiling_stop: bool,
}

/// One memory micro-operand in program order (§6 `mem_buffer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemOperand {
    pub vaddr: u64,
    pub size: u8,
}

/// One executed x86 instruction as reported by the feeder (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeederRecord {
    pub pc: u64,
    pub npc: u64,
    pub tpc: u64,
    pub flags: FeederFlags,
    pub asid: u32,
    #[serde(with = "serde_bytes_array")]
    pub ins: [u8; MAX_ILEN],
    pub ins_len: u8,
    pub mem_buffer: Vec<MemOperand>,
    pub profile_id: u64,
}

/// The result of handing a record to [`crate::core::pipeline::oracle::Oracle::buffer_handshake`]
/// (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeResult {
    /// The record was accepted onto the shadow queue.
    AllGood,
    /// We wanted a speculative record but the feeder gave a real one;
    /// the oracle synthesized a NOP instead and did not consume this
    /// record — call `buffer_handshake` again with the same record.
    NotConsumed,
    /// The feeder gave a speculative record but we're on the correct
    /// (non-speculative) path; it was dropped.
    NotNeeded,
}

/// A source of [`FeederRecord`]s. An embedder implements this over a
/// trace file, a checkpoint replay, or a live functional emulator.
pub trait Feeder {
    /// Pull the next record, if the feeder has one ready. Returning
    /// `None` stalls fetch until the feeder catches up.
    fn next_record(&mut self) -> Option<FeederRecord>;
}

/// A feeder over a pre-recorded, in-memory trace — the common case in
/// tests and offline replays.
#[derive(Debug, Default)]
pub struct TraceFeeder {
    records: std::collections::VecDeque<FeederRecord>,
}

impl TraceFeeder {
    pub fn new(records: impl IntoIterator<Item = FeederRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }
}

impl Feeder for TraceFeeder {
    fn next_record(&mut self) -> Option<FeederRecord> {
        self.records.pop_front()
    }
}

mod serde_bytes_array {
    use serde::de::Error;
    use serde::{Deserializer, Serializer};

    use crate::common::constants::MAX_ILEN;

    pub fn serialize<S: Serializer>(bytes: &[u8; MAX_ILEN], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; MAX_ILEN], D::Error> {
        let v: Vec<u8> = serde::Deserialize::deserialize(de)?;
        if v.len() != MAX_ILEN {
            return Err(D::Error::custom(format!(
                "expected {MAX_ILEN} instruction bytes, found {}",
                v.len()
            )));
        }
        let mut out = [0u8; MAX_ILEN];
        out.copy_from_slice(&v);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pc: u64) -> FeederRecord {
        FeederRecord {
            pc,
            npc: pc + 4,
            tpc: 0,
            flags: FeederFlags {
                valid: true,
                real: true,
                ..FeederFlags::default()
            },
            asid: 0,
            ins: [0; MAX_ILEN],
            ins_len: 1,
            mem_buffer: Vec::new(),
            profile_id: 0,
        }
    }

    #[test]
    fn trace_feeder_replays_in_order() {
        let mut f = TraceFeeder::new(vec![record(0x1000), record(0x1004)]);
        assert_eq!(f.next_record().unwrap().pc, 0x1000);
        assert_eq!(f.next_record().unwrap().pc, 0x1004);
        assert!(f.next_record().is_none());
    }

    #[test]
    fn json_round_trips_ins_bytes() {
        let r = record(0x2000);
        let s = serde_json::to_string(&r).unwrap();
        let back: FeederRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(back, r);
    }
}
