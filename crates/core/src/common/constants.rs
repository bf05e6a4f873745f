//! Global constants shared by the uop data model, the LDQ/STQ, and the
//! cache-line geometry assumed by split-access detection.

/// Maximum raw instruction length a feeder record's `ins` byte array
/// can carry.
pub const MAX_ILEN: usize = 15;

/// Maximum number of input-register dependencies a single uop may
/// carry.
pub const MAX_IDEPS: usize = 3;

/// Maximum number of output-register dependencies a single uop may
/// carry.
pub const MAX_ODEPS: usize = 2;

/// Cache-line size in bytes, used to detect split-line loads/stores.
pub const LINE_BYTES: u64 = 64;

/// Sentinel for an un-set `tick_t` timing field; every timing field
/// starts here and is assigned at most once per lifetime.
pub const TICK_T_MAX: u64 = u64::MAX;

/// A simulated cycle count. Monotonic, per-core.
pub type TickT = u64;
