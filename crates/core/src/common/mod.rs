//! Common types shared across the oracle, pipeline, and external
//! interface adapters.
//!
//! 1. **Address types:** strong newtypes for virtual/physical addresses
//!    and byte ranges, used by the LDQ/STQ overlap checks.
//! 2. **Constants:** the data-model size limits (`MAX_IDEPS`,
//!    `MAX_ODEPS`) and the cache-line geometry used by split-access
//!    detection.
//! 3. **Memory operation classification:** the `op` argument of the
//!    cache/TLB `enqueue` contract.
//! 4. **Error handling:** the core's error kinds and the v2p
//!    translation result type.

/// Address type definitions (virtual/physical addresses, byte ranges).
pub mod addr;

/// Data-model and cache-geometry constants.
pub mod constants;

/// Memory operation classification for the cache/TLB interface.
pub mod data;

/// Core error kinds and translation results.
pub mod error;

pub use addr::{ByteRange, PhysAddr, VirtAddr};
pub use constants::{LINE_BYTES, MAX_IDEPS, MAX_ILEN, MAX_ODEPS, TICK_T_MAX, TickT};
pub use data::MemOp;
pub use error::{CoreError, TranslationResult};
