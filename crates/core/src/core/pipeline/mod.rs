//! The oracle/Mop/uop pipeline.
//!
//! 1. **Model:** the Mop/uop data model.
//! 2. **Oracle:** feeder handshake, cracking, dependency installation,
//!    and recovery bookkeeping.
//! 3. **MopQ:** the ring-buffered Mop queue plus feeder-record shadow
//!    queue backing speculative-mode recovery replay.
//! 4. **Rename map:** architectural-register producer tracking.
//! 5. **Cracker:** the Mop -> uop-template decomposition seam.
//! 6. **ROB/LDQ/STQ:** the three per-cycle-width-bounded structural
//!    resources allocation walks against.
//! 7. **Engine/Backend:** pluggable IO-DPM/STM execution back-ends and
//!    the stages they share.

/// Execution engine dispatch between the IO-DPM and STM back-ends.
pub mod engine;

/// The Mop/uop data model.
pub mod model;

/// Feeder handshake, cracking, and dependency installation.
pub mod oracle;

/// Ring-buffered Mop queue and feeder-record shadow queue.
pub mod mopq;

/// Architectural-register producer tracking.
pub mod rename_map;

/// The Mop -> uop-template decomposition seam.
pub mod cracker;

/// Load queue.
pub mod ldq;

/// Store queue.
pub mod stq;

/// Reorder buffer for in-order commit.
pub mod rob;

/// Backend pipeline stages.
pub mod backend;
