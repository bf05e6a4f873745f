//! The top-level per-cycle driver.
//!
//! [`core_sim`] owns the oracle, ROB/LDQ/STQ, and a selected backend,
//! and drives one cycle's worth of the pipeline stages in the
//! backward, youngest-to-oldest order the single-threaded-per-core
//! model requires. [`simulator`] is the thin embedder-facing facade
//! over it.

pub mod core_sim;
pub mod simulator;
