//! The microarchitectural core: the oracle/Mop/uop pipeline and the
//! opaque execution-unit collaborators it drives.

/// The oracle/Mop/uop pipeline (model, oracle, MopQ, ROB/LDQ/STQ, backends).
pub mod pipeline;

/// Opaque collaborators: branch predictor, cache/TLB, translator.
pub mod units;
