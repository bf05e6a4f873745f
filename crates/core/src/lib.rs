//! A cycle-accurate x86 microarchitectural core simulator.
//!
//! 1. **Oracle/Mop/uop pipeline:** the functional-to-timing bridge,
//!    the Mop/uop data model, and the ROB/LDQ/STQ structural
//!    resources.
//! 2. **Backends:** a pluggable in-order (IO-DPM) or out-of-order
//!    (STM) execution scheduler, selected by [`Config`].
//! 3. **External interfaces:** the feeder handshake, branch predictor,
//!    and cache/TLB/translator collaborators the core drives but does
//!    not implement.
//! 4. **Simulation:** [`Core`], the per-cycle driver, and `Simulator`,
//!    the embedder-facing facade over it.

/// Common types shared across the oracle, pipeline, and external
/// interface adapters (addresses, constants, memory-op kinds, errors).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// The microarchitectural core: the oracle/Mop/uop pipeline and the
/// opaque execution-unit collaborators it drives.
pub mod core;
/// External interface adapters: the feeder handshake.
pub mod external;
/// The top-level per-cycle driver and embedder-facing facade.
pub mod sim;
/// Commit-time statistics collection.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// The per-cycle driver; owns the oracle, ROB/LDQ/STQ, and a selected backend.
pub use crate::sim::core_sim::Core;
/// Embedder-facing facade over [`Core`].
pub use crate::sim::simulator::Simulator;
