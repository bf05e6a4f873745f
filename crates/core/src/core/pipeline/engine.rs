//! Execution engine dispatch: `core_exec`/`core_commit` modeled as an
//! abstract capability set (step, recover, insert, deallocate,
//! schedule) that both the IO-DPM and STM back-ends satisfy, selected
//! once at construction.
//!
//! Rather than a `dyn Trait` object (which would need object-safe
//! signatures threading `&mut Core` everywhere), dispatch is a plain
//! enum match between the `IoDpm`/`Stm` variants.

use crate::common::error::CoreError;
use crate::config::Config;

use super::backend::{iodpm, stm};

/// Per-cycle outcome of the execute stage, reported up to
/// [`crate::sim::core_sim::Core::step`] so it can decide whether a
/// branch/nuke recovery needs to run before commit proceeds next cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOutcome {
    /// A control uop's oracle outcome disagreed with its prediction;
    /// names the Mop to recover to and the corrected PC.
    pub mispredict: Option<(u64, u64)>,
    /// A load discovered after the fact that it forwarded stale data,
    /// triggering a memory-order nuke.
    pub nuke: Option<u64>,
}

/// Type-erased backend state, selected once at core construction from
/// [`crate::config::Backend`].
#[derive(Debug)]
pub enum BackendState {
    /// Fixed-stage payload pipes, in-program-order issue.
    IoDpm(iodpm::IoDpmState),
    /// Age-ordered ready lists, min-heap ALU pipes.
    Stm(stm::StmState),
}

impl BackendState {
    /// Construction dispatches once on [`crate::config::Backend`]; the
    /// selected back-end is fixed for the run.
    pub fn new(cfg: &Config) -> Self {
        match cfg.backend {
            crate::config::Backend::IoDpm => Self::IoDpm(iodpm::IoDpmState::new(cfg)),
            crate::config::Backend::Stm => Self::Stm(stm::StmState::new(cfg)),
        }
    }

    /// Issue ready uops, advance execution pipelines, wake dependents,
    /// initiate memory accesses.
    pub fn execute(&mut self, core: &mut crate::sim::core_sim::Core) -> Result<ExecuteOutcome, CoreError> {
        match self {
            Self::IoDpm(s) => iodpm::execute_stage(s, core),
            Self::Stm(s) => stm::execute_stage(s, core),
        }
    }

    /// Drop every in-flight scheduling/execution-pipe entry for a uop
    /// younger than `boundary_seq`. Newly-allocated uops not yet
    /// handed to either back-end are discovered lazily (STM:
    /// pushed into a ready list once `is_ready`; IO-DPM: pulled off
    /// `core.alloc_queue` at the front of its port), so construction
    /// from [`crate::config::Backend`] needs no separate notification
    /// hook for that path.
    pub fn recover(&mut self, boundary_seq: u64) {
        match self {
            Self::IoDpm(s) => s.flush_after(boundary_seq),
            Self::Stm(s) => s.flush_after(boundary_seq),
        }
    }
}
