//! The embedder-facing facade: construct a [`Core`] from its
//! collaborators and drive it one cycle at a time.

use crate::common::error::CoreError;
use crate::config::Config;
use crate::core::pipeline::cracker::Cracker;
use crate::core::units::branch_predictor::BranchPredictor;
use crate::core::units::cache::CacheTlbPort;
use crate::core::units::repeater::Repeater;
use crate::core::units::translate::Translator;
use crate::external::feeder::Feeder;
use crate::sim::core_sim::Core;
use crate::stats::Stats;

/// Owns a [`Core`] and exposes the per-cycle `tick` entry point an
/// embedder drives from its own event loop.
pub struct Simulator {
    pub core: Core,
}

impl Simulator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        feeder: Box<dyn Feeder>,
        cracker: Box<dyn Cracker>,
        bp: Box<dyn BranchPredictor>,
        cache: Box<dyn CacheTlbPort>,
        repeater: Box<dyn Repeater>,
        translator: Box<dyn Translator>,
        entry_pc: u64,
    ) -> Self {
        Self {
            core: Core::new(config, feeder, cracker, bp, cache, repeater, translator, entry_pc),
        }
    }

    /// Advance the simulation by one cycle.
    pub fn tick(&mut self) -> Result<(), CoreError> {
        self.core.step()
    }

    /// Empty every in-flight structure and resume fetch at `new_pc`,
    /// for a context switch or checkpoint restore.
    pub fn complete_flush(&mut self, new_pc: u64) -> Result<(), CoreError> {
        crate::core::pipeline::backend::shared::recovery::complete_flush(&mut self.core, new_pc)
    }

    pub fn stats(&self) -> &Stats {
        &self.core.stats
    }

    pub fn now(&self) -> u64 {
        self.core.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::cracker::StubCracker;
    use crate::core::units::branch_predictor::StaticNotTakenPredictor;
    use crate::core::units::cache::FixedLatencyPort;
    use crate::core::units::repeater::NullRepeater;
    use crate::core::units::translate::FlatTranslator;
    use crate::external::feeder::TraceFeeder;

    #[test]
    fn tick_advances_cycle_count_on_an_empty_trace() {
        let mut sim = Simulator::new(
            Config::default(),
            Box::new(TraceFeeder::new(Vec::new())),
            Box::new(StubCracker::default()),
            Box::new(StaticNotTakenPredictor::default()),
            Box::new(FixedLatencyPort::new(1)),
            Box::new(NullRepeater::default()),
            Box::new(FlatTranslator::new()),
            0,
        );
        assert_eq!(sim.now(), 0);
        let _ = sim.tick();
        assert_eq!(sim.now(), 1);
    }

    #[test]
    fn complete_flush_resteers_fetch_and_clears_structural_state() {
        let mut sim = Simulator::new(
            Config::default(),
            Box::new(TraceFeeder::new(Vec::new())),
            Box::new(StubCracker::default()),
            Box::new(StaticNotTakenPredictor::default()),
            Box::new(FixedLatencyPort::new(1)),
            Box::new(NullRepeater::default()),
            Box::new(FlatTranslator::new()),
            0,
        );
        sim.complete_flush(0x2000).unwrap();
        assert_eq!(sim.core.fetch_pc, 0x2000);
        assert_eq!(sim.core.rob.num(), 0);
        assert_eq!(sim.core.oracle.mopq.num(), 0);
    }
}
