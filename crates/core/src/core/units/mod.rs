//! Opaque external collaborators: the branch predictor, the cache/TLB
//! hierarchy, the repeater fast path, and the v2p translator. Only the
//! contract shape each exposes to the core lives here — concrete
//! predictor/cache-hierarchy/repeater/MMU implementations are the
//! embedder's problem, not the core's.

pub mod branch_predictor;
pub mod cache;
pub mod repeater;
pub mod translate;

pub use branch_predictor::{BranchPredictor, OpFlags, StateCacheHandle, StaticNotTakenPredictor};
pub use cache::{CacheEvent, CacheTlbPort, FixedLatencyPort};
pub use repeater::{NullRepeater, Repeater, RepeaterEvent};
pub use translate::{FlatTranslator, Translator};
