//! External interface adapters: the feeder handshake, the cache/TLB
//! enqueue contract, v2p translation, and the branch-predictor
//! interface. Each of these names an opaque collaborator living
//! outside the core — only the contract shape lives here.

pub mod feeder;

pub use feeder::{Feeder, FeederRecord, HandshakeResult, MemOperand, TraceFeeder};
