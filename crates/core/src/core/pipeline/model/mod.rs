//! The Mop/uop data model.
//!
//! A [`Mop`] owns a contiguous `Vec<Uop>`; dependency edges between
//! uops are expressed as [`UopLoc`] coordinates (Mop sequence number +
//! index within that Mop) rather than pointers, resolved through the
//! owning [`super::mopq::MopQueue`]. Indices survive moves and
//! snapshots in a way raw pointers into a growing arena would not.

pub mod mop;
pub mod odep;
pub mod uop;

pub use mop::{MemOperands, Mop, SlipStats};
pub use odep::{OdepNode, OdepPool};
pub use uop::{RegName, Timing, Uop, UopFlags, UopLoc};
