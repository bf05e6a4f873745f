//! Backend pipeline stages: scheduling and execution.
//!
//! Issue/execute differ between the two back-ends ([`iodpm`]'s fixed
//! payload pipes and [`stm`]'s age-ordered ready lists); memory-order
//! resolution and commit are identical between them and live in
//! [`shared`]. [`ports`] is the functional-unit bank both back-ends
//! issue into.

pub mod iodpm;
pub mod ports;
pub mod shared;
pub mod stm;
