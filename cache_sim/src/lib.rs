//! Direct-mapped cache simulator for replaying address traces.
//!
//! [`cache::DirectMappedCache`] is the state machine; everything else feeds it
//! or reports on it.

pub mod cache;
pub mod geometry;
pub mod sim;
pub mod trace;

#[cfg(feature = "stat")]
pub mod stat;
