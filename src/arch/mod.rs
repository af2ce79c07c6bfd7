//! # Architecture Abstraction Layer
//!
//! The boundary between the portable scheduler core and the hardware.
//! A port supplies four things: a periodic tick interrupt, a context
//! switch primitive that swaps saved stack pointers and register sets, a
//! stack-seeding routine whose frame enters a fresh task cleanly, and a
//! critical-section pair (see [`crate::sync`]).
//!
//! Currently implements the Cortex-M4 port; extensible to other
//! architectures by adding sibling modules.

#[cfg(feature = "port-cortex-m4")]
pub mod cortex_m4;
