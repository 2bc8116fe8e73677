//! Per-patch data: field buffers, typed regions over them, halo transfer
//! plans, and particle records.

pub mod delta;
pub mod field;
pub mod halo_plan;
pub mod particle;
pub mod region;

pub use crate::debug_invariants::DebugInvariants;
